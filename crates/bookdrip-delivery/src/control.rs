//! Schedule configuration and pause/resume control.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use bookdrip_core::{DeliverySchedule, DeliveryTime, Frequency, ReadingProgress};
use bookdrip_store::{Repository, StoreError};

use crate::{
    error::{DeliveryError, Result},
    schedule::{next_delivery, parse_timezone},
};

/// Creates, retimes, pauses, and resumes delivery schedules.
///
/// All validation happens here, synchronously, before anything is persisted:
/// bad times, timezones, and frequency tokens never reach the store.
pub struct ScheduleManager {
    repo: Arc<dyn Repository>,
}

impl ScheduleManager {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    /// Create or update the (unique) schedule for a user's book.
    ///
    /// Validates the delivery time and timezone, optionally updates the
    /// user's stored timezone, computes a fresh `next_delivery_at`, clears
    /// any pause, and makes sure a progress record exists for the pair.
    pub fn set_schedule(
        &self,
        user_id: i64,
        book_id: i64,
        delivery_time: &str,
        frequency: Frequency,
        timezone: Option<&str>,
    ) -> Result<DeliverySchedule> {
        let mut user = self
            .repo
            .get_user(user_id)?
            .ok_or(DeliveryError::UserNotFound { id: user_id })?;
        if self.repo.get_book(book_id)?.is_none() {
            return Err(DeliveryError::BookNotFound { id: book_id });
        }

        if let Some(tz_name) = timezone {
            parse_timezone(tz_name)?;
            if user.timezone != tz_name {
                user.timezone = tz_name.to_string();
                self.repo.update_user(&user)?;
                info!(user_id, timezone = tz_name, "user timezone updated");
            }
        }

        let time: DeliveryTime = delivery_time.parse()?;
        let tz = parse_timezone(&user.timezone)?;
        let next = next_delivery(time, frequency, tz, Utc::now());

        if self.repo.get_progress(user_id, book_id)?.is_none() {
            self.repo
                .create_progress(&ReadingProgress::new(user_id, book_id))?;
        }

        let schedule = match self.repo.get_schedule(user_id, book_id)? {
            Some(mut existing) => {
                existing.delivery_time = time;
                existing.frequency = frequency;
                existing.next_delivery_at = Some(next);
                existing.paused = false;
                self.repo.update_schedule(&existing)?;
                info!(user_id, book_id, %time, %frequency, "schedule updated");
                existing
            }
            None => {
                let created = self.repo.create_schedule(&DeliverySchedule {
                    id: 0,
                    user_id,
                    book_id,
                    delivery_time: time,
                    frequency,
                    paused: false,
                    last_delivered_at: None,
                    next_delivery_at: Some(next),
                })?;
                info!(user_id, book_id, %time, %frequency, "schedule created");
                created
            }
        };
        Ok(schedule)
    }

    /// Pause deliveries for one schedule. `next_delivery_at` is left alone so
    /// the schedule remembers where it would have fired. Idempotent; returns
    /// false only when no schedule exists.
    pub fn pause(&self, user_id: i64, book_id: i64) -> Result<bool> {
        let Some(mut schedule) = self.repo.get_schedule(user_id, book_id)? else {
            return Ok(false);
        };
        if schedule.paused {
            info!(user_id, book_id, "schedule already paused");
            return Ok(true);
        }
        schedule.paused = true;
        self.repo.update_schedule(&schedule)?;
        info!(user_id, book_id, "schedule paused");
        Ok(true)
    }

    /// Resume deliveries, recomputing `next_delivery_at` fresh from now.
    /// Missed occurrences while paused are not delivered. Idempotent.
    pub fn resume(&self, user_id: i64, book_id: i64) -> Result<bool> {
        let Some(mut schedule) = self.repo.get_schedule(user_id, book_id)? else {
            return Ok(false);
        };
        if !schedule.paused {
            info!(user_id, book_id, "schedule already active");
            return Ok(true);
        }
        let tz = self.user_timezone(user_id)?;
        schedule.paused = false;
        schedule.next_delivery_at = Some(next_delivery(
            schedule.delivery_time,
            schedule.frequency,
            tz,
            Utc::now(),
        ));
        self.repo.update_schedule(&schedule)?;
        info!(user_id, book_id, "schedule resumed");
        Ok(true)
    }

    /// Pause every schedule a user has. Returns the number newly paused.
    pub fn pause_all(&self, user_id: i64) -> Result<usize> {
        let mut paused = 0;
        for mut schedule in self.repo.list_user_schedules(user_id)? {
            if !schedule.paused {
                schedule.paused = true;
                self.repo.update_schedule(&schedule)?;
                paused += 1;
            }
        }
        info!(user_id, count = paused, "schedules paused");
        Ok(paused)
    }

    /// Resume every paused schedule a user has. Returns the number resumed.
    pub fn resume_all(&self, user_id: i64) -> Result<usize> {
        let tz = self.user_timezone(user_id)?;
        let now = Utc::now();
        let mut resumed = 0;
        for mut schedule in self.repo.list_user_schedules(user_id)? {
            if schedule.paused {
                schedule.paused = false;
                schedule.next_delivery_at = Some(next_delivery(
                    schedule.delivery_time,
                    schedule.frequency,
                    tz,
                    now,
                ));
                self.repo.update_schedule(&schedule)?;
                resumed += 1;
            }
        }
        info!(user_id, count = resumed, "schedules resumed");
        Ok(resumed)
    }

    /// Change a user's timezone and retime all of their schedules in it.
    pub fn update_user_timezone(&self, user_id: i64, timezone: &str) -> Result<()> {
        let tz = parse_timezone(timezone)?;
        let mut user = self
            .repo
            .get_user(user_id)?
            .ok_or(DeliveryError::UserNotFound { id: user_id })?;
        user.timezone = timezone.to_string();
        self.repo.update_user(&user)?;
        info!(user_id, timezone, "user timezone updated");

        let now = Utc::now();
        for mut schedule in self.repo.list_user_schedules(user_id)? {
            schedule.next_delivery_at = Some(next_delivery(
                schedule.delivery_time,
                schedule.frequency,
                tz,
                now,
            ));
            self.repo.update_schedule(&schedule)?;
        }
        Ok(())
    }

    /// Delete the schedule for a user's book.
    pub fn remove_schedule(&self, user_id: i64, book_id: i64) -> Result<()> {
        match self.repo.delete_schedule(user_id, book_id) {
            Ok(()) => {
                info!(user_id, book_id, "schedule removed");
                Ok(())
            }
            Err(StoreError::NotFound(_)) => {
                Err(DeliveryError::ScheduleNotFound { user_id, book_id })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn user_timezone(&self, user_id: i64) -> Result<chrono_tz::Tz> {
        let user = self
            .repo
            .get_user(user_id)?
            .ok_or(DeliveryError::UserNotFound { id: user_id })?;
        Ok(parse_timezone(&user.timezone)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bookdrip_store::SqliteRepository;
    use chrono::Duration;

    fn setup() -> (Arc<SqliteRepository>, ScheduleManager, i64, i64) {
        let repo = Arc::new(SqliteRepository::in_memory().unwrap());
        let user = repo.create_user(42, "UTC").unwrap();
        let book = repo.create_book("Dune", Some("Herbert"), 10).unwrap();
        let manager = ScheduleManager::new(repo.clone());
        (repo, manager, user.id, book.id)
    }

    #[test]
    fn set_schedule_creates_with_future_next_delivery_and_progress() {
        let (repo, manager, user_id, book_id) = setup();
        let before = Utc::now();
        let schedule = manager
            .set_schedule(user_id, book_id, "09:00", Frequency::Daily, None)
            .unwrap();
        assert!(schedule.id > 0);
        assert!(!schedule.paused);
        assert!(schedule.next_delivery_at.unwrap() > before);
        assert!(repo.get_progress(user_id, book_id).unwrap().is_some());
    }

    #[test]
    fn set_schedule_updates_the_existing_row_in_place() {
        let (repo, manager, user_id, book_id) = setup();
        let first = manager
            .set_schedule(user_id, book_id, "09:00", Frequency::Daily, None)
            .unwrap();
        let second = manager
            .set_schedule(user_id, book_id, "21:30", Frequency::Weekly, None)
            .unwrap();
        assert_eq!(first.id, second.id);

        let stored = repo.get_schedule(user_id, book_id).unwrap().unwrap();
        assert_eq!(stored.delivery_time.to_string(), "21:30");
        assert_eq!(stored.frequency, Frequency::Weekly);
    }

    #[test]
    fn set_schedule_rejects_bad_time_and_timezone() {
        let (_repo, manager, user_id, book_id) = setup();
        assert!(matches!(
            manager.set_schedule(user_id, book_id, "25:00", Frequency::Daily, None),
            Err(DeliveryError::Validation(_))
        ));
        assert!(matches!(
            manager.set_schedule(user_id, book_id, "09:00", Frequency::Daily, Some("Not/AZone")),
            Err(DeliveryError::Validation(_))
        ));
    }

    #[test]
    fn set_schedule_requires_known_user_and_book() {
        let (_repo, manager, user_id, book_id) = setup();
        assert!(matches!(
            manager.set_schedule(999, book_id, "09:00", Frequency::Daily, None),
            Err(DeliveryError::UserNotFound { id: 999 })
        ));
        assert!(matches!(
            manager.set_schedule(user_id, 999, "09:00", Frequency::Daily, None),
            Err(DeliveryError::BookNotFound { id: 999 })
        ));
    }

    #[test]
    fn pause_keeps_next_delivery_and_is_idempotent() {
        let (repo, manager, user_id, book_id) = setup();
        let schedule = manager
            .set_schedule(user_id, book_id, "09:00", Frequency::Daily, None)
            .unwrap();
        let next_before = schedule.next_delivery_at;

        assert!(manager.pause(user_id, book_id).unwrap());
        assert!(manager.pause(user_id, book_id).unwrap());

        let stored = repo.get_schedule(user_id, book_id).unwrap().unwrap();
        assert!(stored.paused);
        assert_eq!(stored.next_delivery_at, next_before);
    }

    #[test]
    fn resume_recomputes_next_delivery_independent_of_old_value() {
        let (repo, manager, user_id, book_id) = setup();
        let mut schedule = manager
            .set_schedule(user_id, book_id, "09:00", Frequency::Daily, None)
            .unwrap();

        // Simulate a long pause: backdate the remembered next delivery.
        schedule.paused = true;
        schedule.next_delivery_at = Some(Utc::now() - Duration::days(30));
        repo.update_schedule(&schedule).unwrap();

        let resume_at = Utc::now();
        assert!(manager.resume(user_id, book_id).unwrap());

        let stored = repo.get_schedule(user_id, book_id).unwrap().unwrap();
        assert!(!stored.paused);
        assert!(stored.next_delivery_at.unwrap() > resume_at);
    }

    #[test]
    fn pause_and_resume_report_missing_schedules() {
        let (_repo, manager, user_id, book_id) = setup();
        assert!(!manager.pause(user_id, book_id).unwrap());
        assert!(!manager.resume(user_id, book_id).unwrap());
    }

    #[test]
    fn bulk_pause_and_resume_count_only_changed_rows() {
        let (repo, manager, user_id, book_id) = setup();
        let book2 = repo.create_book("Emma", None, 5).unwrap();
        manager
            .set_schedule(user_id, book_id, "09:00", Frequency::Daily, None)
            .unwrap();
        manager
            .set_schedule(user_id, book2.id, "20:00", Frequency::Weekly, None)
            .unwrap();

        assert_eq!(manager.pause_all(user_id).unwrap(), 2);
        assert_eq!(manager.pause_all(user_id).unwrap(), 0);
        assert_eq!(manager.resume_all(user_id).unwrap(), 2);
        assert_eq!(manager.resume_all(user_id).unwrap(), 0);
    }

    #[test]
    fn remove_schedule_deletes_the_row_and_reports_missing_pairs() {
        let (repo, manager, user_id, book_id) = setup();
        manager
            .set_schedule(user_id, book_id, "09:00", Frequency::Daily, None)
            .unwrap();

        manager.remove_schedule(user_id, book_id).unwrap();
        assert!(repo.get_schedule(user_id, book_id).unwrap().is_none());

        assert!(matches!(
            manager.remove_schedule(user_id, book_id),
            Err(DeliveryError::ScheduleNotFound { .. })
        ));
    }

    #[test]
    fn timezone_change_retimes_every_schedule() {
        let (repo, manager, user_id, book_id) = setup();
        manager
            .set_schedule(user_id, book_id, "09:00", Frequency::Daily, None)
            .unwrap();
        manager
            .update_user_timezone(user_id, "Asia/Tokyo")
            .unwrap();

        let user = repo.get_user(user_id).unwrap().unwrap();
        assert_eq!(user.timezone, "Asia/Tokyo");
        let stored = repo.get_schedule(user_id, book_id).unwrap().unwrap();
        assert!(stored.next_delivery_at.unwrap() > Utc::now());
    }
}
