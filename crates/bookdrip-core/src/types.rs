use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Delivery cadence for a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    /// One snippet every day at the configured time.
    Daily,
    /// Two snippets per day, twelve hours apart.
    TwiceDaily,
    /// One snippet per week at the configured time.
    Weekly,
}

impl Frequency {
    /// Wall-clock advance applied when a candidate delivery time has passed.
    ///
    /// Exhaustive by construction — adding a frequency forces a decision here.
    pub fn step(&self) -> Duration {
        match self {
            Frequency::Daily => Duration::hours(24),
            Frequency::TwiceDaily => Duration::hours(12),
            Frequency::Weekly => Duration::days(7),
        }
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Frequency::Daily => "daily",
            Frequency::TwiceDaily => "twice_daily",
            Frequency::Weekly => "weekly",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Frequency {
    type Err = CoreError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "daily" => Ok(Frequency::Daily),
            "twice_daily" => Ok(Frequency::TwiceDaily),
            "weekly" => Ok(Frequency::Weekly),
            other => Err(CoreError::InvalidFrequency(other.to_string())),
        }
    }
}

/// A validated HH:MM (24h) wall-clock delivery time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryTime {
    pub hour: u8,
    pub minute: u8,
}

impl DeliveryTime {
    pub fn new(hour: u8, minute: u8) -> crate::Result<Self> {
        if hour > 23 || minute > 59 {
            return Err(CoreError::InvalidTime(format!("{hour:02}:{minute:02}")));
        }
        Ok(Self { hour, minute })
    }

    /// The time-of-day as a chrono `NaiveTime`.
    pub fn to_naive(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour as u32, self.minute as u32, 0)
            .unwrap_or(NaiveTime::MIN)
    }
}

impl std::fmt::Display for DeliveryTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl std::str::FromStr for DeliveryTime {
    type Err = CoreError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let invalid = || CoreError::InvalidTime(s.to_string());
        let (h, m) = s.split_once(':').ok_or_else(invalid)?;
        let hour: u8 = h.trim().parse().map_err(|_| invalid())?;
        let minute: u8 = m.trim().parse().map_err(|_| invalid())?;
        DeliveryTime::new(hour, minute).map_err(|_| invalid())
    }
}

/// A Telegram user subscribed to one or more books.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Database row id.
    pub id: i64,
    /// Telegram chat id messages are sent to.
    pub chat_id: i64,
    /// IANA timezone name (e.g. "Europe/Berlin").
    pub timezone: String,
}

/// A processed book whose snippets are ready for delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Book {
    pub id: i64,
    pub title: String,
    pub author: Option<String>,
    /// Snippet count recorded at processing time.
    pub total_snippets: u32,
}

/// One bounded unit of book content, 0-indexed within its book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snippet {
    pub book_id: i64,
    pub position: u32,
    pub content: String,
}

/// A user's configured delivery slot for one book.
///
/// Exactly one schedule exists per (user, book) pair. When not paused,
/// `next_delivery_at` is always a concrete UTC instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliverySchedule {
    pub id: i64,
    pub user_id: i64,
    pub book_id: i64,
    pub delivery_time: DeliveryTime,
    pub frequency: Frequency,
    pub paused: bool,
    pub last_delivered_at: Option<DateTime<Utc>>,
    pub next_delivery_at: Option<DateTime<Utc>>,
}

/// A user's read position within one book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadingProgress {
    pub user_id: i64,
    pub book_id: i64,
    /// 0-indexed position of the next snippet to deliver.
    pub current_position: u32,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ReadingProgress {
    /// Fresh progress at the start of a book.
    pub fn new(user_id: i64, book_id: i64) -> Self {
        Self {
            user_id,
            book_id,
            current_position: 0,
            completed: false,
            completed_at: None,
        }
    }

    /// Record a fully successful delivery of `delivered` snippets.
    ///
    /// The position is clamped to `total` and completion is monotonic:
    /// once set it is never cleared and `completed_at` is stamped only once.
    pub fn advance(&mut self, delivered: u32, total: u32, now: DateTime<Utc>) {
        self.current_position = self.current_position.saturating_add(delivered).min(total);
        if self.current_position >= total && !self.completed {
            self.completed = true;
            self.completed_at = Some(now);
        }
    }
}

/// Outcome of processing one due schedule in one poll cycle.
///
/// Ephemeral — consumed by logging/telemetry only, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub schedule_id: i64,
    pub user_id: i64,
    pub book_id: i64,
    pub success: bool,
    pub message: String,
    /// 0-indexed position of the snippet that was delivered, on success.
    pub snippet_position: Option<u32>,
    pub error: Option<String>,
    /// Total send attempts across all chunks of this delivery.
    pub attempts: u32,
}

impl DeliveryResult {
    pub fn success(schedule: &DeliverySchedule, position: u32, attempts: u32) -> Self {
        Self {
            schedule_id: schedule.id,
            user_id: schedule.user_id,
            book_id: schedule.book_id,
            success: true,
            message: "Snippet delivered successfully".to_string(),
            snippet_position: Some(position),
            error: None,
            attempts,
        }
    }

    pub fn failure(
        schedule: &DeliverySchedule,
        message: impl Into<String>,
        error: impl Into<String>,
        attempts: u32,
    ) -> Self {
        Self {
            schedule_id: schedule.id,
            user_id: schedule.user_id,
            book_id: schedule.book_id,
            success: false,
            message: message.into(),
            snippet_position: None,
            error: Some(error.into()),
            attempts,
        }
    }
}
