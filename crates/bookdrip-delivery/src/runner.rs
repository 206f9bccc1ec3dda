//! Background delivery loop: discovers due schedules and delivers snippets.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use bookdrip_core::config::DeliveryConfig;
use bookdrip_core::{DeliveryResult, DeliverySchedule};
use bookdrip_store::Repository;

use crate::{
    dispatch::{send_with_retry, BackoffPolicy, MessageSink},
    error::Result,
    format::{self, ChunkLimits},
    schedule::{next_delivery, parse_timezone},
};

/// Tunables for the delivery runner.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Pause between poll cycles.
    pub check_interval: Duration,
    pub backoff: BackoffPolicy,
    pub limits: ChunkLimits,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
            backoff: BackoffPolicy::default(),
            limits: ChunkLimits::default(),
        }
    }
}

impl From<&DeliveryConfig> for RunnerConfig {
    fn from(cfg: &DeliveryConfig) -> Self {
        Self {
            check_interval: Duration::from_secs(cfg.check_interval_secs),
            backoff: BackoffPolicy {
                max_retries: cfg.max_retries,
                initial: Duration::from_secs_f64(cfg.initial_backoff_secs),
                multiplier: cfg.backoff_multiplier,
                max: Duration::from_secs_f64(cfg.max_backoff_secs),
            },
            limits: ChunkLimits::with_max_len(cfg.max_message_len),
        }
    }
}

/// One poll cycle's worth of work, plus the loop that repeats it.
///
/// Due schedules are processed strictly sequentially, in ascending
/// `next_delivery_at` order, to bound load on the messaging sink and store.
/// A failure for one schedule never stops the rest of the cycle.
#[derive(Clone)]
pub struct DeliveryRunner {
    repo: Arc<dyn Repository>,
    sink: Arc<dyn MessageSink>,
    config: RunnerConfig,
    /// If set, every [`DeliveryResult`] is forwarded here for observers.
    results_tx: Option<mpsc::Sender<DeliveryResult>>,
}

impl DeliveryRunner {
    pub fn new(repo: Arc<dyn Repository>, sink: Arc<dyn MessageSink>, config: RunnerConfig) -> Self {
        Self {
            repo,
            sink,
            config,
            results_tx: None,
        }
    }

    /// Forward per-schedule results to `tx` (non-blocking `try_send`).
    pub fn with_results(mut self, tx: mpsc::Sender<DeliveryResult>) -> Self {
        self.results_tx = Some(tx);
        self
    }

    /// Main loop. Polls every `check_interval` until `shutdown` turns true
    /// or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.check_interval.as_secs(),
            "delivery runner started"
        );
        let mut interval = tokio::time::interval(self.config.check_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_once(&mut shutdown).await;
                }
                changed = shutdown.changed() => {
                    // A dropped sender counts as shutdown; reacting only to
                    // a true value would leave this select spinning hot.
                    if changed.is_err() || *shutdown.borrow() {
                        info!("delivery runner shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Process every currently-due schedule once. Public for manual
    /// triggering and tests.
    pub async fn run_once(&self, shutdown: &mut watch::Receiver<bool>) -> Vec<DeliveryResult> {
        let now = Utc::now();
        let due = match self.repo.list_due_schedules(now) {
            Ok(due) => due,
            Err(e) => {
                error!("due-schedule query failed: {e}");
                return Vec::new();
            }
        };

        let mut results = Vec::with_capacity(due.len());
        for schedule in due {
            // Per-item containment: internal errors become failure results
            // and the remaining schedules still get their turn.
            let result = match self.deliver(&schedule, shutdown).await {
                Ok(result) => result,
                Err(e) => {
                    error!(schedule_id = schedule.id, "delivery error: {e}");
                    DeliveryResult::failure(
                        &schedule,
                        "Internal error during delivery",
                        e.to_string(),
                        0,
                    )
                }
            };

            if result.success {
                info!(
                    schedule_id = result.schedule_id,
                    user_id = result.user_id,
                    position = result.snippet_position,
                    attempts = result.attempts,
                    "snippet delivered"
                );
            } else {
                warn!(
                    schedule_id = result.schedule_id,
                    user_id = result.user_id,
                    error = result.error.as_deref().unwrap_or(""),
                    "{}",
                    result.message
                );
            }

            if let Some(ref tx) = self.results_tx {
                if tx.try_send(result.clone()).is_err() {
                    warn!(
                        schedule_id = result.schedule_id,
                        "results channel full or closed — result dropped"
                    );
                }
            }
            results.push(result);

            if *shutdown.borrow() {
                break;
            }
        }
        results
    }

    /// Deliver the next snippet for one due schedule.
    ///
    /// Resolution failures (missing user/book/progress/snippet, bad stored
    /// timezone, already-completed book) return a failure result and leave
    /// the schedule row untouched, so it is reconsidered next cycle.
    async fn deliver(
        &self,
        schedule: &DeliverySchedule,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<DeliveryResult> {
        let Some(user) = self.repo.get_user(schedule.user_id)? else {
            return Ok(DeliveryResult::failure(
                schedule,
                "User not found",
                "user missing from store",
                0,
            ));
        };
        let tz = match parse_timezone(&user.timezone) {
            Ok(tz) => tz,
            Err(e) => {
                return Ok(DeliveryResult::failure(
                    schedule,
                    "Invalid stored timezone",
                    e.to_string(),
                    0,
                ))
            }
        };
        let Some(book) = self.repo.get_book(schedule.book_id)? else {
            return Ok(DeliveryResult::failure(
                schedule,
                "Book not found",
                "book missing from store",
                0,
            ));
        };
        let Some(mut progress) = self.repo.get_progress(schedule.user_id, schedule.book_id)?
        else {
            return Ok(DeliveryResult::failure(
                schedule,
                "No progress record found",
                "progress missing for user/book",
                0,
            ));
        };
        if progress.completed {
            return Ok(DeliveryResult::failure(
                schedule,
                "Book already completed",
                "book is marked as completed",
                0,
            ));
        }

        let position = progress.current_position;
        let Some(snippet) = self.repo.get_snippet(schedule.book_id, position)? else {
            return Ok(DeliveryResult::failure(
                schedule,
                "No more snippets available",
                format!("snippet at position {position} not found"),
                0,
            ));
        };
        let total = self.repo.count_snippets(schedule.book_id)?;

        let messages =
            format::format_snippet(&book, &snippet.content, position, total, &self.config.limits);

        let mut attempts = 0;
        for text in &messages {
            let outcome = send_with_retry(
                self.sink.as_ref(),
                user.chat_id,
                text,
                &self.config.backoff,
                shutdown,
            )
            .await;
            attempts += outcome.attempts;
            if !outcome.delivered {
                // Remaining chunks are abandoned; progress and schedule
                // timing stay put for an at-least-once redelivery.
                return Ok(DeliveryResult::failure(
                    schedule,
                    "Failed to send message",
                    outcome.error.unwrap_or_default(),
                    attempts,
                ));
            }
        }

        let now = Utc::now();
        progress.advance(1, total, now);
        if progress.completed {
            // Best-effort: a lost congratulation never rolls back progress.
            let note = format::completion_message(&book, total);
            let outcome = send_with_retry(
                self.sink.as_ref(),
                user.chat_id,
                &note,
                &self.config.backoff,
                shutdown,
            )
            .await;
            if !outcome.delivered {
                warn!(
                    user_id = user.id,
                    book_id = book.id,
                    error = outcome.error.as_deref().unwrap_or(""),
                    "completion notice failed"
                );
            }
        }
        self.repo.update_progress(&progress)?;

        let mut updated = schedule.clone();
        updated.last_delivered_at = Some(now);
        updated.next_delivery_at = Some(next_delivery(
            updated.delivery_time,
            updated.frequency,
            tz,
            now,
        ));
        self.repo.update_schedule(&updated)?;

        Ok(DeliveryResult::success(&updated, position, attempts))
    }
}

/// Start/stop handle around the runner's background task.
///
/// `start` while running and `stop` while stopped are no-ops. `stop` signals
/// the watch channel and awaits the task, draining any in-flight backoff.
pub struct DeliveryService {
    runner: DeliveryRunner,
    worker: Option<Worker>,
}

struct Worker {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl DeliveryService {
    pub fn new(
        repo: Arc<dyn Repository>,
        sink: Arc<dyn MessageSink>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            runner: DeliveryRunner::new(repo, sink, config),
            worker: None,
        }
    }

    /// Forward per-schedule results to `tx` for observers.
    pub fn with_results(mut self, tx: mpsc::Sender<DeliveryResult>) -> Self {
        self.runner = self.runner.with_results(tx);
        self
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Spawn the background loop. No-op when already running.
    pub fn start(&mut self) {
        if self.worker.is_some() {
            warn!("delivery service already running");
            return;
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.runner.clone().run(shutdown_rx));
        self.worker = Some(Worker {
            shutdown: shutdown_tx,
            task,
        });
        info!("delivery service started");
    }

    /// Signal shutdown and await the loop task. No-op when stopped.
    pub async fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        let _ = worker.shutdown.send(true);
        if let Err(e) = worker.task.await {
            error!("delivery task join failed: {e}");
        }
        info!("delivery service stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bookdrip_core::{Frequency, ReadingProgress, Snippet};
    use bookdrip_store::SqliteRepository;
    use chrono::Duration as ChronoDuration;
    use std::sync::Mutex;

    use crate::dispatch::SinkError;

    /// Sink that records every send and either accepts or declines them all.
    struct RecordingSink {
        sent: Mutex<Vec<(i64, String)>>,
        accept: bool,
    }

    impl RecordingSink {
        fn accepting() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                accept: true,
            })
        }

        fn declining() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                accept: false,
            })
        }

        fn sent(&self) -> Vec<(i64, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessageSink for RecordingSink {
        async fn send(&self, chat_id: i64, text: &str) -> std::result::Result<bool, SinkError> {
            self.sent.lock().unwrap().push((chat_id, text.to_string()));
            Ok(self.accept)
        }
    }

    struct Fixture {
        repo: Arc<SqliteRepository>,
        user_id: i64,
        chat_id: i64,
        book_id: i64,
        schedule: bookdrip_core::DeliverySchedule,
    }

    /// A user with a 3-snippet book, a due schedule, and progress at 0.
    fn fixture() -> Fixture {
        let repo = Arc::new(SqliteRepository::in_memory().unwrap());
        let user = repo.create_user(555, "UTC").unwrap();
        let book = repo.create_book("Walden", Some("Thoreau"), 3).unwrap();
        for pos in 0..3u32 {
            repo.create_snippet(&Snippet {
                book_id: book.id,
                position: pos,
                content: format!("Snippet number {pos}. It has a little text."),
            })
            .unwrap();
        }
        repo.create_progress(&ReadingProgress::new(user.id, book.id))
            .unwrap();
        let schedule = repo
            .create_schedule(&bookdrip_core::DeliverySchedule {
                id: 0,
                user_id: user.id,
                book_id: book.id,
                delivery_time: "09:00".parse().unwrap(),
                frequency: Frequency::Daily,
                paused: false,
                last_delivered_at: None,
                next_delivery_at: Some(Utc::now() - ChronoDuration::minutes(1)),
            })
            .unwrap();
        Fixture {
            user_id: user.id,
            chat_id: user.chat_id,
            book_id: book.id,
            repo,
            schedule,
        }
    }

    fn runner(repo: &Arc<SqliteRepository>, sink: Arc<RecordingSink>) -> DeliveryRunner {
        DeliveryRunner::new(repo.clone(), sink, RunnerConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn success_advances_progress_and_retimes_the_schedule() {
        let f = fixture();
        let sink = RecordingSink::accepting();
        let (_tx, mut rx) = watch::channel(false);
        let before = Utc::now();

        let results = runner(&f.repo, sink.clone()).run_once(&mut rx).await;
        assert_eq!(results.len(), 1);
        let result = &results[0];
        assert!(result.success);
        assert_eq!(result.snippet_position, Some(0));
        assert_eq!(result.attempts, 1);

        let progress = f.repo.get_progress(f.user_id, f.book_id).unwrap().unwrap();
        assert_eq!(progress.current_position, 1);
        assert!(!progress.completed);

        let schedule = f.repo.get_schedule(f.user_id, f.book_id).unwrap().unwrap();
        assert!(schedule.next_delivery_at.unwrap() > before);
        assert!(schedule.last_delivered_at.is_some());

        let sent = sink.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, f.chat_id);
        assert!(sent[0].1.contains("Snippet number 0"));
        assert!(sent[0].1.contains("1/3 snippets"));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_sends_leave_progress_and_schedule_untouched() {
        let f = fixture();
        let sink = RecordingSink::declining();
        let (_tx, mut rx) = watch::channel(false);

        let results = runner(&f.repo, sink.clone()).run_once(&mut rx).await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert_eq!(results[0].attempts, 5);
        assert_eq!(sink.sent().len(), 5);

        let progress = f.repo.get_progress(f.user_id, f.book_id).unwrap().unwrap();
        assert_eq!(progress.current_position, 0);

        let schedule = f.repo.get_schedule(f.user_id, f.book_id).unwrap().unwrap();
        assert_eq!(schedule.next_delivery_at, f.schedule.next_delivery_at);
        assert!(schedule.last_delivered_at.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_progress_fails_without_sending_or_touching_the_schedule() {
        // A schedule whose progress row was never created.
        let repo = Arc::new(SqliteRepository::in_memory().unwrap());
        let user = repo.create_user(777, "UTC").unwrap();
        let book = repo.create_book("Emma", None, 2).unwrap();
        let original = repo
            .create_schedule(&bookdrip_core::DeliverySchedule {
                id: 0,
                user_id: user.id,
                book_id: book.id,
                delivery_time: "09:00".parse().unwrap(),
                frequency: Frequency::Daily,
                paused: false,
                last_delivered_at: None,
                next_delivery_at: Some(Utc::now() - ChronoDuration::minutes(1)),
            })
            .unwrap();

        let sink = RecordingSink::accepting();
        let (_tx, mut rx) = watch::channel(false);
        let results = runner(&repo, sink.clone()).run_once(&mut rx).await;

        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert_eq!(results[0].message, "No progress record found");
        assert!(sink.sent().is_empty());

        let schedule = repo.get_schedule(user.id, book.id).unwrap().unwrap();
        assert_eq!(schedule.next_delivery_at, original.next_delivery_at);
        assert!(schedule.last_delivered_at.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn completed_progress_is_a_failure_without_sending() {
        let f = fixture();
        let mut progress = f.repo.get_progress(f.user_id, f.book_id).unwrap().unwrap();
        progress.advance(3, 3, Utc::now());
        f.repo.update_progress(&progress).unwrap();

        let sink = RecordingSink::accepting();
        let (_tx, mut rx) = watch::channel(false);
        let results = runner(&f.repo, sink.clone()).run_once(&mut rx).await;

        assert!(!results[0].success);
        assert_eq!(results[0].message, "Book already completed");
        assert!(sink.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn finishing_a_book_sends_the_completion_notice() {
        let f = fixture();
        let mut progress = f.repo.get_progress(f.user_id, f.book_id).unwrap().unwrap();
        progress.advance(2, 3, Utc::now());
        f.repo.update_progress(&progress).unwrap();

        let sink = RecordingSink::accepting();
        let (_tx, mut rx) = watch::channel(false);
        let results = runner(&f.repo, sink.clone()).run_once(&mut rx).await;

        assert!(results[0].success);
        assert_eq!(results[0].snippet_position, Some(2));

        let progress = f.repo.get_progress(f.user_id, f.book_id).unwrap().unwrap();
        assert!(progress.completed);
        assert!(progress.completed_at.is_some());

        let sent = sink.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].1.contains("Snippet number 2"));
        assert!(sent[1].1.contains("Congratulations"));
    }

    #[tokio::test(start_paused = true)]
    async fn one_failing_schedule_does_not_stop_the_cycle() {
        let f = fixture();
        // Second user with no progress record: resolution fails for them.
        let ghost = f.repo.create_user(556, "UTC").unwrap();
        let book2 = f.repo.create_book("Iliad", None, 1).unwrap();
        f.repo
            .create_snippet(&Snippet {
                book_id: book2.id,
                position: 0,
                content: "Sing, goddess.".to_string(),
            })
            .unwrap();
        f.repo
            .create_schedule(&bookdrip_core::DeliverySchedule {
                id: 0,
                user_id: ghost.id,
                book_id: book2.id,
                delivery_time: "08:00".parse().unwrap(),
                frequency: Frequency::Daily,
                paused: false,
                last_delivered_at: None,
                // Earlier than the fixture schedule, so it is processed first.
                next_delivery_at: Some(Utc::now() - ChronoDuration::hours(2)),
            })
            .unwrap();

        let sink = RecordingSink::accepting();
        let (_tx, mut rx) = watch::channel(false);
        let (results_tx, mut results_rx) = mpsc::channel(16);
        let results = runner(&f.repo, sink.clone())
            .with_results(results_tx)
            .run_once(&mut rx)
            .await;

        assert_eq!(results.len(), 2);
        assert!(!results[0].success, "ghost schedule should fail first");
        assert!(results[1].success, "healthy schedule should still deliver");

        // Both results were forwarded to observers as well.
        assert!(!results_rx.recv().await.unwrap().success);
        assert!(results_rx.recv().await.unwrap().success);
    }

    #[tokio::test(start_paused = true)]
    async fn run_exits_when_the_shutdown_sender_is_dropped() {
        let f = fixture();
        let sink = RecordingSink::accepting();
        let (tx, rx) = watch::channel(false);
        drop(tx);

        // Must return instead of spinning between interval ticks.
        runner(&f.repo, sink).run(rx).await;
    }

    #[tokio::test(start_paused = true)]
    async fn service_start_and_stop_are_idempotent() {
        let f = fixture();
        let sink = RecordingSink::accepting();
        let mut service = DeliveryService::new(f.repo.clone(), sink, RunnerConfig::default());
        assert!(!service.is_running());

        service.start();
        assert!(service.is_running());
        service.start(); // no-op
        assert!(service.is_running());

        service.stop().await;
        assert!(!service.is_running());
        service.stop().await; // no-op
        assert!(!service.is_running());
    }
}
