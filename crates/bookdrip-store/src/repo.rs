use chrono::{DateTime, Utc};

use bookdrip_core::{Book, DeliverySchedule, ReadingProgress, Snippet, User};

use crate::error::Result;

/// Storage interface consumed by the delivery engine and schedule controller.
///
/// Implementations must be `Send + Sync`; each call is assumed atomic at the
/// statement level. The store is treated as single-writer — there is no
/// optimistic-concurrency check on updates.
pub trait Repository: Send + Sync {
    fn get_user(&self, id: i64) -> Result<Option<User>>;
    fn update_user(&self, user: &User) -> Result<()>;

    fn get_book(&self, id: i64) -> Result<Option<Book>>;

    /// The snippet at a 0-indexed position, or `None` past the end.
    fn get_snippet(&self, book_id: i64, position: u32) -> Result<Option<Snippet>>;
    fn count_snippets(&self, book_id: i64) -> Result<u32>;

    fn get_schedule(&self, user_id: i64, book_id: i64) -> Result<Option<DeliverySchedule>>;
    fn list_user_schedules(&self, user_id: i64) -> Result<Vec<DeliverySchedule>>;

    /// Active (non-paused) schedules with `next_delivery_at <= before`,
    /// ordered ascending by `next_delivery_at`, then by id for equal
    /// instants (stable FIFO).
    fn list_due_schedules(&self, before: DateTime<Utc>) -> Result<Vec<DeliverySchedule>>;

    /// Insert a schedule; the returned copy carries the assigned row id.
    fn create_schedule(&self, schedule: &DeliverySchedule) -> Result<DeliverySchedule>;
    fn update_schedule(&self, schedule: &DeliverySchedule) -> Result<()>;
    fn delete_schedule(&self, user_id: i64, book_id: i64) -> Result<()>;

    fn get_progress(&self, user_id: i64, book_id: i64) -> Result<Option<ReadingProgress>>;
    fn create_progress(&self, progress: &ReadingProgress) -> Result<()>;
    fn update_progress(&self, progress: &ReadingProgress) -> Result<()>;
}
