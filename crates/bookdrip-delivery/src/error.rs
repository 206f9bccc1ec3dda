use thiserror::Error;

use bookdrip_core::CoreError;
use bookdrip_store::StoreError;

/// Errors surfaced by the schedule controller and the delivery runner.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Bad delivery time, timezone, or frequency — never retried.
    #[error("Validation error: {0}")]
    Validation(#[from] CoreError),

    /// The persistence layer failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("User not found: {id}")]
    UserNotFound { id: i64 },

    #[error("Book not found: {id}")]
    BookNotFound { id: i64 },

    #[error("Schedule not found for user {user_id}, book {book_id}")]
    ScheduleNotFound { user_id: i64, book_id: i64 },
}

pub type Result<T> = std::result::Result<T, DeliveryError>;
