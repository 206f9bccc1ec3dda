use thiserror::Error;

/// Errors that can occur within the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite / rusqlite error (including undecodable rows).
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// An update or delete matched no row.
    #[error("No such record: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
