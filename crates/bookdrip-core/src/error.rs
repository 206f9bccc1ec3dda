use thiserror::Error;

/// Validation errors raised synchronously when configuring a schedule.
///
/// These are never retried — they go straight back to the caller.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The delivery time is not a valid HH:MM (24h) string.
    #[error("Invalid delivery time: {0}")]
    InvalidTime(String),

    /// The timezone is not a known IANA name.
    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    /// The frequency token is not one of daily / twice_daily / weekly.
    #[error("Invalid frequency: {0}")]
    InvalidFrequency(String),

    /// Configuration file / environment could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
