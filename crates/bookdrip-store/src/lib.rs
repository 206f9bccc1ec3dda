//! `bookdrip-store` — repository interface and SQLite persistence.
//!
//! The delivery engine never touches SQL directly: it is handed a
//! [`repo::Repository`] at construction time. [`sqlite::SqliteRepository`]
//! is the production implementation, one `rusqlite::Connection` behind a
//! mutex, with timestamps stored as RFC-3339 text so the due-schedule poll
//! can compare them lexicographically.

pub mod db;
pub mod error;
pub mod repo;
pub mod sqlite;

pub use error::{Result, StoreError};
pub use repo::Repository;
pub use sqlite::SqliteRepository;
