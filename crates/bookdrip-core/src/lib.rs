//! `bookdrip-core` — shared models, validation, and configuration.
//!
//! Everything the other crates agree on lives here: the persisted entities
//! ([`types::User`], [`types::Book`], [`types::Snippet`],
//! [`types::DeliverySchedule`], [`types::ReadingProgress`]), the ephemeral
//! [`types::DeliveryResult`] handed to telemetry, the validation error
//! taxonomy, and the figment-backed [`config::BookdripConfig`].

pub mod config;
pub mod error;
pub mod types;

pub use error::{CoreError, Result};
pub use types::{
    Book, DeliveryResult, DeliverySchedule, DeliveryTime, Frequency, ReadingProgress, Snippet,
    User,
};
