//! Telegram transport for bookdrip deliveries.

pub mod sink;

pub use sink::TelegramSink;
