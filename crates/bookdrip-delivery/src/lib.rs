//! `bookdrip-delivery` — the scheduling and dispatch engine.
//!
//! # Overview
//!
//! A [`runner::DeliveryService`] polls the store for due schedules and, for
//! each one in `next_delivery_at` order, resolves user/book/progress, formats
//! the next snippet into Telegram-sized chunks, dispatches them through a
//! retrying [`dispatch::MessageSink`], advances progress, and recomputes the
//! schedule's next instant in the user's timezone.
//!
//! # Frequencies
//!
//! | Variant       | Behaviour                                    |
//! |---------------|----------------------------------------------|
//! | `daily`       | Fire at HH:MM local time every day           |
//! | `twice_daily` | Fire at HH:MM and twelve hours later         |
//! | `weekly`      | Fire at HH:MM local time every seven days    |

pub mod control;
pub mod dispatch;
pub mod error;
pub mod format;
pub mod runner;
pub mod schedule;

pub use control::ScheduleManager;
pub use dispatch::{send_with_retry, BackoffPolicy, MessageSink, SendOutcome, SinkError};
pub use error::{DeliveryError, Result};
pub use runner::{DeliveryRunner, DeliveryService, RunnerConfig};
pub use schedule::{next_delivery, parse_timezone};
