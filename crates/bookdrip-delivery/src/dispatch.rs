//! Retrying message dispatch over an injected send capability.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

/// Transport failure reported by a [`MessageSink`].
#[derive(Debug, Error)]
#[error("Transport error: {0}")]
pub struct SinkError(pub String);

/// Narrow capability for delivering one message to one recipient.
///
/// Implementations must tolerate repeated calls for the same content —
/// duplicate sends are acceptable on retry. `Ok(false)` means the platform
/// declined the message without a transport error.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(&self, chat_id: i64, text: &str) -> Result<bool, SinkError>;
}

/// Exponential backoff parameters for [`send_with_retry`].
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub max_retries: u32,
    pub initial: Duration,
    pub multiplier: f64,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial: Duration::from_secs(1),
            multiplier: 2.0,
            max: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    /// Delay before the retry that follows failed attempt `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let secs = self.initial.as_secs_f64() * self.multiplier.powi(attempt as i32 - 1);
        Duration::from_secs_f64(secs.min(self.max.as_secs_f64()))
    }
}

/// Outcome of a retried send.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub delivered: bool,
    /// Attempts actually made (the succeeding attempt's index on success).
    pub attempts: u32,
    pub error: Option<String>,
}

/// Send `text` to `chat_id`, retrying with exponential backoff.
///
/// Makes up to `policy.max_retries` attempts, sleeping
/// `min(initial * multiplier^(attempt-1), max)` between failures. The sleep
/// races the shutdown channel: a stop signal — or the sender being dropped —
/// aborts the wait and returns a failed outcome without further attempts.
pub async fn send_with_retry(
    sink: &dyn MessageSink,
    chat_id: i64,
    text: &str,
    policy: &BackoffPolicy,
    shutdown: &mut watch::Receiver<bool>,
) -> SendOutcome {
    let mut last_error = String::new();

    for attempt in 1..=policy.max_retries {
        match sink.send(chat_id, text).await {
            Ok(true) => {
                info!(chat_id, attempt, "message sent");
                return SendOutcome {
                    delivered: true,
                    attempts: attempt,
                    error: None,
                };
            }
            Ok(false) => last_error = "sink declined the message".to_string(),
            Err(e) => last_error = e.to_string(),
        }

        if attempt < policy.max_retries {
            let delay = policy.delay(attempt);
            warn!(
                chat_id,
                attempt,
                max = policy.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %last_error,
                "send failed, backing off"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    // A dropped sender counts as shutdown, otherwise the
                    // remaining retries would fire with no delay at all.
                    if changed.is_err() || *shutdown.borrow() {
                        return SendOutcome {
                            delivered: false,
                            attempts: attempt,
                            error: Some("shutdown requested during backoff".to_string()),
                        };
                    }
                }
            }
        }
    }

    warn!(chat_id, max = policy.max_retries, error = %last_error, "all send attempts exhausted");
    SendOutcome {
        delivered: false,
        attempts: policy.max_retries,
        error: Some(last_error),
    }
}
