//! Telegram implementation of the delivery engine's message sink.
//!
//! Tries MarkdownV2 first; falls back to plain text if Telegram rejects the
//! parse mode. Transport errors bubble up so the engine's retry policy can
//! decide what to do.

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use tracing::warn;

use bookdrip_delivery::{MessageSink, SinkError};

/// Sends formatted snippet messages through a Telegram bot.
pub struct TelegramSink {
    bot: Bot,
}

impl TelegramSink {
    pub fn new(token: &str) -> Self {
        Self {
            bot: Bot::new(token),
        }
    }

    pub fn from_bot(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl MessageSink for TelegramSink {
    async fn send(&self, chat_id: i64, text: &str) -> Result<bool, SinkError> {
        let chat = ChatId(chat_id);
        let sent = self
            .bot
            .send_message(chat, text)
            .parse_mode(ParseMode::MarkdownV2)
            .await;

        match sent {
            Ok(_) => Ok(true),
            Err(e) => {
                // MarkdownV2 rejected or transport hiccup — try plain text
                // before reporting failure.
                warn!(chat_id, error = %e, "MarkdownV2 send failed, retrying as plain text");
                self.bot
                    .send_message(chat, text)
                    .await
                    .map(|_| true)
                    .map_err(|e| SinkError(e.to_string()))
            }
        }
    }
}
