//! Telegram Bot API notifier for manager escalations.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::AgentConfig;
use crate::escalation::HumanNotifier;
use crate::tools::truncate_chars;

/// Telegram rejects messages longer than this.
const MAX_MESSAGE_CHARS: usize = 4096;

pub struct TelegramNotifier {
    client: reqwest::Client,
    token: Option<String>,
}

impl TelegramNotifier {
    pub fn new(config: &AgentConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            token: config.telegram_bot_token.clone(),
        }
    }
}

#[async_trait]
impl HumanNotifier for TelegramNotifier {
    async fn notify(&self, chat_id: i64, text: &str) -> Result<bool> {
        let token = match self.token.as_deref() {
            Some(token) => token,
            None => {
                tracing::warn!("Telegram bot token not configured, notification dropped");
                return Ok(false);
            }
        };

        let url = format!("https://api.telegram.org/bot{}/sendMessage", token);
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": truncate_chars(text, MAX_MESSAGE_CHARS - 1, "…"),
            "parse_mode": "HTML",
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("Telegram request failed")?;
        Ok(response.status().is_success())
    }
}
