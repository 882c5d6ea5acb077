//! Outbound messaging over the Wazzup gateway.
//!
//! One endpoint serves both WhatsApp and Telegram chats; `source` selects the
//! chat type. Every send carries a `crmMessageId` so the gateway can drop a
//! duplicate if the same turn is retried.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;

use crate::config::AgentConfig;
use crate::delivery::MessagingChannel;

pub struct MessengerClient {
    client: reqwest::Client,
    api_url: String,
    token: Option<String>,
}

impl MessengerClient {
    pub fn new(config: &AgentConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            api_url: config.messaging_api_url.clone(),
            token: config.messaging_token.clone(),
        }
    }
}

fn dedup_key(millis: i64) -> String {
    format!("msg-{}", millis)
}

#[async_trait]
impl MessagingChannel for MessengerClient {
    async fn send(
        &self,
        chat_id: &str,
        channel_id: &str,
        text: &str,
        source: &str,
    ) -> Result<bool> {
        let url = format!("{}/message", self.api_url);
        let body = serde_json::json!({
            "channelId": channel_id,
            "chatType": source,
            "chatId": chat_id,
            "crmMessageId": dedup_key(Utc::now().timestamp_millis()),
            "text": text,
        });

        let mut req = self.client.post(&url).json(&body);
        if let Some(ref token) = self.token {
            req = req.header("Authorization", format!("Bearer {}", token));
        }

        let response = req.send().await.context("Messaging request failed")?;
        Ok(response.status().is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_key_format() {
        assert_eq!(dedup_key(1764576000123), "msg-1764576000123");
    }
}
