//! Escalation tracking board (Notion database).
//!
//! Each escalation becomes one page: routing fields as properties, the last
//! exchange as page content so managers see it without opening the chat.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::AgentConfig;
use crate::escalation::{EscalationRecord, EscalationTracker};

const API_URL: &str = "https://api.notion.com/v1/pages";
const API_VERSION: &str = "2022-06-28";

pub struct TrackerClient {
    client: reqwest::Client,
    token: Option<String>,
    database_id: String,
}

impl TrackerClient {
    pub fn new(config: &AgentConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            token: config.tracker_token.clone(),
            database_id: config.tracker_database_id.clone(),
        }
    }
}

fn page_payload(database_id: &str, record: &EscalationRecord) -> serde_json::Value {
    fn rich_text(content: &str) -> serde_json::Value {
        serde_json::json!({"rich_text": [{"text": {"content": content}}]})
    }

    fn paragraph(content: &str) -> serde_json::Value {
        serde_json::json!({
            "object": "block",
            "type": "paragraph",
            "paragraph": {"rich_text": [{"text": {"content": content}}]}
        })
    }

    fn heading(content: &str) -> serde_json::Value {
        serde_json::json!({
            "object": "block",
            "type": "heading_2",
            "heading_2": {"rich_text": [{"text": {"content": content}}]}
        })
    }

    serde_json::json!({
        "parent": {"database_id": database_id},
        "properties": {
            "Name": {
                "title": [{"text": {"content": format!(
                    "Escalation: {} ({})", record.client_name, record.thread_id
                )}}]
            },
            "Chat ID": rich_text(&record.thread_id),
            "Reason": rich_text(&record.reason),
            "Club": rich_text(&record.club_name),
            "Status": {"select": {"name": "New"}},
            "Created": {"date": {"start": record.created_at.to_rfc3339()}},
        },
        "children": [
            heading("Last User Message"),
            paragraph(&record.last_user_message),
            heading("AI Response"),
            paragraph(&record.last_assistant_answer),
        ]
    })
}

#[async_trait]
impl EscalationTracker for TrackerClient {
    async fn create_record(&self, record: &EscalationRecord) -> Result<bool> {
        let token = match self.token.as_deref() {
            Some(token) => token,
            None => {
                tracing::warn!("Tracker token not configured, escalation record dropped");
                return Ok(false);
            }
        };

        let response = self
            .client
            .post(API_URL)
            .header("Authorization", format!("Bearer {}", token))
            .header("Notion-Version", API_VERSION)
            .json(&page_payload(&self.database_id, record))
            .send()
            .await
            .context("Tracker request failed")?;
        Ok(response.status().is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record() -> EscalationRecord {
        EscalationRecord {
            thread_id: "77001234567".to_string(),
            reason: "acute pain reported".to_string(),
            client_name: "Айгерим С.".to_string(),
            club_name: "Colibri".to_string(),
            last_user_message: "Острая боль в колене".to_string(),
            last_assistant_answer: "Передаю менеджеру".to_string(),
            created_at: Utc.with_ymd_and_hms(2026, 8, 1, 10, 0, 0).unwrap(),
        }
    }

    #[test]
    fn payload_carries_routing_properties() {
        let payload = page_payload("db-1", &record());

        assert_eq!(payload["parent"]["database_id"], "db-1");
        assert_eq!(
            payload["properties"]["Name"]["title"][0]["text"]["content"],
            "Escalation: Айгерим С. (77001234567)"
        );
        assert_eq!(
            payload["properties"]["Reason"]["rich_text"][0]["text"]["content"],
            "acute pain reported"
        );
        assert_eq!(payload["properties"]["Status"]["select"]["name"], "New");
        assert_eq!(
            payload["children"][1]["paragraph"]["rich_text"][0]["text"]["content"],
            "Острая боль в колене"
        );
    }

    #[tokio::test]
    async fn missing_token_drops_record() {
        let tracker = TrackerClient::new(&AgentConfig::default());
        assert!(!tracker.create_record(&record()).await.unwrap());
    }
}
