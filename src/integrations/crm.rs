//! AmoCRM lead-status updates.
//!
//! An escalation moves the client's lead to the "human needed" pipeline
//! status. Leads are looked up by chat id within the studio pipeline; a
//! client without a lead gets one created in the target status.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::AgentConfig;
use crate::escalation::{CrmGateway, LeadStatus};

pub struct CrmClient {
    client: reqwest::Client,
    domain: String,
    token: Option<String>,
    pipeline_id: u64,
    status_initial: u64,
    status_human: u64,
    chat_field_id: u64,
}

impl CrmClient {
    pub fn new(config: &AgentConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            domain: config.crm_domain.clone(),
            token: config.crm_token.clone(),
            pipeline_id: config.crm_pipeline_id,
            status_initial: config.crm_status_initial,
            status_human: config.crm_status_human,
            chat_field_id: config.crm_chat_field_id,
        }
    }

    fn status_id(&self, status: LeadStatus) -> u64 {
        match status {
            LeadStatus::Initial => self.status_initial,
            LeadStatus::HumanNeeded => self.status_human,
        }
    }

    async fn find_lead(&self, token: &str, chat_id: &str) -> Result<Option<u64>> {
        let url = format!("https://{}/api/v4/leads", self.domain);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("query", chat_id),
                ("filter[pipeline_id]", &self.pipeline_id.to_string()),
            ])
            .header("Authorization", format!("Bearer {}", token))
            .send()
            .await
            .context("CRM lead search failed")?;

        if !response.status().is_success() {
            anyhow::bail!("CRM search returned {}", response.status());
        }

        let body: serde_json::Value = response
            .json()
            .await
            .context("Failed to parse CRM search response")?;
        Ok(first_lead_id(&body))
    }
}

fn first_lead_id(body: &serde_json::Value) -> Option<u64> {
    body["_embedded"]["leads"]
        .as_array()
        .and_then(|leads| leads.first())
        .and_then(|lead| lead["id"].as_u64())
}

fn create_lead_payload(
    chat_id: &str,
    pipeline_id: u64,
    status_id: u64,
    chat_field_id: u64,
) -> serde_json::Value {
    serde_json::json!([{
        "name": format!("Lead {}", chat_id),
        "pipeline_id": pipeline_id,
        "status_id": status_id,
        "custom_fields_values": [{
            "field_id": chat_field_id,
            "values": [{"value": chat_id}]
        }]
    }])
}

#[async_trait]
impl CrmGateway for CrmClient {
    async fn update_lead_status(&self, user_id: &str, status: LeadStatus) -> Result<bool> {
        let token = match self.token.as_deref() {
            Some(token) => token,
            None => {
                tracing::warn!("CRM token not configured, status update dropped");
                return Ok(false);
            }
        };

        let status_id = self.status_id(status);

        if let Some(lead_id) = self.find_lead(token, user_id).await? {
            let url = format!("https://{}/api/v4/leads/{}", self.domain, lead_id);
            let response = self
                .client
                .patch(&url)
                .header("Authorization", format!("Bearer {}", token))
                .json(&serde_json::json!({"status_id": status_id}))
                .send()
                .await
                .context("CRM lead update failed")?;
            return Ok(response.status().is_success());
        }

        let url = format!("https://{}/api/v4/leads", self.domain);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", token))
            .json(&create_lead_payload(
                user_id,
                self.pipeline_id,
                status_id,
                self.chat_field_id,
            ))
            .send()
            .await
            .context("CRM lead creation failed")?;
        Ok(response.status().is_success())
    }
}
