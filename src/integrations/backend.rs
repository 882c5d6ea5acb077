//! Studio backend gateway.
//!
//! One GraphQL endpoint covers most of what a turn needs: the client profile
//! bundle, the week's schedule, the dialog audit log and static reference
//! documents. Payment links go through the backend's REST side. All of it is
//! served by the same authenticated client.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::config::AgentConfig;
use crate::context::{ProfileBundle, ProfileService};
use crate::delivery::AuditLog;
use crate::tools::docs::DocumentSource;
use crate::tools::payment::PaymentLinkService;
use crate::tools::schedule::{ScheduleService, ScheduledEvent};

const PROFILE_QUERY: &str = r#"
query ClientByChatId($chatId: String!) {
    clientByChatId(chatId: $chatId) {
        userId
        triggers {
            payment
            firstTraining
            noActivity
            finishProgram
        }
        user {
            firstName
            lastName
            sex
            club {
                id
                name
            }
        }
        userProfile {
            goal
            fitnessLevel
            healthLimitations
            barriers
            motivation_type
            communication_style
            objections_mentioned
        }
        queries {
            id
            dialog {
                text
                sender
                created_at
                trainingData {
                    eventName
                    hasCheckedIn
                    heartRateData {
                        max_hr
                        average_hr
                        calories
                    }
                    eventRating {
                        ratingByEvent
                        ratingByTrainer
                        commentByEvent
                    }
                    totalWeight
                    trainingCount
                    totalCalories
                    avgRatingByEvent
                }
            }
        }
    }
}
"#;

const EVENTS_QUERY: &str = r#"
query EventsByDates($startTime: String!, $endTime: String!, $clubId: String!) {
    eventsByDates(startTime: $startTime, endTime: $endTime, clubId: $clubId) {
        id
        startTime
        status
        programSet {
            name
        }
    }
}
"#;

const LOG_MESSAGE_MUTATION: &str = r#"
mutation AddDialogMessage($queryId: String!, $chatId: String!, $userId: String!, $text: String!, $sender: String!) {
    addDialogMessage(queryId: $queryId, chatId: $chatId, userId: $userId, message: { text: $text, sender: $sender }) {
        id
    }
}
"#;

const DOCUMENT_QUERY: &str = r#"
query DocumentByTopic($topic: String!) {
    documentByTopic(topic: $topic) {
        content
    }
}
"#;

pub struct BackendGateway {
    client: reqwest::Client,
    api_url: String,
    token: Option<String>,
}

impl BackendGateway {
    pub fn new(config: &AgentConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.backend_timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            api_url: config.backend_api_url.clone(),
            token: config.backend_api_token.clone(),
        }
    }

    async fn graphql(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let mut req = self
            .client
            .post(&self.api_url)
            .json(&serde_json::json!({"query": query, "variables": variables}));

        if let Some(ref token) = self.token {
            req = req.header("Authorization", format!("Bearer {}", token));
        }

        let response = req.send().await.context("Backend request failed")?;
        if !response.status().is_success() {
            anyhow::bail!("Backend returned {}", response.status());
        }

        let body: serde_json::Value = response
            .json()
            .await
            .context("Failed to parse backend response")?;

        if let Some(errors) = body.get("errors") {
            anyhow::bail!("Backend GraphQL errors: {}", errors);
        }

        Ok(body.get("data").cloned().unwrap_or(serde_json::Value::Null))
    }
}

#[async_trait]
impl ProfileService for BackendGateway {
    async fn fetch(&self, sender_id: &str) -> Result<Option<ProfileBundle>> {
        let data = self
            .graphql(PROFILE_QUERY, serde_json::json!({"chatId": sender_id}))
            .await?;

        let bundle = &data["clientByChatId"];
        if bundle.is_null() {
            return Ok(None);
        }

        let bundle: ProfileBundle = serde_json::from_value(bundle.clone())
            .context("Malformed profile bundle from backend")?;
        Ok(Some(bundle))
    }
}

#[async_trait]
impl ScheduleService for BackendGateway {
    async fn events_between(
        &self,
        club_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ScheduledEvent>> {
        let data = self
            .graphql(
                EVENTS_QUERY,
                serde_json::json!({
                    "startTime": start.to_rfc3339(),
                    "endTime": end.to_rfc3339(),
                    "clubId": club_id,
                }),
            )
            .await?;

        Ok(parse_events(&data["eventsByDates"]))
    }
}

#[async_trait]
impl PaymentLinkService for BackendGateway {
    async fn create_link(
        &self,
        product: &str,
        club_id: &str,
        chat_id: &str,
        amount: u64,
    ) -> Result<Option<String>> {
        let url = format!("{}/payment/create-link", self.api_url);
        let mut req = self.client.post(&url).json(&serde_json::json!({
            "product": product,
            "clubId": club_id,
            "chatId": chat_id,
            "amount": amount,
        }));

        if let Some(ref token) = self.token {
            req = req.header("Authorization", format!("Bearer {}", token));
        }

        let response = req.send().await.context("Payment link request failed")?;
        if !response.status().is_success() {
            anyhow::bail!("Payment endpoint returned {}", response.status());
        }

        let body: serde_json::Value = response
            .json()
            .await
            .context("Failed to parse payment response")?;
        Ok(body["paymentUrl"].as_str().map(String::from))
    }
}

#[async_trait]
impl AuditLog for BackendGateway {
    async fn log_message(
        &self,
        query_id: &str,
        chat_id: &str,
        user_id: &str,
        text: &str,
        sender: &str,
    ) -> Result<()> {
        self.graphql(
            LOG_MESSAGE_MUTATION,
            serde_json::json!({
                "queryId": query_id,
                "chatId": chat_id,
                "userId": user_id,
                "text": text,
                "sender": sender,
            }),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentSource for BackendGateway {
    async fn fetch(&self, topic: &str) -> Result<String> {
        let data = self
            .graphql(DOCUMENT_QUERY, serde_json::json!({"topic": topic}))
            .await?;

        data["documentByTopic"]["content"]
            .as_str()
            .map(String::from)
            .with_context(|| format!("No document content for topic {}", topic))
    }
}

fn parse_events(value: &serde_json::Value) -> Vec<ScheduledEvent> {
    value
        .as_array()
        .map(|events| {
            events
                .iter()
                .filter_map(|event| {
                    let start_time = event["startTime"]
                        .as_str()?
                        .parse::<DateTime<Utc>>()
                        .ok()?;
                    Some(ScheduledEvent {
                        id: event["id"].as_str().unwrap_or_default().to_string(),
                        name: event["programSet"]["name"]
                            .as_str()
                            .unwrap_or_default()
                            .to_string(),
                        start_time,
                        status: event["status"].as_str().unwrap_or_default().to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}
