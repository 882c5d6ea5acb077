//! Knowledge-base vector search client.
//!
//! Talks to the search service that owns embedding and ranking; this side
//! only sends the query and maps the scored matches back. Relevance
//! filtering happens in the knowledge tool, not here.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::AgentConfig;
use crate::tools::knowledge::{KnowledgeSearch, Snippet};

const TOP_K: u32 = 5;

pub struct VectorSearchClient {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    namespace: String,
}

impl VectorSearchClient {
    pub fn new(config: &AgentConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            api_url: config.knowledge_api_url.clone(),
            api_key: config.knowledge_api_key.clone(),
            namespace: config.knowledge_namespace.clone(),
        }
    }
}

fn parse_matches(body: &serde_json::Value) -> Vec<Snippet> {
    body["matches"]
        .as_array()
        .map(|matches| {
            matches
                .iter()
                .map(|m| Snippet {
                    text: m["metadata"]["text"].as_str().unwrap_or_default().to_string(),
                    source: m["metadata"]["source"]
                        .as_str()
                        .unwrap_or_default()
                        .to_string(),
                    score: m["score"].as_f64().unwrap_or(0.0) as f32,
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl KnowledgeSearch for VectorSearchClient {
    async fn query(&self, text: &str) -> Result<Vec<Snippet>> {
        if self.api_url.is_empty() {
            anyhow::bail!("knowledge search endpoint is not configured");
        }

        let mut req = self.client.post(&self.api_url).json(&serde_json::json!({
            "query": text,
            "top_k": TOP_K,
            "namespace": self.namespace,
        }));

        if let Some(ref key) = self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let response = req.send().await.context("Knowledge search request failed")?;
        if !response.status().is_success() {
            anyhow::bail!("Knowledge search returned {}", response.status());
        }

        let body: serde_json::Value = response
            .json()
            .await
            .context("Failed to parse knowledge search response")?;
        Ok(parse_matches(&body))
    }
}
