//! Static reference documents tool.
//!
//! One topic-parameterized tool replaces a family of near-identical
//! per-document tools. Documents live behind a gateway and change rarely, so
//! they go through a process-wide read-through cache that is safe to share
//! between concurrently processed threads.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{Tool, ToolContext, ToolOutput};

/// Known document topics and what the model should use them for.
pub const TOPICS: &[(&str, &str)] = &[
    ("general_info", "Общая информация о студии и форматах тренировок"),
    ("membership_info", "Абонементы, тарифы и условия членства"),
    ("workouts_descriptions", "Подробные описания типов тренировок"),
    ("workout_info", "Как проходит тренировка, что взять с собой"),
    ("app_functionality", "Инструкции по мобильному приложению"),
    ("social_features", "Рефералы, кланы, таблицы лидеров"),
    ("clan_battle_info", "Правила клановых битв"),
];

/// Where documents actually come from.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn fetch(&self, topic: &str) -> Result<String>;
}

/// Read-through cache over a `DocumentSource`.
///
/// A miss fetches and stores; concurrent readers never block each other on
/// hits. A racing double-fetch of the same topic is harmless.
pub struct DocumentCache {
    source: Arc<dyn DocumentSource>,
    cache: RwLock<HashMap<String, String>>,
}

impl DocumentCache {
    pub fn new(source: Arc<dyn DocumentSource>) -> Self {
        Self {
            source,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, topic: &str) -> Result<String> {
        if let Some(cached) = self.cache.read().await.get(topic) {
            return Ok(cached.clone());
        }

        let document = self.source.fetch(topic).await?;
        self.cache
            .write()
            .await
            .insert(topic.to_string(), document.clone());
        Ok(document)
    }
}

#[derive(Debug, Default, Deserialize)]
struct DocsParams {
    #[serde(default)]
    topic: String,
}

pub struct ReferenceDocsTool {
    cache: Arc<DocumentCache>,
}

impl ReferenceDocsTool {
    pub fn new(cache: Arc<DocumentCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl Tool for ReferenceDocsTool {
    fn name(&self) -> &str {
        "get_reference_doc"
    }

    fn description(&self) -> &str {
        "Справочные документы студии по темам: general_info (общая информация), \
         membership_info (абонементы и тарифы), workouts_descriptions (описания \
         тренировок), workout_info (как проходит тренировка), app_functionality \
         (мобильное приложение), social_features (рефералы, кланы, лидерборды), \
         clan_battle_info (клановые битвы)."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        let topics: Vec<&str> = TOPICS.iter().map(|(topic, _)| *topic).collect();
        serde_json::json!({
            "type": "object",
            "properties": {
                "topic": {
                    "type": "string",
                    "enum": topics,
                    "description": "Тема справочного документа"
                }
            },
            "required": ["topic"]
        })
    }

    async fn execute(&self, params: serde_json::Value, _ctx: &ToolContext) -> Result<ToolOutput> {
        let params: DocsParams = serde_json::from_value(params).unwrap_or_default();

        if !TOPICS.iter().any(|(topic, _)| *topic == params.topic) {
            let topics: Vec<&str> = TOPICS.iter().map(|(topic, _)| *topic).collect();
            return Ok(ToolOutput::Error(format!(
                "Неизвестная тема '{}'. Доступные: {}",
                params.topic,
                topics.join(", ")
            )));
        }

        match self.cache.get(&params.topic).await {
            Ok(document) => Ok(ToolOutput::Text(document)),
            Err(e) => {
                tracing::warn!("Reference doc fetch failed for {}: {}", params.topic, e);
                Ok(ToolOutput::Text(format!(
                    "Документ временно недоступен: {}",
                    e
                )))
            }
        }
    }
}
