//! Knowledge-base search tool.
//!
//! Wraps a vector-search collaborator and filters the matches by relevance
//! before showing them to the model. Transport failures come back as text so
//! the loop keeps going.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use super::{Tool, ToolContext, ToolOutput};

/// Matches below this score are considered noise.
pub const RELEVANCE_THRESHOLD: f32 = 0.7;

/// One ranked snippet from the knowledge base.
#[derive(Debug, Clone)]
pub struct Snippet {
    pub text: String,
    pub source: String,
    pub score: f32,
}

/// Vector-search seam. The ranking itself lives on the other side.
#[async_trait]
pub trait KnowledgeSearch: Send + Sync {
    async fn query(&self, text: &str) -> Result<Vec<Snippet>>;
}

#[derive(Debug, Deserialize)]
struct KnowledgeParams {
    query: String,
}

pub struct KnowledgeTool {
    index: Arc<dyn KnowledgeSearch>,
}

impl KnowledgeTool {
    pub fn new(index: Arc<dyn KnowledgeSearch>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl Tool for KnowledgeTool {
    fn name(&self) -> &str {
        "search_knowledge_base"
    }

    fn description(&self) -> &str {
        "База знаний студии: цены и условия абонементов, программы тренировок, \
         правила, готовые скрипты отработки возражений. Ищи ПЕРЕД каждым ответом \
         о ценах и продуктах; при возражении клиента (дорого, подумаю, нет времени) \
         ищи готовый скрипт и адаптируй его под контекст диалога."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Поисковый запрос на русском языке"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: serde_json::Value, _ctx: &ToolContext) -> Result<ToolOutput> {
        let params: KnowledgeParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(_) => {
                return Ok(ToolOutput::Error(
                    "Параметр query обязателен".to_string(),
                ));
            }
        };

        let snippets = match self.index.query(&params.query).await {
            Ok(snippets) => snippets,
            Err(e) => {
                tracing::warn!("Knowledge search failed: {}", e);
                return Ok(ToolOutput::Text(format!(
                    "Ошибка поиска в базе знаний: {}",
                    e
                )));
            }
        };

        if snippets.is_empty() {
            return Ok(ToolOutput::Text(
                "Информация не найдена в базе знаний. Попробуйте другой запрос.".to_string(),
            ));
        }

        Ok(ToolOutput::Text(render_snippets(&snippets)))
    }
}

fn render_snippets(snippets: &[Snippet]) -> String {
    let docs: Vec<String> = snippets
        .iter()
        .filter(|s| s.score > RELEVANCE_THRESHOLD)
        .map(|s| format!("[Релевантность: {:.0}%]\n{}", s.score * 100.0, s.text))
        .collect();

    if docs.is_empty() {
        return "Релевантных документов не найдено. Попробуйте уточнить запрос.".to_string();
    }

    docs.join("\n\n---\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubIndex {
        result: Result<Vec<Snippet>, String>,
    }

    #[async_trait]
    impl KnowledgeSearch for StubIndex {
        async fn query(&self, _text: &str) -> Result<Vec<Snippet>> {
            match &self.result {
                Ok(snippets) => Ok(snippets.clone()),
                Err(e) => anyhow::bail!("{}", e),
            }
        }
    }

    fn snippet(text: &str, score: f32) -> Snippet {
        Snippet {
            text: text.to_string(),
            source: "faq".to_string(),
            score,
        }
    }

    fn ctx() -> ToolContext {
        ToolContext {
            thread_id: "t".to_string(),
            chat_id: "c".to_string(),
            club_id: None,
        }
    }

    #[tokio::test]
    async fn low_relevance_matches_are_filtered() {
        let tool = KnowledgeTool::new(Arc::new(StubIndex {
            result: Ok(vec![
                snippet("Hero's Pass стоит 349 990 ₸", 0.91),
                snippet("нерелевантный текст", 0.42),
            ]),
        }));

        let output = tool
            .execute(serde_json::json!({"query": "цена"}), &ctx())
            .await
            .unwrap();
        let text = output.to_llm_string();
        assert!(text.contains("Релевантность: 91%"));
        assert!(text.contains("349 990"));
        assert!(!text.contains("нерелевантный"));
    }

    #[tokio::test]
    async fn all_matches_below_threshold() {
        let tool = KnowledgeTool::new(Arc::new(StubIndex {
            result: Ok(vec![snippet("шум", 0.3)]),
        }));

        let output = tool
            .execute(serde_json::json!({"query": "цена"}), &ctx())
            .await
            .unwrap();
        assert!(output
            .to_llm_string()
            .contains("Релевантных документов не найдено"));
    }

    #[tokio::test]
    async fn empty_result_reports_not_found() {
        let tool = KnowledgeTool::new(Arc::new(StubIndex { result: Ok(vec![]) }));

        let output = tool
            .execute(serde_json::json!({"query": "цена"}), &ctx())
            .await
            .unwrap();
        assert!(output.to_llm_string().contains("Информация не найдена"));
    }

    #[tokio::test]
    async fn transport_error_becomes_text() {
        let tool = KnowledgeTool::new(Arc::new(StubIndex {
            result: Err("timeout".to_string()),
        }));

        let output = tool
            .execute(serde_json::json!({"query": "цена"}), &ctx())
            .await
            .unwrap();
        let text = output.to_llm_string();
        assert!(text.contains("Ошибка поиска в базе знаний"));
        assert!(text.contains("timeout"));
    }
}
