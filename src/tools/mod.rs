//! Tool system for the generation loop.
//!
//! Each tool declares a JSON Schema for its parameters, enabling LLM
//! function-calling. Tools are registered in a thread-safe `ToolRegistry`
//! that generates OpenAI-format function definitions and executes calls with
//! two guarantees: an unknown tool name becomes a failed result (the loop
//! keeps going), and an execution error is caught and fed back to the model
//! as text instead of failing the turn.

pub mod docs;
pub mod knowledge;
pub mod payment;
pub mod schedule;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// The result of executing a tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ToolOutput {
    /// Successful text output
    Text(String),
    /// Successful structured output
    Json(serde_json::Value),
    /// Tool execution failed
    Error(String),
}

impl ToolOutput {
    /// Convert to a string representation suitable for feeding back to the LLM
    pub fn to_llm_string(&self) -> String {
        match self {
            ToolOutput::Text(s) => s.clone(),
            ToolOutput::Json(v) => {
                serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string())
            }
            ToolOutput::Error(e) => format!("[ERROR] {}", e),
        }
    }

    /// Returns true if this output represents success (Text or Json)
    pub fn is_success(&self) -> bool {
        matches!(self, ToolOutput::Text(_) | ToolOutput::Json(_))
    }
}

/// Context passed to tools during execution
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Conversation thread id
    pub thread_id: String,
    /// The client's chat id (phone number for WhatsApp)
    pub chat_id: String,
    /// The client's home club, when known
    pub club_id: Option<String>,
}

/// A tool provides the agent with one callable capability.
///
/// Each tool declares its parameters as a JSON Schema, enabling LLM
/// function-calling.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name used in function-calling (e.g., "get_payment_link")
    fn name(&self) -> &str;

    /// Description shown to the LLM
    fn description(&self) -> &str;

    /// JSON Schema describing the tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given parameters.
    async fn execute(&self, params: serde_json::Value, ctx: &ToolContext) -> Result<ToolOutput>;
}

/// OpenAI-format function definition for LLM function-calling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// OpenAI-format tool definition (wraps FunctionDef)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDef,
}

/// A tool call requested by the model, with its correlation id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Result of a tool call, ready to feed back to the LLM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub call_id: String,
    pub name: String,
    pub output: ToolOutput,
}

impl ToolCallResult {
    pub fn is_success(&self) -> bool {
        self.output.is_success()
    }
}

/// Thread-safe registry of tools available to the agent.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
    /// Cap on tool output fed back into the transcript.
    output_max_chars: usize,
}

impl ToolRegistry {
    pub fn new(output_max_chars: usize) -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            output_max_chars,
        }
    }

    /// Register a tool. Overwrites any existing tool with the same name.
    pub async fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        tracing::info!("Registered tool: {}", name);
        self.tools.write().await.insert(name, tool);
    }

    /// Get a tool by name.
    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().await.get(name).cloned()
    }

    /// List all registered tool names.
    pub async fn list_names(&self) -> Vec<String> {
        self.tools.read().await.keys().cloned().collect()
    }

    /// Generate OpenAI-format tool definitions for all registered tools.
    ///
    /// This output can be passed directly to the `tools` parameter
    /// of an OpenAI-compatible chat completions request.
    pub async fn tool_definitions(&self) -> Vec<ToolDef> {
        let tools = self.tools.read().await;
        tools
            .values()
            .map(|tool| ToolDef {
                tool_type: "function".to_string(),
                function: FunctionDef {
                    name: tool.name().to_string(),
                    description: tool.description().to_string(),
                    parameters: tool.parameters_schema(),
                },
            })
            .collect()
    }

    /// Execute a tool call. Never errors: unknown names and caught execution
    /// failures come back as `ToolOutput::Error` so the loop can continue.
    pub async fn execute_call(&self, call: &ToolCall, ctx: &ToolContext) -> ToolCallResult {
        let tool = match self.get(&call.name).await {
            Some(t) => t,
            None => {
                return ToolCallResult {
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    output: ToolOutput::Error(format!("Unknown tool: {}", call.name)),
                };
            }
        };

        let output = match tool.execute(call.arguments.clone(), ctx).await {
            Ok(output) => self.truncate_output(output),
            Err(e) => ToolOutput::Error(format!("Tool execution failed: {}", e)),
        };

        ToolCallResult {
            call_id: call.id.clone(),
            name: call.name.clone(),
            output,
        }
    }

    /// Bound successful output so a verbose tool cannot blow up the
    /// model context. Failures are short already.
    fn truncate_output(&self, output: ToolOutput) -> ToolOutput {
        match output {
            ToolOutput::Text(text) => ToolOutput::Text(truncate_chars(
                &text,
                self.output_max_chars,
                "… [вывод сокращён]",
            )),
            ToolOutput::Json(value) => {
                let rendered =
                    serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
                if rendered.chars().count() > self.output_max_chars {
                    ToolOutput::Text(truncate_chars(
                        &rendered,
                        self.output_max_chars,
                        "… [вывод сокращён]",
                    ))
                } else {
                    ToolOutput::Json(value)
                }
            }
            other => other,
        }
    }
}

/// Truncate on a char boundary and append a marker. Char-based because the
/// payloads are mostly Russian text.
pub(crate) fn truncate_chars(text: &str, max_chars: usize, marker: &str) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max_chars).collect();
    truncated.push_str(marker);
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes back the input message"
        }

        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "message": {
                        "type": "string",
                        "description": "The message to echo"
                    }
                },
                "required": ["message"]
            })
        }

        async fn execute(
            &self,
            params: serde_json::Value,
            _ctx: &ToolContext,
        ) -> Result<ToolOutput> {
            let message = params["message"].as_str().unwrap_or("(no message)");
            Ok(ToolOutput::Text(message.to_string()))
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "failing"
        }

        fn description(&self) -> &str {
            "Always fails"
        }

        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {}})
        }

        async fn execute(
            &self,
            _params: serde_json::Value,
            _ctx: &ToolContext,
        ) -> Result<ToolOutput> {
            anyhow::bail!("backend unavailable")
        }
    }

    fn test_ctx() -> ToolContext {
        ToolContext {
            thread_id: "77001234567".to_string(),
            chat_id: "77001234567".to_string(),
            club_id: None,
        }
    }

    fn call(name: &str, arguments: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "call_1".to_string(),
            name: name.to_string(),
            arguments,
        }
    }

    #[tokio::test]
    async fn register_and_get() {
        let registry = ToolRegistry::new(6000);
        registry.register(Arc::new(EchoTool)).await;

        assert!(registry.get("echo").await.is_some());
        assert!(registry.get("nonexistent").await.is_none());
    }

    #[tokio::test]
    async fn tool_definitions_format() {
        let registry = ToolRegistry::new(6000);
        registry.register(Arc::new(EchoTool)).await;

        let defs = registry.tool_definitions().await;
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].tool_type, "function");
        assert_eq!(defs[0].function.name, "echo");

        let json = serde_json::to_string(&defs).unwrap();
        assert!(json.contains("echo"));
    }

    #[tokio::test]
    async fn execute_echo_tool() {
        let registry = ToolRegistry::new(6000);
        registry.register(Arc::new(EchoTool)).await;

        let result = registry
            .execute_call(&call("echo", serde_json::json!({"message": "hello"})), &test_ctx())
            .await;
        assert_eq!(result.call_id, "call_1");
        assert!(result.is_success());
        assert_eq!(result.output.to_llm_string(), "hello");
    }

    #[tokio::test]
    async fn unknown_tool_returns_error_result() {
        let registry = ToolRegistry::new(6000);

        let result = registry
            .execute_call(&call("nonexistent", serde_json::json!({})), &test_ctx())
            .await;
        assert!(!result.is_success());
        assert!(result.output.to_llm_string().contains("Unknown tool"));
    }

    #[tokio::test]
    async fn execution_error_is_caught() {
        let registry = ToolRegistry::new(6000);
        registry.register(Arc::new(FailingTool)).await;

        let result = registry
            .execute_call(&call("failing", serde_json::json!({})), &test_ctx())
            .await;
        assert!(!result.is_success());
        let text = result.output.to_llm_string();
        assert!(text.contains("Tool execution failed"));
        assert!(text.contains("backend unavailable"));
    }

    #[tokio::test]
    async fn long_output_is_truncated() {
        let registry = ToolRegistry::new(10);
        registry.register(Arc::new(EchoTool)).await;

        let result = registry
            .execute_call(
                &call("echo", serde_json::json!({"message": "a".repeat(100)})),
                &test_ctx(),
            )
            .await;
        let text = result.output.to_llm_string();
        assert!(text.starts_with("aaaaaaaaaa"));
        assert!(text.ends_with("[вывод сокращён]"));
        assert!(text.chars().count() < 100);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let text = "привет мир";
        let truncated = truncate_chars(text, 6, "…");
        assert_eq!(truncated, "привет…");

        assert_eq!(truncate_chars("short", 10, "…"), "short");
    }
}
