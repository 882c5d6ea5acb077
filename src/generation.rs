//! Bounded tool-calling generation loop.
//!
//! The model gets at most `max_iterations` chat calls per turn. On every
//! round except the last, requested tool calls are executed and their results
//! appended to the transcript. On the last round tools are never executed:
//! whatever text the model produced is the answer, even if it also asked for
//! more tools. The loop itself never invents an answer; a model transport
//! error is the only way it fails.

use anyhow::Result;
use std::sync::Arc;

use crate::llm::{ChatMessage, ChatModel};
use crate::tools::{ToolCall, ToolContext, ToolRegistry};

/// Structured reply the model is prompted to emit.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentReply {
    pub response: String,
    pub escalation_needed: bool,
    pub escalation_reason: String,
}

/// What one turn through the loop produced.
#[derive(Debug)]
pub struct LoopOutcome {
    pub reply: AgentReply,
    /// Assistant and tool messages appended past the seed, in order.
    pub messages: Vec<ChatMessage>,
    /// Chat rounds actually spent.
    pub iterations: u32,
    /// True when the model still wanted tools on the last round.
    pub hit_budget: bool,
}

pub struct GenerationLoop {
    model: Arc<dyn ChatModel>,
    registry: Arc<ToolRegistry>,
    max_iterations: u32,
}

impl GenerationLoop {
    pub fn new(model: Arc<dyn ChatModel>, registry: Arc<ToolRegistry>, max_iterations: u32) -> Self {
        Self {
            model,
            registry,
            max_iterations: max_iterations.max(1),
        }
    }

    /// Run the loop over a seeded transcript (system + user messages).
    pub async fn run(&self, mut messages: Vec<ChatMessage>, ctx: &ToolContext) -> Result<LoopOutcome> {
        let tool_defs = self.registry.tool_definitions().await;
        let seed_len = messages.len();
        let mut last_text = String::new();
        let mut hit_budget = false;
        let mut iterations = 0;

        for iteration in 1..=self.max_iterations {
            iterations = iteration;
            let reply = self.model.chat(&messages, &tool_defs).await?;

            if !reply.text().is_empty() {
                last_text = reply.text().to_string();
            }

            let calls: Vec<ToolCall> = reply
                .tool_calls
                .as_deref()
                .unwrap_or_default()
                .iter()
                .map(|tc| ToolCall {
                    id: tc.id.clone(),
                    name: tc.function.name.clone(),
                    arguments: serde_json::from_str(&tc.function.arguments)
                        .unwrap_or_else(|_| serde_json::json!({})),
                })
                .collect();

            messages.push(reply);

            if calls.is_empty() {
                break;
            }

            if iteration == self.max_iterations {
                // Budget exhausted: answer with what we have, run nothing.
                tracing::warn!(
                    thread_id = %ctx.thread_id,
                    "Tool budget exhausted after {} iterations",
                    iteration
                );
                hit_budget = true;
                break;
            }

            for call in &calls {
                tracing::debug!(
                    thread_id = %ctx.thread_id,
                    tool = %call.name,
                    "Executing tool call"
                );
                let result = self.registry.execute_call(call, ctx).await;
                messages.push(ChatMessage::tool(
                    result.call_id.clone(),
                    result.output.to_llm_string(),
                ));
            }
        }

        Ok(LoopOutcome {
            reply: extract_reply(&last_text),
            messages: messages.split_off(seed_len),
            iterations,
            hit_budget,
        })
    }
}

/// Best-effort extraction of the structured reply from model text.
///
/// Accepts raw JSON, JSON inside markdown fences, JSON preceded by reasoning
/// tags, or JSON embedded in prose. Anything unparseable degrades to the raw
/// text with no escalation.
pub fn extract_reply(text: &str) -> AgentReply {
    let cleaned = strip_reasoning(text);

    if let Some(value) = find_json_object(&cleaned) {
        if let Some(reply) = reply_from_value(&value) {
            return reply;
        }
    }

    AgentReply {
        response: cleaned.trim().to_string(),
        escalation_needed: false,
        escalation_reason: String::new(),
    }
}

/// Drop `<think>`/`<thinking>` blocks some models prepend.
fn strip_reasoning(text: &str) -> String {
    let mut out = text.to_string();
    for tag in ["think", "thinking"] {
        let open = format!("<{}>", tag);
        let close = format!("</{}>", tag);
        while let Some(start) = out.find(&open) {
            match out[start..].find(&close) {
                Some(rel_end) => {
                    out.replace_range(start..start + rel_end + close.len(), "");
                }
                None => {
                    out.truncate(start);
                    break;
                }
            }
        }
    }
    out
}

/// Find the first balanced JSON object in the text, preferring the content of
/// a ```json fence when present.
fn find_json_object(text: &str) -> Option<serde_json::Value> {
    let candidate = fenced_block(text).unwrap_or(text);

    let start = candidate.find('{')?;
    let bytes = candidate.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return serde_json::from_str(&candidate[start..=i]).ok();
                }
            }
            _ => {}
        }
    }
    None
}

fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```json").map(|i| i + "```json".len()).or_else(|| {
        text.find("```").map(|i| i + "```".len())
    })?;
    let end = text[start..].find("```")?;
    Some(&text[start..start + end])
}

fn reply_from_value(value: &serde_json::Value) -> Option<AgentReply> {
    let response = value
        .get("response")
        .or_else(|| value.get("response_text"))
        .and_then(|v| v.as_str())?;

    let escalation = value.get("escalation");
    let needed = escalation
        .and_then(|e| e.get("needed"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let reason = escalation
        .and_then(|e| e.get("reason"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    Some(AgentReply {
        response: response.to_string(),
        escalation_needed: needed,
        escalation_reason: reason,
    })
}
