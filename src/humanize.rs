//! Response post-processor.
//!
//! Takes the agent's raw answer and rewrites it on the cheaper model into
//! something a human consultant would actually send: short, warm, matching
//! the time of day. Strictly best-effort: any failure falls back to the raw
//! answer so the client always gets a reply.

use chrono::{DateTime, Duration, Timelike, Utc};
use std::sync::Arc;

use crate::llm::ChatModel;
use crate::tools::schedule::LOCAL_UTC_OFFSET_HOURS;
use crate::tools::truncate_chars;

pub struct Humanizer {
    model: Arc<dyn ChatModel>,
    max_chars: usize,
}

impl Humanizer {
    pub fn new(model: Arc<dyn ChatModel>, max_chars: usize) -> Self {
        Self { model, max_chars }
    }

    /// Polish `raw` for sending. Never fails: errors and empty rewrites fall
    /// back to the input, and the result is capped at `max_chars`.
    pub async fn polish(&self, raw: &str, now: DateTime<Utc>) -> String {
        if raw.trim().is_empty() {
            return String::new();
        }

        let prompt = rewrite_prompt(raw, now);
        let polished = match self.model.complete(&prompt).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                tracing::warn!("Humanizer returned empty text, keeping raw answer");
                raw.to_string()
            }
            Err(e) => {
                tracing::warn!("Humanizer failed, keeping raw answer: {}", e);
                raw.to_string()
            }
        };

        // Ellipsis counts against the cap
        truncate_chars(&polished, self.max_chars.saturating_sub(1), "…")
    }
}

/// Time-of-day register for the rewrite, in Almaty local time.
fn tone_hint(now: DateTime<Utc>) -> &'static str {
    let hour = (now + Duration::hours(LOCAL_UTC_OFFSET_HOURS)).hour();
    match hour {
        6..=10 => "утро - энергичный тон",
        11..=16 => "день - деловой тон",
        17..=22 => "вечер - спокойный тон",
        _ => "ночь - лаконичный тон",
    }
}

fn rewrite_prompt(raw: &str, now: DateTime<Utc>) -> String {
    format!(
        "Перепиши сообщение фитнес-консультанта так, как написал бы живой человек в мессенджере.\n\n\
         Правила:\n\
         - Сохрани смысл, факты, цифры и ссылки без изменений\n\
         - Убери канцелярит и шаблонные фразы\n\
         - 1-3 коротких предложения, максимум один список\n\
         - Максимум 1 эмодзи\n\
         - Обращение на «Вы»\n\
         - Время суток: {}\n\n\
         Сообщение:\n{}\n\n\
         Верни только переписанный текст, без пояснений.",
        tone_hint(now),
        raw
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatMessage, ChatModel};
    use crate::tools::ToolDef;
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::TimeZone;

    struct StubModel {
        reply: Result<String, String>,
    }

    #[async_trait]
    impl ChatModel for StubModel {
        async fn chat(&self, _messages: &[ChatMessage], _tools: &[ToolDef]) -> Result<ChatMessage> {
            unreachable!("humanizer never uses chat")
        }

        async fn complete(&self, _prompt: &str) -> Result<String> {
            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err(e) => anyhow::bail!("{}", e),
            }
        }
    }

    fn at_utc(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn tone_follows_local_hour() {
        // 03:00 UTC == 08:00 Almaty
        assert_eq!(tone_hint(at_utc(3)), "утро - энергичный тон");
        // 09:00 UTC == 14:00 Almaty
        assert_eq!(tone_hint(at_utc(9)), "день - деловой тон");
        // 15:00 UTC == 20:00 Almaty
        assert_eq!(tone_hint(at_utc(15)), "вечер - спокойный тон");
        // 22:00 UTC == 03:00 Almaty
        assert_eq!(tone_hint(at_utc(22)), "ночь - лаконичный тон");
    }

    #[tokio::test]
    async fn polished_text_is_used() {
        let humanizer = Humanizer::new(
            Arc::new(StubModel {
                reply: Ok("  Отличная работа! Записать вас на завтра? 💪  ".to_string()),
            }),
            600,
        );

        let out = humanizer.polish("сырой ответ", at_utc(9)).await;
        assert_eq!(out, "Отличная работа! Записать вас на завтра? 💪");
    }

    #[tokio::test]
    async fn model_error_falls_back_to_raw() {
        let humanizer = Humanizer::new(
            Arc::new(StubModel {
                reply: Err("timeout".to_string()),
            }),
            600,
        );

        let out = humanizer.polish("Исходный ответ", at_utc(9)).await;
        assert_eq!(out, "Исходный ответ");
    }

    #[tokio::test]
    async fn empty_rewrite_falls_back_to_raw() {
        let humanizer = Humanizer::new(
            Arc::new(StubModel {
                reply: Ok("   ".to_string()),
            }),
            600,
        );

        let out = humanizer.polish("Исходный ответ", at_utc(9)).await;
        assert_eq!(out, "Исходный ответ");
    }

    #[tokio::test]
    async fn empty_raw_stays_empty() {
        let humanizer = Humanizer::new(
            Arc::new(StubModel {
                reply: Ok("не должно появиться".to_string()),
            }),
            600,
        );

        assert_eq!(humanizer.polish("  ", at_utc(9)).await, "");
    }

    #[tokio::test]
    async fn result_is_capped() {
        let humanizer = Humanizer::new(
            Arc::new(StubModel {
                reply: Ok("д".repeat(700)),
            }),
            600,
        );

        let out = humanizer.polish("сырой", at_utc(9)).await;
        assert_eq!(out.chars().count(), 600);
        assert!(out.ends_with('…'));
    }
}
