//! Payment link tool.
//!
//! Fixed product catalog plus a gateway call that mints the link. The tool
//! never surfaces an error to the loop: every outcome, including gateway
//! failure, is a user-facing Russian string.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use super::{Tool, ToolContext, ToolOutput};

/// Product catalog: code, display name, price in tenge.
pub const PRODUCTS: &[(&str, &str, u64)] = &[
    ("heros_week", "Hero's Week", 9990),
    ("basecamp", "Basecamp", 29990),
    ("first_step", "Первый Шаг", 59990),
    ("heros_pass_6", "Hero's Pass 6 мес", 349990),
    ("heros_pass_12", "Hero's Pass 12 мес", 549990),
];

/// Gateway seam that actually creates the link.
#[async_trait]
pub trait PaymentLinkService: Send + Sync {
    /// Returns the payment URL, or `None` when the gateway declined.
    async fn create_link(
        &self,
        product: &str,
        club_id: &str,
        chat_id: &str,
        amount: u64,
    ) -> Result<Option<String>>;
}

#[derive(Debug, Default, Deserialize)]
struct PaymentParams {
    #[serde(default)]
    product: String,
    #[serde(default)]
    club_id: Option<String>,
}

pub struct PaymentLinkTool {
    service: Arc<dyn PaymentLinkService>,
}

impl PaymentLinkTool {
    pub fn new(service: Arc<dyn PaymentLinkService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Tool for PaymentLinkTool {
    fn name(&self) -> &str {
        "get_payment_link"
    }

    fn description(&self) -> &str {
        "Генерирует ссылку на оплату продукта. Продукты: heros_week — Hero's Week \
         (9 990 ₸, 1 неделя trial); basecamp — Basecamp (29 990 ₸, 2 недели trial); \
         first_step — Первый Шаг (59 990 ₸, 1 месяц trial); heros_pass_6 — Hero's Pass \
         6 месяцев (349 990 ₸); heros_pass_12 — Hero's Pass 12 месяцев (549 990 ₸)."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "product": {
                    "type": "string",
                    "enum": ["heros_week", "basecamp", "first_step", "heros_pass_6", "heros_pass_12"],
                    "description": "Код продукта"
                },
                "club_id": {
                    "type": "string",
                    "description": "ID клуба (по умолчанию — клуб клиента)"
                }
            },
            "required": ["product"]
        })
    }

    async fn execute(&self, params: serde_json::Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let params: PaymentParams = serde_json::from_value(params).unwrap_or_default();

        let (code, name, price) = match PRODUCTS.iter().find(|(code, _, _)| *code == params.product)
        {
            Some(product) => *product,
            None => {
                let available: Vec<&str> = PRODUCTS.iter().map(|(code, _, _)| *code).collect();
                return Ok(ToolOutput::Text(format!(
                    "❌ Неизвестный продукт. Доступные: {}",
                    available.join(", ")
                )));
            }
        };

        let club_id = params
            .club_id
            .or_else(|| ctx.club_id.clone())
            .unwrap_or_default();

        match self
            .service
            .create_link(code, &club_id, &ctx.chat_id, price)
            .await
        {
            Ok(Some(url)) => Ok(ToolOutput::Text(format!(
                "✅ Ссылка на оплату {} ({} ₸):\n{}",
                name,
                format_tenge(price),
                url
            ))),
            Ok(None) => Ok(ToolOutput::Text(
                "⚠️ Не удалось создать ссылку на оплату. Попросите клиента связаться с менеджером."
                    .to_string(),
            )),
            Err(e) => {
                tracing::warn!("Payment link creation failed: {}", e);
                Ok(ToolOutput::Text(format!("⚠️ Ошибка создания ссылки: {}", e)))
            }
        }
    }
}

/// Thousands-separated tenge amount, "349 990" style.
fn format_tenge(amount: u64) -> String {
    let digits = amount.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(' ');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubService {
        result: Result<Option<String>, String>,
        expect_club: Option<String>,
    }

    #[async_trait]
    impl PaymentLinkService for StubService {
        async fn create_link(
            &self,
            _product: &str,
            club_id: &str,
            _chat_id: &str,
            _amount: u64,
        ) -> Result<Option<String>> {
            if let Some(ref expected) = self.expect_club {
                assert_eq!(club_id, expected);
            }
            match &self.result {
                Ok(url) => Ok(url.clone()),
                Err(e) => anyhow::bail!("{}", e),
            }
        }
    }

    fn ctx(club_id: Option<&str>) -> ToolContext {
        ToolContext {
            thread_id: "t".to_string(),
            chat_id: "77001234567".to_string(),
            club_id: club_id.map(str::to_string),
        }
    }

    #[test]
    fn tenge_formatting() {
        assert_eq!(format_tenge(9990), "9 990");
        assert_eq!(format_tenge(349990), "349 990");
        assert_eq!(format_tenge(100), "100");
        assert_eq!(format_tenge(1000000), "1 000 000");
    }

    #[tokio::test]
    async fn successful_link_includes_price() {
        let tool = PaymentLinkTool::new(Arc::new(StubService {
            result: Ok(Some("https://pay.example/abc".to_string())),
            expect_club: None,
        }));

        let output = tool
            .execute(
                serde_json::json!({"product": "heros_pass_6", "club_id": "club-1"}),
                &ctx(None),
            )
            .await
            .unwrap();
        let text = output.to_llm_string();
        assert!(text.contains("✅ Ссылка на оплату Hero's Pass 6 мес (349 990 ₸)"));
        assert!(text.contains("https://pay.example/abc"));
    }

    #[tokio::test]
    async fn unknown_product_lists_catalog() {
        let tool = PaymentLinkTool::new(Arc::new(StubService {
            result: Ok(None),
            expect_club: None,
        }));

        let output = tool
            .execute(serde_json::json!({"product": "gold_card"}), &ctx(None))
            .await
            .unwrap();
        let text = output.to_llm_string();
        assert!(text.contains("❌ Неизвестный продукт"));
        assert!(text.contains("heros_week"));
        assert!(text.contains("heros_pass_12"));
    }

    #[tokio::test]
    async fn declined_link_suggests_manager() {
        let tool = PaymentLinkTool::new(Arc::new(StubService {
            result: Ok(None),
            expect_club: None,
        }));

        let output = tool
            .execute(serde_json::json!({"product": "basecamp"}), &ctx(None))
            .await
            .unwrap();
        assert!(output
            .to_llm_string()
            .contains("⚠️ Не удалось создать ссылку"));
    }

    #[tokio::test]
    async fn gateway_error_stays_user_facing() {
        let tool = PaymentLinkTool::new(Arc::new(StubService {
            result: Err("502 Bad Gateway".to_string()),
            expect_club: None,
        }));

        let output = tool
            .execute(serde_json::json!({"product": "heros_week"}), &ctx(None))
            .await
            .unwrap();
        assert!(output.is_success());
        assert!(output.to_llm_string().contains("⚠️ Ошибка создания ссылки"));
    }

    #[tokio::test]
    async fn club_defaults_to_context() {
        let tool = PaymentLinkTool::new(Arc::new(StubService {
            result: Ok(Some("https://pay.example/x".to_string())),
            expect_club: Some("home-club".to_string()),
        }));

        let output = tool
            .execute(
                serde_json::json!({"product": "first_step"}),
                &ctx(Some("home-club")),
            )
            .await
            .unwrap();
        assert!(output.is_success());
    }
}
