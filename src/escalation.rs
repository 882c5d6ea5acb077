//! Escalation handler.
//!
//! Fans one escalation out to three independent sinks: the club's manager
//! chat in Telegram, a tracking record, and a lead-status update in the CRM.
//! Sink failures are recorded per sink and never abort the others. The only
//! fatal path is failing to assemble the payload at all (no resolved context
//! to escalate with).

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{ErrorKind, TurnError};
use crate::state::ConversationState;
use crate::tools::truncate_chars;

/// Lead pipeline status in the CRM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadStatus {
    Initial,
    HumanNeeded,
}

/// Everything a sink needs to describe the handoff.
#[derive(Debug, Clone)]
pub struct EscalationRecord {
    pub thread_id: String,
    pub reason: String,
    pub client_name: String,
    pub club_name: String,
    pub last_user_message: String,
    pub last_assistant_answer: String,
    pub created_at: DateTime<Utc>,
}

/// Human notification sink (Telegram manager chat).
#[async_trait]
pub trait HumanNotifier: Send + Sync {
    async fn notify(&self, chat_id: i64, text: &str) -> Result<bool>;
}

/// Tracking record sink.
#[async_trait]
pub trait EscalationTracker: Send + Sync {
    async fn create_record(&self, record: &EscalationRecord) -> Result<bool>;
}

/// CRM lead-status sink.
#[async_trait]
pub trait CrmGateway: Send + Sync {
    async fn update_lead_status(&self, user_id: &str, status: LeadStatus) -> Result<bool>;
}

/// Per-sink delivery outcomes for one escalation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkOutcomes {
    pub notify_ok: bool,
    pub tracker_ok: bool,
    pub crm_ok: bool,
}

pub struct EscalationHandler {
    notifier: Arc<dyn HumanNotifier>,
    tracker: Arc<dyn EscalationTracker>,
    crm: Arc<dyn CrmGateway>,
    /// Used when the client's club has no manager chat configured.
    fallback_chat: i64,
}

impl EscalationHandler {
    pub fn new(
        notifier: Arc<dyn HumanNotifier>,
        tracker: Arc<dyn EscalationTracker>,
        crm: Arc<dyn CrmGateway>,
        fallback_chat: i64,
    ) -> Self {
        Self {
            notifier,
            tracker,
            crm,
            fallback_chat,
        }
    }

    /// Run all sinks. Returns the outcomes plus a fatal marker when the
    /// payload could not be built.
    pub async fn handle(
        &self,
        state: &ConversationState,
        now: DateTime<Utc>,
    ) -> (SinkOutcomes, Option<TurnError>) {
        let context = match state.context.as_ref() {
            Some(context) => context,
            None => {
                return (
                    SinkOutcomes::default(),
                    Some(TurnError::new(
                        ErrorKind::Escalation,
                        "no resolved context to escalate with",
                    )),
                );
            }
        };

        let record = EscalationRecord {
            thread_id: state.thread_id.clone(),
            reason: state.escalation_reason.clone(),
            client_name: context.user.full_name(),
            club_name: context.user.club_name().to_string(),
            last_user_message: state.message.clone(),
            last_assistant_answer: state.outgoing_text().to_string(),
            created_at: now,
        };

        let chat_id = context.club_tg_chat.unwrap_or(self.fallback_chat);
        let mut outcomes = SinkOutcomes::default();

        outcomes.notify_ok = match self.notifier.notify(chat_id, &notify_text(&record)).await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(thread_id = %record.thread_id, "Manager notification failed: {}", e);
                false
            }
        };

        outcomes.tracker_ok = match self.tracker.create_record(&record).await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(thread_id = %record.thread_id, "Tracking record failed: {}", e);
                false
            }
        };

        outcomes.crm_ok = match context.user_id.as_deref() {
            Some(user_id) => match self
                .crm
                .update_lead_status(user_id, LeadStatus::HumanNeeded)
                .await
            {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!(thread_id = %record.thread_id, "CRM status update failed: {}", e);
                    false
                }
            },
            None => {
                tracing::warn!(thread_id = %record.thread_id, "No user id, skipping CRM update");
                false
            }
        };

        tracing::info!(
            thread_id = %record.thread_id,
            notify = outcomes.notify_ok,
            tracker = outcomes.tracker_ok,
            crm = outcomes.crm_ok,
            "Escalation dispatched"
        );

        (outcomes, None)
    }
}

/// Telegram HTML message for the manager chat.
fn notify_text(record: &EscalationRecord) -> String {
    let answer = truncate_chars(&record.last_assistant_answer, 500, "…");
    let user_message = if record.last_user_message.trim().is_empty() {
        "(нет сообщения)".to_string()
    } else {
        record.last_user_message.clone()
    };

    format!(
        "🚨 <b>Требуется менеджер</b>\n\n\
         <b>Клиент:</b> {}\n\
         <b>Клуб:</b> {}\n\
         <b>Телефон:</b> {}\n\
         <b>Причина:</b> {}\n\n\
         <b>Сообщение клиента:</b>\n{}\n\n\
         <b>Ответ ассистента:</b>\n{}",
        record.client_name,
        if record.club_name.is_empty() {
            "не указан"
        } else {
            &record.club_name
        },
        record.thread_id,
        record.reason,
        user_message,
        answer
    )
}
