//! Delivery dispatcher.
//!
//! Sends the final text through the messaging channel and mirrors it into the
//! backend dialog log. Skips silently when there is nothing to send or the
//! turn was marked non-responding. A failed send becomes a `DeliveryError`
//! marker; a failed audit write is only logged, since the client already got
//! the message.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::error::{ErrorKind, TurnError};
use crate::state::ConversationState;

/// Outbound messaging seam (WhatsApp/Telegram behind one contract).
#[async_trait]
pub trait MessagingChannel: Send + Sync {
    /// Returns `true` when the channel accepted the message.
    async fn send(&self, chat_id: &str, channel_id: &str, text: &str, source: &str)
        -> Result<bool>;
}

/// Backend dialog log seam.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn log_message(
        &self,
        query_id: &str,
        chat_id: &str,
        user_id: &str,
        text: &str,
        sender: &str,
    ) -> Result<()>;
}

pub struct DeliveryDispatcher {
    channel: Arc<dyn MessagingChannel>,
    audit: Arc<dyn AuditLog>,
}

impl DeliveryDispatcher {
    pub fn new(channel: Arc<dyn MessagingChannel>, audit: Arc<dyn AuditLog>) -> Self {
        Self { channel, audit }
    }

    /// Send the turn's outgoing text. Returns the error marker to record,
    /// if any; `None` covers both success and a legitimate skip.
    pub async fn dispatch(&self, state: &ConversationState) -> Option<TurnError> {
        let text = state.outgoing_text();

        if !state.should_respond || text.trim().is_empty() {
            tracing::debug!(thread_id = %state.thread_id, "Nothing to deliver, skipping send");
            return None;
        }

        let accepted = match self
            .channel
            .send(&state.sender_id, &state.channel_id, text, &state.source)
            .await
        {
            Ok(accepted) => accepted,
            Err(e) => {
                return Some(TurnError::new(
                    ErrorKind::Delivery,
                    format!("send failed: {}", e),
                ));
            }
        };

        if !accepted {
            return Some(TurnError::new(
                ErrorKind::Delivery,
                "channel rejected the message",
            ));
        }

        tracing::info!(thread_id = %state.thread_id, chars = text.chars().count(), "Reply delivered");

        // Mirror into the backend dialog so the next turn's history has it.
        let query_id = state
            .context
            .as_ref()
            .and_then(|c| c.query_id.as_deref())
            .unwrap_or_default();
        let user_id = state
            .context
            .as_ref()
            .and_then(|c| c.user_id.as_deref())
            .unwrap_or_default();

        if let Err(e) = self
            .audit
            .log_message(query_id, &state.sender_id, user_id, text, "ai")
            .await
        {
            tracing::warn!(thread_id = %state.thread_id, "Audit log write failed: {}", e);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::TurnRequest;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct StubChannel {
        result: Result<bool, String>,
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MessagingChannel for StubChannel {
        async fn send(
            &self,
            _chat_id: &str,
            _channel_id: &str,
            text: &str,
            _source: &str,
        ) -> Result<bool> {
            self.sent.lock().unwrap().push(text.to_string());
            match &self.result {
                Ok(accepted) => Ok(*accepted),
                Err(e) => anyhow::bail!("{}", e),
            }
        }
    }

    struct StubAudit {
        calls: AtomicUsize,
        senders: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl AuditLog for StubAudit {
        async fn log_message(
            &self,
            _query_id: &str,
            _chat_id: &str,
            _user_id: &str,
            _text: &str,
            sender: &str,
        ) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.senders.lock().unwrap().push(sender.to_string());
            if self.fail {
                anyhow::bail!("backend down");
            }
            Ok(())
        }
    }

    fn state(message: &str, answer: &str) -> ConversationState {
        let mut state = ConversationState::new(
            TurnRequest {
                thread_id: "77001234567".to_string(),
                sender_id: "77001234567".to_string(),
                message: message.to_string(),
                source: "whatsapp".to_string(),
                channel_id: "channel-1".to_string(),
            },
            Utc::now(),
        );
        state.answer_text = answer.to_string();
        state
    }

    fn channel(result: Result<bool, String>) -> Arc<StubChannel> {
        Arc::new(StubChannel {
            result,
            sent: Mutex::new(Vec::new()),
        })
    }

    fn audit(fail: bool) -> Arc<StubAudit> {
        Arc::new(StubAudit {
            calls: AtomicUsize::new(0),
            senders: Mutex::new(Vec::new()),
            fail,
        })
    }

    #[tokio::test]
    async fn delivers_polished_text_and_logs() {
        let ch = channel(Ok(true));
        let au = audit(false);
        let dispatcher = DeliveryDispatcher::new(ch.clone(), au.clone());

        let mut state = state("вопрос", "raw");
        state.polished_text = "Полированный ответ".to_string();

        assert!(dispatcher.dispatch(&state).await.is_none());
        assert_eq!(ch.sent.lock().unwrap().as_slice(), ["Полированный ответ"]);
        assert_eq!(au.calls.load(Ordering::SeqCst), 1);
        // Dialog history reads these lines back, so the label must be "ai"
        assert_eq!(au.senders.lock().unwrap().as_slice(), ["ai"]);
    }

    #[tokio::test]
    async fn empty_text_is_skipped() {
        let ch = channel(Ok(true));
        let dispatcher = DeliveryDispatcher::new(ch.clone(), audit(false));

        assert!(dispatcher.dispatch(&state("вопрос", "")).await.is_none());
        assert!(ch.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn non_responding_turn_is_skipped() {
        let ch = channel(Ok(true));
        let dispatcher = DeliveryDispatcher::new(ch.clone(), audit(false));

        let mut state = state("вопрос", "ответ");
        state.should_respond = false;

        assert!(dispatcher.dispatch(&state).await.is_none());
        assert!(ch.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn transport_error_becomes_delivery_marker() {
        let dispatcher =
            DeliveryDispatcher::new(channel(Err("502".to_string())), audit(false));

        let err = dispatcher.dispatch(&state("вопрос", "ответ")).await.unwrap();
        assert_eq!(err.kind, ErrorKind::Delivery);
        assert!(err.detail.contains("502"));
    }

    #[tokio::test]
    async fn channel_rejection_becomes_delivery_marker() {
        let dispatcher = DeliveryDispatcher::new(channel(Ok(false)), audit(false));

        let err = dispatcher.dispatch(&state("вопрос", "ответ")).await.unwrap();
        assert_eq!(err.kind, ErrorKind::Delivery);
    }

    #[tokio::test]
    async fn audit_failure_does_not_fail_delivery() {
        let au = audit(true);
        let dispatcher = DeliveryDispatcher::new(channel(Ok(true)), au.clone());

        assert!(dispatcher.dispatch(&state("вопрос", "ответ")).await.is_none());
        assert_eq!(au.calls.load(Ordering::SeqCst), 1);
    }
}
