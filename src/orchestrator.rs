//! Turn orchestrator.
//!
//! Owns the stage sequencing for one inbound message: resolve context,
//! select the trigger, build prompts, run the generation loop, polish the
//! answer, deliver it, escalate when flagged, and archive the turn. Every
//! path ends in a structured `TurnOutcome`; nothing is thrown at the caller.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

use crate::context::ContextResolver;
use crate::delivery::DeliveryDispatcher;
use crate::error::{ErrorKind, TurnError};
use crate::escalation::EscalationHandler;
use crate::generation::GenerationLoop;
use crate::humanize::Humanizer;
use crate::llm::ChatMessage;
use crate::prompts::{self, PromptContext};
use crate::state::{select_trigger, ConversationState, TurnRequest};
use crate::store::{ConversationStore, TurnRecord};
use crate::tools::ToolContext;

/// What `process_turn` hands back to the ingress.
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub answer_text: String,
    pub escalation_needed: bool,
    pub escalation_reason: String,
    pub error: Option<String>,
}

pub struct Orchestrator {
    resolver: ContextResolver,
    generation: GenerationLoop,
    humanizer: Humanizer,
    delivery: DeliveryDispatcher,
    escalation: EscalationHandler,
    store: Arc<dyn ConversationStore>,
    history_window: usize,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        resolver: ContextResolver,
        generation: GenerationLoop,
        humanizer: Humanizer,
        delivery: DeliveryDispatcher,
        escalation: EscalationHandler,
        store: Arc<dyn ConversationStore>,
        history_window: usize,
    ) -> Self {
        Self {
            resolver,
            generation,
            humanizer,
            delivery,
            escalation,
            store,
            history_window,
        }
    }

    /// Process one inbound message end to end.
    pub async fn process_turn(&self, request: TurnRequest) -> TurnOutcome {
        let now = Utc::now();
        let mut state = ConversationState::new(request, now);

        tracing::info!(
            thread_id = %state.thread_id,
            source = %state.source,
            "Processing turn"
        );

        self.run_stages(&mut state).await;
        self.archive(&state);

        let outcome = TurnOutcome {
            answer_text: state.outgoing_text().to_string(),
            escalation_needed: state.escalation_needed,
            escalation_reason: state.escalation_reason.clone(),
            error: state.error().map(|e| e.kind.as_str().to_string()),
        };

        if let Some(error) = state.error() {
            tracing::warn!(thread_id = %state.thread_id, "Turn finished with error: {}", error);
        } else {
            tracing::info!(thread_id = %state.thread_id, "Turn finished");
        }

        outcome
    }

    async fn run_stages(&self, state: &mut ConversationState) {
        // Context resolution. Failure or an unknown sender ends the turn
        // with no reply at all.
        let context = match self.resolver.resolve(&state.sender_id).await {
            Ok(Some(context)) => context,
            Ok(None) => {
                state.should_respond = false;
                state.set_error(TurnError::new(
                    ErrorKind::DataFetch,
                    format!("no profile for sender {}", state.sender_id),
                ));
                return;
            }
            Err(e) => {
                state.should_respond = false;
                state.set_error(TurnError::new(ErrorKind::DataFetch, e.to_string()));
                return;
            }
        };

        let trigger = select_trigger(&context.flags);
        state.set_trigger(trigger);
        tracing::debug!(thread_id = %state.thread_id, trigger = trigger.as_str(), "Trigger selected");

        let pc = PromptContext {
            message: &state.message,
            ctx: &context,
            now: state.started_at,
            history_window: self.history_window,
        };
        let seed = vec![
            ChatMessage::system(prompts::system_prompt(trigger, &pc)),
            ChatMessage::user(prompts::user_prompt(trigger, &pc)),
        ];
        let tool_ctx = ToolContext {
            thread_id: state.thread_id.clone(),
            chat_id: state.sender_id.clone(),
            club_id: context.club_id.clone(),
        };
        state.context = Some(context);
        state.extend_transcript(seed.clone());

        // Generation. A model transport failure is fatal: no answer exists,
        // so neither delivery nor escalation can run.
        let outcome = match self.generation.run(seed, &tool_ctx).await {
            Ok(outcome) => outcome,
            Err(e) => {
                state.set_error(TurnError::new(ErrorKind::Generation, e.to_string()));
                return;
            }
        };
        state.extend_transcript(outcome.messages);
        state.answer_text = outcome.reply.response;
        state.escalation_needed = outcome.reply.escalation_needed;
        state.escalation_reason = outcome.reply.escalation_reason;
        if outcome.hit_budget {
            tracing::warn!(thread_id = %state.thread_id, "Answering from budget-exhausted loop");
        }

        state.polished_text = self
            .humanizer
            .polish(&state.answer_text, state.started_at)
            .await;

        if let Some(error) = self.delivery.dispatch(state).await {
            state.set_error(error);
        }

        // Escalation is independent of delivery success.
        if state.escalation_needed {
            let (outcomes, error) = self.escalation.handle(state, state.started_at).await;
            state.sink_outcomes = Some(outcomes);
            if let Some(error) = error {
                state.set_error(error);
            }
        }
    }

    fn archive(&self, state: &ConversationState) {
        let mut record = TurnRecord::new(state.thread_id.clone(), state.started_at);
        record.inbound_message = state.message.clone();
        record.answer_text = state.answer_text.clone();
        record.delivered_text = state.outgoing_text().to_string();
        record.trigger = state
            .trigger()
            .map(|t| t.as_str().to_string())
            .unwrap_or_default();
        record.escalation_needed = state.escalation_needed;
        record.escalation_reason = state.escalation_reason.clone();
        record.sink_outcomes = state.sink_outcomes;
        record.error = state.error().map(|e| e.to_string());
        record.messages = state.transcript().to_vec();

        if let Err(e) = self.store.record_turn(&record) {
            tracing::warn!(thread_id = %state.thread_id, "Failed to archive turn: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use crate::context::{ProfileBundle, ProfileService};
    use crate::delivery::{AuditLog, MessagingChannel};
    use crate::escalation::{CrmGateway, EscalationRecord, EscalationTracker, HumanNotifier, LeadStatus};
    use crate::llm::{ChatModel, LlmFunctionCall, LlmToolCall};
    use crate::store::MemoryStore;
    use crate::tools::{Tool, ToolDef, ToolOutput, ToolRegistry};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct StubProfile {
        bundle: Result<Option<ProfileBundle>, String>,
    }

    #[async_trait]
    impl ProfileService for StubProfile {
        async fn fetch(&self, _sender_id: &str) -> Result<Option<ProfileBundle>> {
            match &self.bundle {
                Ok(bundle) => Ok(bundle.clone()),
                Err(e) => anyhow::bail!("{}", e),
            }
        }
    }

    /// Scripted chat model that also captures every request it sees.
    struct ScriptedModel {
        script: Mutex<Vec<ChatMessage>>,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
        polished: String,
    }

    impl ScriptedModel {
        fn new(mut script: Vec<ChatMessage>, polished: &str) -> Self {
            script.reverse();
            Self {
                script: Mutex::new(script),
                seen: Mutex::new(Vec::new()),
                polished: polished.to_string(),
            }
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        async fn chat(&self, messages: &[ChatMessage], _tools: &[ToolDef]) -> Result<ChatMessage> {
            self.seen.lock().unwrap().push(messages.to_vec());
            self.script
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| anyhow::anyhow!("script exhausted"))
        }

        async fn complete(&self, _prompt: &str) -> Result<String> {
            Ok(self.polished.clone())
        }
    }

    struct StubChannel {
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
            Ok(true)
        }
    }

    struct NoopAudit;

    #[async_trait]
    impl AuditLog for NoopAudit {
        async fn log_message(
            &self,
            _query_id: &str,
            _chat_id: &str,
            _user_id: &str,
            _text: &str,
            _sender: &str,
        ) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct SinkCounters {
        notify: AtomicUsize,
        track: AtomicUsize,
        crm: AtomicUsize,
    }

    struct CountingSinks {
        counters: Arc<SinkCounters>,
    }

    #[async_trait]
    impl HumanNotifier for CountingSinks {
        async fn notify(&self, _chat_id: i64, _text: &str) -> Result<bool> {
            self.counters.notify.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    #[async_trait]
    impl EscalationTracker for CountingSinks {
        async fn create_record(&self, _record: &EscalationRecord) -> Result<bool> {
            self.counters.track.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    #[async_trait]
    impl CrmGateway for CountingSinks {
        async fn update_lead_status(&self, _user_id: &str, _status: LeadStatus) -> Result<bool> {
            self.counters.crm.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    struct Fixture {
        orchestrator: Orchestrator,
        model: Arc<ScriptedModel>,
        channel: Arc<StubChannel>,
        sinks: Arc<SinkCounters>,
        store: Arc<MemoryStore>,
    }

    async fn fixture(
        bundle: Result<Option<ProfileBundle>, String>,
        script: Vec<ChatMessage>,
        polished: &str,
    ) -> Fixture {
        let model = Arc::new(ScriptedModel::new(script, polished));
        let channel = Arc::new(StubChannel {
            sent: Mutex::new(Vec::new()),
        });
        let sinks = Arc::new(SinkCounters::default());
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(ToolRegistry::new(6000));
        registry.register(Arc::new(EchoScheduleTool)).await;

        let orchestrator = Orchestrator::new(
            ContextResolver::new(
                Arc::new(StubProfile { bundle }),
                AgentConfig::default().club_directory(),
            ),
            GenerationLoop::new(model.clone(), registry, 5),
            Humanizer::new(model.clone(), 600),
            DeliveryDispatcher::new(channel.clone(), Arc::new(NoopAudit)),
            EscalationHandler::new(
                Arc::new(CountingSinks {
                    counters: sinks.clone(),
                }),
                Arc::new(CountingSinks {
                    counters: sinks.clone(),
                }),
                Arc::new(CountingSinks {
                    counters: sinks.clone(),
                }),
                -1003234914487,
            ),
            store.clone(),
            10,
        );

        Fixture {
            orchestrator,
            model,
            channel,
            sinks,
            store,
        }
    }

    struct EchoScheduleTool;

    #[async_trait]
    impl Tool for EchoScheduleTool {
        fn name(&self) -> &str {
            "get_schedule_by_club"
        }

        fn description(&self) -> &str {
            "stub"
        }

        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {}})
        }

        async fn execute(
            &self,
            _params: serde_json::Value,
            _ctx: &ToolContext,
        ) -> Result<ToolOutput> {
            Ok(ToolOutput::Text("📅 расписание".to_string()))
        }
    }

    fn request(message: &str) -> TurnRequest {
        TurnRequest {
            thread_id: "77001234567".to_string(),
            sender_id: "77001234567".to_string(),
            message: message.to_string(),
            source: "whatsapp".to_string(),
            channel_id: "channel-1".to_string(),
        }
    }

    fn first_training_bundle() -> ProfileBundle {
        serde_json::from_value(serde_json::json!({
            "userId": "user-1",
            "user": {
                "firstName": "Айгерим",
                "lastName": "С.",
                "club": {"id": "65e9e70cbd4814536c5e27e9", "name": "Colibri"}
            },
            "triggers": {"firstTraining": true},
            "queries": [{
                "id": "query-9",
                "dialog": [{
                    "text": "Данные тренировки",
                    "sender": "auto",
                    "created_at": "2026-08-01T09:00:00Z",
                    "trainingData": {
                        "eventName": "RT Upper",
                        "heartRateData": {"max_hr": 178.0, "average_hr": 145.0, "calories": 520.0}
                    }
                }]
            }]
        }))
        .unwrap()
    }

    fn plain_bundle() -> ProfileBundle {
        serde_json::from_value(serde_json::json!({
            "userId": "user-2",
            "user": {"firstName": "Тест", "lastName": ""},
            "triggers": {},
            "queries": [{"id": "q", "dialog": []}]
        }))
        .unwrap()
    }

    fn answer(text: &str, needed: bool, reason: &str) -> ChatMessage {
        ChatMessage::assistant(format!(
            r#"{{"response": "{}", "escalation": {{"needed": {}, "reason": "{}"}}}}"#,
            text, needed, reason
        ))
    }

    // Scenario: first-training trigger with heart-rate data in context.
    #[tokio::test]
    async fn first_training_prompt_includes_heart_rate() {
        let f = fixture(
            Ok(Some(first_training_bundle())),
            vec![answer("Отличная первая тренировка!", false, "")],
            "Отличная первая тренировка! 💪",
        )
        .await;

        let outcome = f.orchestrator.process_turn(request("Как восстановиться?")).await;

        assert!(outcome.error.is_none());
        let seen = f.model.seen.lock().unwrap();
        let user_msg = seen[0][1].text().to_string();
        assert!(user_msg.contains("145"));
        assert!(user_msg.contains("RT Upper"));

        let record = f.store.last_turn("77001234567").unwrap().unwrap();
        assert_eq!(record.trigger, "first_training");
    }

    // Scenario: unknown sender ends the turn with no reply and no delivery.
    #[tokio::test]
    async fn unknown_sender_short_circuits() {
        let f = fixture(Ok(None), vec![], "").await;

        let outcome = f.orchestrator.process_turn(request("привет")).await;

        assert_eq!(outcome.answer_text, "");
        assert_eq!(outcome.error.as_deref(), Some("DataFetchError"));
        assert!(!outcome.escalation_needed);
        assert!(f.channel.sent.lock().unwrap().is_empty());
        assert_eq!(f.sinks.notify.load(Ordering::SeqCst), 0);

        // The failed turn is still archived
        let record = f.store.last_turn("77001234567").unwrap().unwrap();
        assert!(record.error.as_deref().unwrap().starts_with("DataFetchError"));
    }

    #[tokio::test]
    async fn profile_transport_error_short_circuits() {
        let f = fixture(Err("backend 502".to_string()), vec![], "").await;

        let outcome = f.orchestrator.process_turn(request("привет")).await;
        assert_eq!(outcome.error.as_deref(), Some("DataFetchError"));
        assert!(f.channel.sent.lock().unwrap().is_empty());
    }

    // Scenario: clean answer with no tool calls; delivered text is the
    // post-processed version and no escalation sink runs.
    #[tokio::test]
    async fn clean_answer_is_polished_and_delivered() {
        let f = fixture(
            Ok(Some(plain_bundle())),
            vec![answer("Ваша тренировка прошла хорошо!", false, "")],
            "Ваша тренировка прошла отлично, так держать!",
        )
        .await;

        let outcome = f.orchestrator.process_turn(request("как прошло?")).await;

        assert!(outcome.error.is_none());
        assert_eq!(outcome.answer_text, "Ваша тренировка прошла отлично, так держать!");
        assert_eq!(
            f.channel.sent.lock().unwrap().as_slice(),
            ["Ваша тренировка прошла отлично, так держать!"]
        );
        assert_eq!(f.sinks.notify.load(Ordering::SeqCst), 0);
        assert_eq!(f.sinks.track.load(Ordering::SeqCst), 0);
        assert_eq!(f.sinks.crm.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn escalation_runs_all_sinks_after_delivery() {
        let f = fixture(
            Ok(Some(plain_bundle())),
            vec![answer("Передаю менеджеру", true, "acute pain")],
            "Передаю менеджеру",
        )
        .await;

        let outcome = f.orchestrator.process_turn(request("острая боль в колене")).await;

        assert!(outcome.escalation_needed);
        assert_eq!(outcome.escalation_reason, "acute pain");
        assert!(outcome.error.is_none());
        assert_eq!(f.sinks.notify.load(Ordering::SeqCst), 1);
        assert_eq!(f.sinks.track.load(Ordering::SeqCst), 1);
        assert_eq!(f.sinks.crm.load(Ordering::SeqCst), 1);

        let record = f.store.last_turn("77001234567").unwrap().unwrap();
        assert!(record.escalation_needed);

        // Per-sink results land on the archived turn
        let sinks = record.sink_outcomes.unwrap();
        assert!(sinks.notify_ok && sinks.tracker_ok && sinks.crm_ok);
    }

    #[tokio::test]
    async fn model_failure_is_generation_error() {
        // Empty script: the first chat call fails.
        let f = fixture(Ok(Some(plain_bundle())), vec![], "").await;

        let outcome = f.orchestrator.process_turn(request("привет")).await;

        assert_eq!(outcome.error.as_deref(), Some("GenerationError"));
        assert_eq!(outcome.answer_text, "");
        assert!(f.channel.sent.lock().unwrap().is_empty());
        assert_eq!(f.sinks.notify.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn tool_round_flows_through_whole_turn() {
        let tool_call = ChatMessage {
            role: "assistant".to_string(),
            content: None,
            tool_calls: Some(vec![LlmToolCall {
                id: "call_1".to_string(),
                call_type: "function".to_string(),
                function: LlmFunctionCall {
                    name: "get_schedule_by_club".to_string(),
                    arguments: "{}".to_string(),
                },
            }]),
            tool_call_id: None,
        };
        let f = fixture(
            Ok(Some(plain_bundle())),
            vec![tool_call, answer("Вот расписание на неделю", false, "")],
            "Вот расписание на неделю",
        )
        .await;

        let outcome = f.orchestrator.process_turn(request("какое расписание?")).await;

        assert!(outcome.error.is_none());
        assert_eq!(outcome.answer_text, "Вот расписание на неделю");

        // Second model call saw the tool result appended
        let seen = f.model.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        let last = &seen[1];
        assert_eq!(last.last().map(|m| m.role.as_str()), Some("tool"));
        assert!(last.last().unwrap().text().contains("📅"));

        // The archived turn carries the whole exchange, seed included
        let record = f.store.last_turn("77001234567").unwrap().unwrap();
        let roles: Vec<&str> = record.messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, ["system", "user", "assistant", "tool", "assistant"]);
        assert!(record.messages[3].text().contains("📅"));
    }
}
