//! Per-turn conversation state.
//!
//! One `ConversationState` lives for exactly one inbound message. Stages of
//! the turn mutate it in order; the orchestrator owns the sequencing. The
//! trigger is immutable once selected, the transcript is append-only, and the
//! first recorded error wins.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::ResolvedContext;
use crate::error::TurnError;
use crate::escalation::SinkOutcomes;
use crate::llm::ChatMessage;

/// Inbound message plus channel metadata, as handed over by the ingress.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub thread_id: String,
    pub sender_id: String,
    pub message: String,
    pub source: String,
    pub channel_id: String,
}

/// Backend trigger flags for the conversation (wire names are camelCase).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TriggerFlags {
    #[serde(default)]
    pub payment: bool,
    #[serde(default, rename = "firstTraining")]
    pub first_training: bool,
    #[serde(default, rename = "noActivity")]
    pub no_activity: bool,
    #[serde(default, rename = "finishProgram")]
    pub finish_program: bool,
}

/// Which conversation strategy drives this turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    FirstTraining,
    NoActivity,
    FinishProgram,
    Payment,
    Default,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::FirstTraining => "first_training",
            Trigger::NoActivity => "no_activity",
            Trigger::FinishProgram => "finish_program",
            Trigger::Payment => "payment",
            Trigger::Default => "default",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "first_training" => Some(Trigger::FirstTraining),
            "no_activity" => Some(Trigger::NoActivity),
            "finish_program" => Some(Trigger::FinishProgram),
            "payment" => Some(Trigger::Payment),
            "default" => Some(Trigger::Default),
            _ => None,
        }
    }
}

/// Map trigger flags to a single strategy. Priority is fixed:
/// first training beats inactivity beats program completion beats payment.
pub fn select_trigger(flags: &TriggerFlags) -> Trigger {
    if flags.first_training {
        Trigger::FirstTraining
    } else if flags.no_activity {
        Trigger::NoActivity
    } else if flags.finish_program {
        Trigger::FinishProgram
    } else if flags.payment {
        Trigger::Payment
    } else {
        Trigger::Default
    }
}

/// Everything accumulated while processing one conversation turn.
#[derive(Debug, Clone)]
pub struct ConversationState {
    pub thread_id: String,
    pub sender_id: String,
    pub message: String,
    pub source: String,
    pub channel_id: String,
    pub started_at: DateTime<Utc>,

    pub should_respond: bool,
    pub context: Option<ResolvedContext>,
    trigger: Option<Trigger>,
    transcript: Vec<ChatMessage>,

    pub answer_text: String,
    pub polished_text: String,
    pub escalation_needed: bool,
    pub escalation_reason: String,
    /// Per-sink results once the escalation handler has run.
    pub sink_outcomes: Option<SinkOutcomes>,

    error: Option<TurnError>,
}

impl ConversationState {
    pub fn new(request: TurnRequest, started_at: DateTime<Utc>) -> Self {
        let should_respond = !request.message.trim().is_empty();
        Self {
            thread_id: request.thread_id,
            sender_id: request.sender_id,
            message: request.message,
            source: request.source,
            channel_id: request.channel_id,
            started_at,
            should_respond,
            context: None,
            trigger: None,
            transcript: Vec::new(),
            answer_text: String::new(),
            polished_text: String::new(),
            escalation_needed: false,
            escalation_reason: String::new(),
            sink_outcomes: None,
            error: None,
        }
    }

    /// Set the trigger for this turn. A second attempt is ignored.
    pub fn set_trigger(&mut self, trigger: Trigger) {
        if let Some(existing) = self.trigger {
            tracing::warn!(
                "Ignoring repeated trigger selection: {} already set, {} dropped",
                existing.as_str(),
                trigger.as_str()
            );
            return;
        }
        self.trigger = Some(trigger);
    }

    pub fn trigger(&self) -> Option<Trigger> {
        self.trigger
    }

    pub fn extend_transcript(&mut self, messages: Vec<ChatMessage>) {
        self.transcript.extend(messages);
    }

    pub fn transcript(&self) -> &[ChatMessage] {
        &self.transcript
    }

    /// Record a turn failure. The first error wins; later ones are logged.
    pub fn set_error(&mut self, error: TurnError) {
        if let Some(ref existing) = self.error {
            tracing::warn!("Turn already failed with {}; dropping {}", existing, error);
            return;
        }
        self.error = Some(error);
    }

    pub fn error(&self) -> Option<&TurnError> {
        self.error.as_ref()
    }

    /// The text that actually goes out: the polished version when the
    /// post-processor produced one, the raw answer otherwise.
    pub fn outgoing_text(&self) -> &str {
        if self.polished_text.is_empty() {
            &self.answer_text
        } else {
            &self.polished_text
        }
    }
}
