//! Turn-level error taxonomy.
//!
//! These are state markers, not thrown faults: a stage that fails records a
//! `TurnError` on the conversation state and the orchestrator short-circuits
//! the stages that depend on it. Transport-level detail stays in `anyhow`
//! at the collaborator seams; only the classified kind and a human-readable
//! detail string survive into the store and the turn outcome.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which stage of the turn failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Context resolution failed or returned no profile.
    DataFetch,
    /// The model call inside the generation loop failed.
    Generation,
    /// The outbound channel rejected or dropped the message.
    Delivery,
    /// The escalation payload could not be constructed.
    Escalation,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::DataFetch => "DataFetchError",
            ErrorKind::Generation => "GenerationError",
            ErrorKind::Delivery => "DeliveryError",
            ErrorKind::Escalation => "EscalationError",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "DataFetchError" => Some(ErrorKind::DataFetch),
            "GenerationError" => Some(ErrorKind::Generation),
            "DeliveryError" => Some(ErrorKind::Delivery),
            "EscalationError" => Some(ErrorKind::Escalation),
            _ => None,
        }
    }
}

/// A classified turn failure with its detail message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnError {
    pub kind: ErrorKind,
    pub detail: String,
}

impl TurnError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for TurnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.detail)
    }
}
