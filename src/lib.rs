//! Clubdesk: conversation-turn orchestrator for the studio's support agent.
//!
//! One inbound client message becomes one turn: resolve the client's profile
//! and trigger flags from the backend, pick a conversation strategy, run a
//! bounded tool-calling loop against the model, polish the answer, deliver
//! it over the messaging gateway and, when flagged, escalate to the club's
//! managers. All external systems sit behind traits so the core is testable
//! with in-process stubs.

pub mod config;
pub mod context;
pub mod delivery;
pub mod error;
pub mod escalation;
pub mod generation;
pub mod humanize;
pub mod llm;
pub mod orchestrator;
pub mod prompts;
pub mod state;
pub mod store;
pub mod tools;

pub mod integrations;
