//! Conversation store.
//!
//! Durable per-thread turn history. Each completed turn is written as one
//! atomic record together with its model transcript; the next turn on the
//! same thread can read both back. Two implementations: an in-memory map for
//! tests and single-process use, and a SQLite store for anything that must
//! survive a restart.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

use crate::escalation::SinkOutcomes;
use crate::llm::ChatMessage;

/// One archived conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub id: String,
    pub thread_id: String,
    pub inbound_message: String,
    pub answer_text: String,
    pub delivered_text: String,
    pub trigger: String,
    pub escalation_needed: bool,
    pub escalation_reason: String,
    /// Per-sink escalation results, present only when escalation ran.
    pub sink_outcomes: Option<SinkOutcomes>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Full model transcript of the turn, seed prompts included.
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

impl TurnRecord {
    pub fn new(thread_id: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            thread_id: thread_id.into(),
            inbound_message: String::new(),
            answer_text: String::new(),
            delivered_text: String::new(),
            trigger: String::new(),
            escalation_needed: false,
            escalation_reason: String::new(),
            sink_outcomes: None,
            error: None,
            created_at,
            messages: Vec::new(),
        }
    }
}

/// Keyed turn archive. Writes are atomic per turn; reads on the same thread
/// see every prior write.
pub trait ConversationStore: Send + Sync {
    fn record_turn(&self, record: &TurnRecord) -> Result<()>;

    fn last_turn(&self, thread_id: &str) -> Result<Option<TurnRecord>>;

    /// Most recent turns for a thread, newest last.
    fn recent_turns(&self, thread_id: &str, limit: usize) -> Result<Vec<TurnRecord>>;
}

/// In-memory store, one Vec per thread.
#[derive(Default)]
pub struct MemoryStore {
    turns: Mutex<HashMap<String, Vec<TurnRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_turns(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<TurnRecord>>>> {
        self.turns
            .lock()
            .map_err(|e| anyhow::anyhow!("Store lock poisoned: {}", e))
    }
}

impl ConversationStore for MemoryStore {
    fn record_turn(&self, record: &TurnRecord) -> Result<()> {
        self.lock_turns()?
            .entry(record.thread_id.clone())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    fn last_turn(&self, thread_id: &str) -> Result<Option<TurnRecord>> {
        Ok(self
            .lock_turns()?
            .get(thread_id)
            .and_then(|turns| turns.last().cloned()))
    }

    fn recent_turns(&self, thread_id: &str, limit: usize) -> Result<Vec<TurnRecord>> {
        Ok(self
            .lock_turns()?
            .get(thread_id)
            .map(|turns| {
                let skip = turns.len().saturating_sub(limit);
                turns[skip..].to_vec()
            })
            .unwrap_or_default())
    }
}

/// SQLite-backed store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Create or open the database
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    /// Helper to lock the connection
    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Database lock poisoned: {}", e))
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self.lock_conn()?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS turns (
                id TEXT PRIMARY KEY,
                thread_id TEXT NOT NULL,
                inbound_message TEXT NOT NULL,
                answer_text TEXT NOT NULL,
                delivered_text TEXT NOT NULL,
                trigger_name TEXT NOT NULL,
                escalation_needed INTEGER NOT NULL,
                escalation_reason TEXT NOT NULL,
                sink_outcomes TEXT,
                error TEXT,
                created_at TEXT NOT NULL
            )"#,
            [],
        )?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS turn_messages (
                turn_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                tool_calls TEXT,
                tool_call_id TEXT,
                PRIMARY KEY (turn_id, seq)
            )"#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_turns_thread_created ON turns(thread_id, created_at DESC)",
            [],
        )?;

        Ok(())
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<TurnRecord> {
        let sink_outcomes: Option<String> = row.get(8)?;
        let created_at: String = row.get(10)?;
        Ok(TurnRecord {
            id: row.get(0)?,
            thread_id: row.get(1)?,
            inbound_message: row.get(2)?,
            answer_text: row.get(3)?,
            delivered_text: row.get(4)?,
            trigger: row.get(5)?,
            escalation_needed: row.get::<_, i64>(6)? != 0,
            escalation_reason: row.get(7)?,
            sink_outcomes: sink_outcomes.and_then(|s| serde_json::from_str(&s).ok()),
            error: row.get(9)?,
            created_at: created_at
                .parse::<DateTime<Utc>>()
                .unwrap_or_else(|_| Utc::now()),
            messages: Vec::new(),
        })
    }

    fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessage> {
        let content: String = row.get(1)?;
        let tool_calls: Option<String> = row.get(2)?;
        Ok(ChatMessage {
            role: row.get(0)?,
            content: if content.is_empty() { None } else { Some(content) },
            tool_calls: tool_calls.and_then(|s| serde_json::from_str(&s).ok()),
            tool_call_id: row.get(3)?,
        })
    }
}

impl ConversationStore for SqliteStore {
    fn record_turn(&self, record: &TurnRecord) -> Result<()> {
        let mut conn = self.lock_conn()?;
        let tx = conn
            .transaction()
            .context("Failed to begin turn transaction")?;

        let sink_outcomes = record
            .sink_outcomes
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("Failed to serialize sink outcomes")?;

        tx.execute(
            r#"INSERT INTO turns
               (id, thread_id, inbound_message, answer_text, delivered_text,
                trigger_name, escalation_needed, escalation_reason, sink_outcomes,
                error, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"#,
            params![
                record.id,
                record.thread_id,
                record.inbound_message,
                record.answer_text,
                record.delivered_text,
                record.trigger,
                record.escalation_needed as i64,
                record.escalation_reason,
                sink_outcomes,
                record.error,
                record.created_at.to_rfc3339(),
            ],
        )
        .context("Failed to insert turn record")?;

        for (seq, message) in record.messages.iter().enumerate() {
            let tool_calls = message
                .tool_calls
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .context("Failed to serialize tool calls")?;
            tx.execute(
                r#"INSERT INTO turn_messages
                   (turn_id, seq, role, content, tool_calls, tool_call_id)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
                params![
                    record.id,
                    seq as i64,
                    message.role,
                    message.text(),
                    tool_calls,
                    message.tool_call_id,
                ],
            )
            .context("Failed to insert turn message")?;
        }

        tx.commit().context("Failed to commit turn record")?;
        Ok(())
    }

    fn last_turn(&self, thread_id: &str) -> Result<Option<TurnRecord>> {
        let turns = self.recent_turns(thread_id, 1)?;
        Ok(turns.into_iter().next())
    }

    fn recent_turns(&self, thread_id: &str, limit: usize) -> Result<Vec<TurnRecord>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT id, thread_id, inbound_message, answer_text, delivered_text,
                      trigger_name, escalation_needed, escalation_reason, sink_outcomes,
                      error, created_at
               FROM turns WHERE thread_id = ?1
               ORDER BY created_at DESC LIMIT ?2"#,
        )?;

        let mut turns: Vec<TurnRecord> = stmt
            .query_map(params![thread_id, limit as i64], Self::row_to_record)?
            .collect::<rusqlite::Result<_>>()
            .context("Failed to read turn records")?;

        let mut msg_stmt = conn.prepare(
            r#"SELECT role, content, tool_calls, tool_call_id
               FROM turn_messages WHERE turn_id = ?1 ORDER BY seq"#,
        )?;
        for turn in &mut turns {
            turn.messages = msg_stmt
                .query_map(params![turn.id], Self::row_to_message)?
                .collect::<rusqlite::Result<_>>()
                .context("Failed to read turn messages")?;
        }

        // Newest last, matching the in-memory store
        turns.reverse();
        Ok(turns)
    }
}
