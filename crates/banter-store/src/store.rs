//! The [`MessageStore`] trait and its `SQLite` implementation.
//!
//! The ingest pipeline writes through the trait so tests (and future
//! network-backed stores) can substitute their own implementation. The
//! `SQLite` store assigns ids and timestamps at save time and runs all
//! database work on the blocking thread pool.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde_json::Value;

use banter_core::{ChatMessage, MessageId, MessageRole, NewChatMessage, SessionId};

use crate::connection::{ConnectionConfig, ConnectionPool, new_in_memory};
use crate::errors::{Result, StoreError};
use crate::migrations::run_migrations;

/// Persistence seam for chat turns.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist one message, assigning its id and timestamp.
    async fn save(&self, message: NewChatMessage) -> Result<ChatMessage>;

    /// The most recent `limit` messages in a session, oldest first.
    async fn messages_for_session(
        &self,
        session_id: &SessionId,
        limit: usize,
    ) -> Result<Vec<ChatMessage>>;
}

/// `SQLite`-backed [`MessageStore`].
pub struct SqliteMessageStore {
    pool: ConnectionPool,
}

impl SqliteMessageStore {
    /// Create a store over an existing pool, applying pending migrations.
    pub fn new(pool: ConnectionPool) -> Result<Self> {
        let conn = pool.get()?;
        let _ = run_migrations(&conn)?;
        drop(conn);
        Ok(Self { pool })
    }

    /// Create an in-memory store (tests, development).
    pub fn in_memory() -> Result<Self> {
        Self::new(new_in_memory(&ConnectionConfig::default())?)
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn save(&self, message: NewChatMessage) -> Result<ChatMessage> {
        let pool = self.pool.clone();
        let stored = ChatMessage {
            id: MessageId::new(),
            session_id: message.session_id,
            user_id: message.user_id,
            message: message.message,
            message_type: message.message_type,
            timestamp: Utc::now(),
            metadata: message.metadata,
        };
        let row = stored.clone();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = pool.get()?;
            let _ = conn.execute(
                "INSERT INTO messages \
                 (id, session_id, user_id, message, message_type, timestamp, metadata) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    row.id.as_str(),
                    row.session_id.as_str(),
                    row.user_id.as_ref().map(AsRef::<str>::as_ref),
                    row.message,
                    row.message_type.as_str(),
                    row.timestamp.to_rfc3339(),
                    row.metadata,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Internal(format!("save task failed: {e}")))??;

        Ok(stored)
    }

    async fn messages_for_session(
        &self,
        session_id: &SessionId,
        limit: usize,
    ) -> Result<Vec<ChatMessage>> {
        let pool = self.pool.clone();
        let session = session_id.clone();

        let mut messages = tokio::task::spawn_blocking(move || -> Result<Vec<ChatMessage>> {
            let conn = pool.get()?;
            let mut stmt = conn.prepare(
                "SELECT id, session_id, user_id, message, message_type, timestamp, metadata \
                 FROM messages WHERE session_id = ?1 \
                 ORDER BY timestamp DESC, id DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(
                rusqlite::params![session.as_str(), i64::try_from(limit).unwrap_or(i64::MAX)],
                row_to_message,
            )?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await
        .map_err(|e| StoreError::Internal(format!("list task failed: {e}")))??;

        // Query returns newest-first for the LIMIT; callers want chronological.
        messages.reverse();
        Ok(messages)
    }
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<ChatMessage> {
    let timestamp: String = row.get(5)?;
    let timestamp = DateTime::parse_from_rfc3339(&timestamp)
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                5,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })?
        .with_timezone(&Utc);

    let role: String = row.get(4)?;
    let message_type = match role.as_str() {
        "user" => MessageRole::User,
        "assistant" => MessageRole::Assistant,
        other => {
            return Err(rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                format!("unknown message_type: {other}").into(),
            ));
        }
    };

    Ok(ChatMessage {
        id: MessageId::from_string(row.get(0)?),
        session_id: SessionId::from_string(row.get(1)?),
        user_id: row.get::<_, Option<String>>(2)?.map(Into::into),
        message: row.get(3)?,
        message_type,
        timestamp,
        metadata: row.get::<_, Option<Value>>(6)?,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
