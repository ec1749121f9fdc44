//! Chat message entities.
//!
//! [`ChatMessage`] is the persisted form of one turn: it exists only after
//! the store has assigned an id and timestamp, and is never mutated
//! afterwards. [`NewChatMessage`] is the insert form the ingest pipeline
//! constructs before handing the turn to the store.
//!
//! Assistant turns carry `user_id: None`; `message_type` is what
//! distinguishes the two sides of a turn on the wire and in storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{MessageId, SessionId, UserId};

/// Which side of a chat turn a message belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Message typed by a human participant.
    User,
    /// Reply produced by the responder.
    Assistant,
}

impl MessageRole {
    /// Stable string form used in storage and on the wire.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted chat message, as returned by the store.
///
/// Serializes to the exact payload broadcast in `message` frames:
/// `{id, session_id, user_id, message, message_type, timestamp, metadata}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Store-assigned message id.
    pub id: MessageId,
    /// Session the message belongs to.
    pub session_id: SessionId,
    /// Author; `None` for assistant turns.
    pub user_id: Option<UserId>,
    /// Message text.
    pub message: String,
    /// User or assistant turn.
    pub message_type: MessageRole,
    /// Store-assigned creation time (UTC).
    pub timestamp: DateTime<Utc>,
    /// Free-form JSON attached to the message.
    pub metadata: Option<Value>,
}

/// Insert form of a chat message; the store assigns id and timestamp.
#[derive(Clone, Debug, PartialEq)]
pub struct NewChatMessage {
    /// Session the message belongs to.
    pub session_id: SessionId,
    /// Author; `None` for assistant turns.
    pub user_id: Option<UserId>,
    /// Message text.
    pub message: String,
    /// User or assistant turn.
    pub message_type: MessageRole,
    /// Free-form JSON attached to the message.
    pub metadata: Option<Value>,
}

impl NewChatMessage {
    /// Build a user turn.
    #[must_use]
    pub fn user(
        session_id: SessionId,
        user_id: UserId,
        message: String,
        metadata: Option<Value>,
    ) -> Self {
        Self {
            session_id,
            user_id: Some(user_id),
            message,
            message_type: MessageRole::User,
            metadata,
        }
    }

    /// Build an assistant turn (no author).
    #[must_use]
    pub fn assistant(session_id: SessionId, message: String, metadata: Option<Value>) -> Self {
        Self {
            session_id,
            user_id: None,
            message,
            message_type: MessageRole::Assistant,
            metadata,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&MessageRole::User).unwrap(), "\"user\"");
        assert_eq!(
            serde_json::to_string(&MessageRole::Assistant).unwrap(),
            "\"assistant\""
        );
    }

    #[test]
    fn user_constructor_sets_author() {
        let m = NewChatMessage::user(
            SessionId::from("s1"),
            UserId::from("u1"),
            "hello".to_owned(),
            None,
        );
        assert_eq!(m.user_id, Some(UserId::from("u1")));
        assert_eq!(m.message_type, MessageRole::User);
    }

    #[test]
    fn assistant_constructor_has_no_author() {
        let m = NewChatMessage::assistant(SessionId::from("s1"), "hi".to_owned(), None);
        assert_eq!(m.user_id, None);
        assert_eq!(m.message_type, MessageRole::Assistant);
    }

    #[test]
    fn chat_message_wire_shape() {
        let msg = ChatMessage {
            id: MessageId::from("m1"),
            session_id: SessionId::from("s1"),
            user_id: Some(UserId::from("u1")),
            message: "hello".to_owned(),
            message_type: MessageRole::User,
            timestamp: DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            metadata: Some(json!({"client": "web"})),
        };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["id"], "m1");
        assert_eq!(v["session_id"], "s1");
        assert_eq!(v["user_id"], "u1");
        assert_eq!(v["message_type"], "user");
        assert_eq!(v["metadata"]["client"], "web");
        assert!(v["timestamp"].as_str().unwrap().starts_with("2025-01-01"));
    }

    #[test]
    fn assistant_user_id_serializes_null() {
        let msg = ChatMessage {
            id: MessageId::from("m2"),
            session_id: SessionId::from("s1"),
            user_id: None,
            message: "hi".to_owned(),
            message_type: MessageRole::Assistant,
            timestamp: Utc::now(),
            metadata: None,
        };
        let v = serde_json::to_value(&msg).unwrap();
        assert!(v["user_id"].is_null(), "assistant turns have no author");
        assert_eq!(v["message_type"], "assistant");
    }
}
