//! WebSocket wire frames for the chat protocol.
//!
//! Both directions use the envelope `{"type": <tag>, "data": {...}}`.
//!
//! - [`InboundFrame`]: what clients send (`chat`, `typing`, `ping`). Decoding
//!   is a closed two-step parse: the envelope first, then the typed payload,
//!   so dispatch downstream is an exhaustive `match` rather than string
//!   comparison. Missing `data` is tolerated where the payload has defaults.
//! - [`OutboundFrame`]: what the server sends (`connection`, `message`,
//!   `typing`, `pong`, `error`). Serialized once per fan-out, shared between
//!   recipients.
//!
//! Frames are ephemeral and never persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::ids::{ConnectionId, SessionId, UserId};
use crate::message::ChatMessage;

/// Greeting text sent in the `connection` frame after a successful connect.
pub const CONNECTED_MESSAGE: &str = "Successfully connected to chat";

// ─────────────────────────────────────────────────────────────────────────────
// Error codes
// ─────────────────────────────────────────────────────────────────────────────

/// Machine-readable error codes carried by `error` frames.
///
/// Clients treat unknown codes as generic failures, so additions are
/// backwards-compatible; removals are not.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Inbound text was not valid JSON.
    #[serde(rename = "INVALID_JSON")]
    InvalidJson,
    /// Envelope `type` was absent or not a known frame kind.
    #[serde(rename = "INVALID_MESSAGE_TYPE")]
    InvalidMessageType,
    /// A chat turn failed after the user message may already be visible.
    #[serde(rename = "MESSAGE_PROCESSING_ERROR")]
    MessageProcessingError,
    /// Unexpected failure while handling a single frame.
    #[serde(rename = "SERVER_ERROR")]
    ServerError,
    /// Connection-level failure outside the per-frame path.
    #[serde(rename = "CONNECTION_ERROR")]
    ConnectionError,
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbound frames
// ─────────────────────────────────────────────────────────────────────────────

/// Server-to-client frames.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum OutboundFrame {
    /// Sent once, immediately after the connection is registered.
    Connection {
        /// Always `"connected"`.
        status: String,
        /// Registry-assigned id for this connection.
        connection_id: ConnectionId,
        /// Human-readable greeting.
        message: String,
    },
    /// One persisted chat message (user or assistant turn).
    Message(ChatMessage),
    /// Another participant started or stopped typing.
    Typing {
        /// User whose typing state changed.
        user_id: UserId,
        /// Whether that user is currently typing.
        is_typing: bool,
        /// Session the indicator applies to.
        session_id: SessionId,
    },
    /// Reply to a client `ping`.
    Pong {
        /// Server time when the ping was handled.
        timestamp: DateTime<Utc>,
    },
    /// Something went wrong; the connection stays open.
    Error {
        /// Human-readable description.
        error: String,
        /// Machine-readable code.
        error_code: ErrorCode,
    },
}

impl OutboundFrame {
    /// The `connection` greeting for a freshly registered connection.
    #[must_use]
    pub fn connected(connection_id: ConnectionId) -> Self {
        Self::Connection {
            status: "connected".to_owned(),
            connection_id,
            message: CONNECTED_MESSAGE.to_owned(),
        }
    }

    /// A `pong` stamped with the current time.
    #[must_use]
    pub fn pong_now() -> Self {
        Self::Pong {
            timestamp: Utc::now(),
        }
    }

    /// An `error` frame with the given description and code.
    #[must_use]
    pub fn error(error: impl Into<String>, error_code: ErrorCode) -> Self {
        Self::Error {
            error: error.into(),
            error_code,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Inbound frames
// ─────────────────────────────────────────────────────────────────────────────

/// Client-to-server frames, decoded.
#[derive(Clone, Debug, PartialEq)]
pub enum InboundFrame {
    /// A chat message to persist, broadcast, and answer.
    Chat(ChatInbound),
    /// A typing-state change to relay to the session.
    Typing(TypingInbound),
    /// Application-level liveness probe; answered with `pong`.
    Ping,
}

/// Payload of an inbound `chat` frame.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ChatInbound {
    /// Message text; empty or whitespace-only is silently ignored upstream.
    pub message: String,
    /// Optional client-supplied metadata, stored with the user turn.
    pub metadata: Option<Value>,
}

/// Payload of an inbound `typing` frame.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct TypingInbound {
    /// Whether the sender is currently typing. Absent means `false`.
    pub is_typing: bool,
}

/// Why an inbound frame could not be decoded.
#[derive(Debug, Error)]
pub enum FrameDecodeError {
    /// The text was not valid JSON at all.
    #[error("invalid JSON frame")]
    InvalidJson(#[source] serde_json::Error),

    /// The envelope `type` was absent or not one of the known kinds.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// The envelope was fine but the typed payload did not parse.
    #[error("invalid payload for {kind} frame")]
    Payload {
        /// Frame kind whose payload failed to parse.
        kind: &'static str,
        /// Underlying decode failure.
        #[source]
        source: serde_json::Error,
    },
}

impl FrameDecodeError {
    /// The machine-readable code an `error` frame should carry for this
    /// failure.
    #[must_use]
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::InvalidJson(_) => ErrorCode::InvalidJson,
            Self::UnknownType(_) => ErrorCode::InvalidMessageType,
            Self::Payload { .. } => ErrorCode::ServerError,
        }
    }

    /// The human-readable description an `error` frame should carry.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            Self::InvalidJson(_) => "Invalid JSON format".to_owned(),
            Self::UnknownType(kind) => format!("Unknown message type: {kind}"),
            Self::Payload { .. } => "Internal server error".to_owned(),
        }
    }
}

impl InboundFrame {
    /// Decode one inbound text frame.
    ///
    /// Tolerant in the same places the protocol has always been tolerant:
    /// a missing `data` object is treated as empty, and unknown envelope
    /// types are a per-frame error rather than a connection-terminal one.
    pub fn parse(text: &str) -> Result<Self, FrameDecodeError> {
        let value: Value =
            serde_json::from_str(text).map_err(FrameDecodeError::InvalidJson)?;

        let kind = match value.get("type") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => "none".to_owned(),
        };

        let data = match value.get("data") {
            Some(d) if !d.is_null() => d.clone(),
            _ => Value::Object(serde_json::Map::new()),
        };

        match kind.as_str() {
            "chat" => serde_json::from_value(data)
                .map(Self::Chat)
                .map_err(|source| FrameDecodeError::Payload {
                    kind: "chat",
                    source,
                }),
            "typing" => serde_json::from_value(data)
                .map(Self::Typing)
                .map_err(|source| FrameDecodeError::Payload {
                    kind: "typing",
                    source,
                }),
            "ping" => Ok(Self::Ping),
            _ => Err(FrameDecodeError::UnknownType(kind)),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
