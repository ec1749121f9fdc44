//! # banter-responder
//!
//! The reply-generation seam for the banter backend.
//!
//! The ingest pipeline calls [`Responder::generate`] once per user turn and
//! treats the result uniformly: `Ok(Some(text))` becomes the assistant turn,
//! `Ok(None)` means "no reply" (reported to the session as a processing
//! error), and `Err` is handled the same way as no reply. Implementations
//! never panic to signal absence.
//!
//! The real deployment plugs an LLM client in here; [`CannedResponder`] is
//! the development and test implementation.

#![deny(unsafe_code)]

use async_trait::async_trait;
use thiserror::Error;

use banter_core::{SessionId, TenantId, UserId};

/// Result type alias for responder operations.
pub type ResponderResult<T> = Result<T, ResponderError>;

/// Errors a responder implementation can surface.
///
/// The pipeline applies its own deadline on top of `generate`, so
/// [`ResponderError::Timeout`] is for implementations with internal
/// deadlines of their own.
#[derive(Debug, Error)]
pub enum ResponderError {
    /// The implementation gave up waiting on its backend.
    #[error("responder timed out after {elapsed_ms}ms")]
    Timeout {
        /// How long the implementation waited.
        elapsed_ms: u64,
    },

    /// The backing model/service failed.
    #[error("upstream failure: {message}")]
    Upstream {
        /// Error description.
        message: String,
    },

    /// Implementation-specific error.
    #[error("{message}")]
    Other {
        /// Error description.
        message: String,
    },
}

/// Generates assistant replies to user messages.
///
/// Implementors must be `Send + Sync` for use across connection tasks.
#[async_trait]
pub trait Responder: Send + Sync {
    /// Implementation identifier for logs (e.g. `"canned"`).
    fn name(&self) -> &str;

    /// Produce a reply to `message`, or `Ok(None)` when there is nothing to
    /// say.
    async fn generate(
        &self,
        message: &str,
        session_id: &SessionId,
        user_id: &UserId,
        tenant_id: &TenantId,
    ) -> ResponderResult<Option<String>>;
}

/// A responder that always returns the same reply.
///
/// Stands in for the model backend in development and tests.
pub struct CannedResponder {
    reply: Option<String>,
}

impl CannedResponder {
    /// Always reply with `reply`.
    #[must_use]
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: Some(reply.into()),
        }
    }

    /// Never reply (`Ok(None)` on every call).
    #[must_use]
    pub fn silent() -> Self {
        Self { reply: None }
    }
}

impl Default for CannedResponder {
    fn default() -> Self {
        Self::new("I'm not connected to a model yet, but I received your message.")
    }
}

#[async_trait]
impl Responder for CannedResponder {
    fn name(&self) -> &str {
        "canned"
    }

    async fn generate(
        &self,
        _message: &str,
        _session_id: &SessionId,
        _user_id: &UserId,
        _tenant_id: &TenantId,
    ) -> ResponderResult<Option<String>> {
        Ok(self.reply.clone())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
