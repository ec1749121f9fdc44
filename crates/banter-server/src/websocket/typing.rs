//! Typing indicator relay.
//!
//! Typing state is ephemeral: it is never persisted and never
//! acknowledged, only fanned out to the rest of the session. The relay
//! is deliberately a separate component so the ingest pipeline depends
//! on "relay typing" rather than on broadcast internals.

use std::sync::Arc;

use banter_core::{SessionId, UserId};
use tracing::debug;

use crate::websocket::broadcast::BroadcastRouter;

/// Forwards typing-state changes to session peers.
#[derive(Debug, Clone)]
pub struct TypingRelay {
    router: Arc<BroadcastRouter>,
}

impl TypingRelay {
    /// Create a relay that fans out through `router`.
    pub fn new(router: Arc<BroadcastRouter>) -> Self {
        Self { router }
    }

    /// Relay a typing-state change from `user_id` to everyone else in
    /// the session. Returns how many connections it reached.
    pub fn relay(&self, user_id: &UserId, session_id: &SessionId, is_typing: bool) -> usize {
        let reached = self
            .router
            .broadcast_typing_indicator(user_id, session_id, is_typing);
        debug!(
            user_id = %user_id,
            session_id = %session_id,
            is_typing,
            reached,
            "typing indicator relayed"
        );
        reached
    }
}
