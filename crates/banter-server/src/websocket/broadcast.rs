//! Broadcast fan-out over the connection registry.
//!
//! Every send path serializes its frame exactly once and shares the
//! resulting `Arc<String>` across recipients. Fan-out works on a
//! snapshot of the target index taken up front, so no registry lock is
//! held while frames are queued and connections joining mid-broadcast
//! are simply not part of that broadcast.
//!
//! Failure policy per recipient:
//! - buffer full: the frame is dropped and counted; a connection that
//!   accumulates [`MAX_TOTAL_DROPS`] drops is disconnected as a lost
//!   cause (slow client protection)
//! - channel closed: the writer task is gone, so the connection is
//!   disconnected immediately
//!
//! Either way the rest of the fan-out proceeds; one bad connection
//! never fails a broadcast.

use std::sync::Arc;

use banter_core::{ChatMessage, ConnectionId, ErrorCode, OutboundFrame, SessionId, TenantId, UserId};
use metrics::counter;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::metrics::{WS_FRAMES_SENT_TOTAL, WS_SEND_DROPS_TOTAL};
use crate::websocket::connection::{ClientConnection, SendOutcome};
use crate::websocket::registry::ConnectionRegistry;

/// Total dropped frames after which a connection is considered a lost
/// cause and forcibly disconnected.
pub const MAX_TOTAL_DROPS: u64 = 100;

/// Routes frames to connections by id, user, session, or tenant.
#[derive(Debug)]
pub struct BroadcastRouter {
    registry: Arc<ConnectionRegistry>,
}

impl BroadcastRouter {
    /// Create a router over `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Send a frame to one connection. Returns whether it was queued.
    /// Unknown ids are a no-op: the target may have disconnected
    /// between snapshot and send, which is not an error.
    pub fn send_personal(&self, connection_id: &ConnectionId, frame: &OutboundFrame) -> bool {
        let Some(connection) = self.registry.lookup(connection_id) else {
            debug!(connection_id = %connection_id, "personal send to unknown connection dropped");
            return false;
        };
        let Some(payload) = encode(frame) else {
            return false;
        };
        let mut to_remove = Vec::new();
        let outcome = self.dispatch(&connection, &payload, &mut to_remove);
        self.reap(to_remove);
        outcome.is_sent()
    }

    /// Send a frame to every connection a user has, across sessions and
    /// devices. Returns the number of connections it was queued for.
    pub fn send_to_user(&self, user_id: &UserId, frame: &OutboundFrame) -> usize {
        let Some(payload) = encode(frame) else {
            return 0;
        };
        self.fan_out(self.registry.user_connections(user_id), &payload, None)
    }

    /// Send a frame to every connection in a session.
    pub fn send_to_session(&self, session_id: &SessionId, frame: &OutboundFrame) -> usize {
        let Some(payload) = encode(frame) else {
            return 0;
        };
        self.fan_out(self.registry.session_connections(session_id), &payload, None)
    }

    /// Send a frame to every connection under a tenant.
    pub fn send_to_tenant(&self, tenant_id: &TenantId, frame: &OutboundFrame) -> usize {
        let Some(payload) = encode(frame) else {
            return 0;
        };
        self.fan_out(self.registry.tenant_connections(tenant_id), &payload, None)
    }

    /// Broadcast a persisted chat message to its session. The sender's
    /// own connections receive the echo like everyone else's.
    pub fn broadcast_chat_message(&self, message: ChatMessage) -> usize {
        let session_id = message.session_id.clone();
        self.send_to_session(&session_id, &OutboundFrame::Message(message))
    }

    /// Broadcast a typing indicator to a session, skipping every
    /// connection that belongs to the typing user (their other tabs
    /// must not see their own indicator).
    pub fn broadcast_typing_indicator(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
        is_typing: bool,
    ) -> usize {
        let frame = OutboundFrame::Typing {
            user_id: user_id.clone(),
            is_typing,
            session_id: session_id.clone(),
        };
        let Some(payload) = encode(&frame) else {
            return 0;
        };
        self.fan_out(
            self.registry.session_connections(session_id),
            &payload,
            Some(user_id),
        )
    }

    /// Send an `error` frame to one connection.
    pub fn send_error(
        &self,
        connection_id: &ConnectionId,
        message: impl Into<String>,
        code: ErrorCode,
    ) -> bool {
        self.send_personal(connection_id, &OutboundFrame::error(message, code))
    }

    /// Send an arbitrary JSON payload to a session as-is. Used by the
    /// admin broadcast endpoint, which supplies the full frame.
    pub fn send_raw_to_session(&self, session_id: &SessionId, payload: &Value) -> usize {
        match serde_json::to_string(payload) {
            Ok(json) => self.fan_out(
                self.registry.session_connections(session_id),
                &Arc::new(json),
                None,
            ),
            Err(error) => {
                error!(%error, "failed to serialize raw broadcast payload");
                0
            }
        }
    }

    fn fan_out(
        &self,
        connections: Vec<Arc<ClientConnection>>,
        payload: &Arc<String>,
        exclude_user: Option<&UserId>,
    ) -> usize {
        let mut delivered = 0;
        let mut to_remove = Vec::new();
        for connection in &connections {
            if exclude_user.is_some_and(|user| connection.user_id == *user) {
                continue;
            }
            if self.dispatch(connection, payload, &mut to_remove).is_sent() {
                delivered += 1;
            }
        }
        self.reap(to_remove);
        delivered
    }

    fn dispatch(
        &self,
        connection: &Arc<ClientConnection>,
        payload: &Arc<String>,
        to_remove: &mut Vec<ConnectionId>,
    ) -> SendOutcome {
        let outcome = connection.send(Arc::clone(payload));
        match outcome {
            SendOutcome::Sent => counter!(WS_FRAMES_SENT_TOTAL).increment(1),
            SendOutcome::Full => {
                counter!(WS_SEND_DROPS_TOTAL).increment(1);
                let drops = connection.drop_count();
                if drops >= MAX_TOTAL_DROPS {
                    warn!(
                        connection_id = %connection.id,
                        drops,
                        "drop budget exhausted; disconnecting slow client"
                    );
                    to_remove.push(connection.id.clone());
                }
            }
            SendOutcome::Closed => {
                counter!(WS_SEND_DROPS_TOTAL).increment(1);
                debug!(
                    connection_id = %connection.id,
                    "send channel closed; disconnecting"
                );
                to_remove.push(connection.id.clone());
            }
        }
        outcome
    }

    fn reap(&self, to_remove: Vec<ConnectionId>) {
        for id in to_remove {
            let _ = self.registry.disconnect(&id);
        }
    }
}

fn encode(frame: &OutboundFrame) -> Option<Arc<String>> {
    match serde_json::to_string(frame) {
        Ok(json) => Some(Arc::new(json)),
        Err(error) => {
            error!(%error, "failed to serialize outbound frame");
            None
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use banter_core::{MessageId, MessageRole};
    use chrono::Utc;
    use serde_json::json;
    use tokio::sync::mpsc;

    struct Fixture {
        registry: Arc<ConnectionRegistry>,
        router: BroadcastRouter,
    }

    impl Fixture {
        fn new() -> Self {
            let registry = Arc::new(ConnectionRegistry::new());
            let router = BroadcastRouter::new(Arc::clone(&registry));
            Self { registry, router }
        }

        fn connect(
            &self,
            user: &str,
            session: &str,
        ) -> (Arc<ClientConnection>, mpsc::Receiver<Arc<String>>) {
            self.connect_with(user, "t1", session, 8)
        }

        fn connect_with(
            &self,
            user: &str,
            tenant: &str,
            session: &str,
            capacity: usize,
        ) -> (Arc<ClientConnection>, mpsc::Receiver<Arc<String>>) {
            let (tx, mut rx) = mpsc::channel(capacity);
            let connection = self.registry.connect(
                UserId::from(user),
                TenantId::from(tenant),
                SessionId::from(session),
                tx,
            );
            // Drop the greeting so tests see only what they broadcast.
            let greeting = rx.try_recv().unwrap();
            assert!(greeting.contains("\"connection\""));
            (connection, rx)
        }
    }

    fn pong() -> OutboundFrame {
        OutboundFrame::pong_now()
    }

    fn chat_message(session: &str, user: Option<&str>, text: &str) -> ChatMessage {
        ChatMessage {
            id: MessageId::new(),
            session_id: SessionId::from(session),
            user_id: user.map(UserId::from),
            message: text.to_owned(),
            message_type: if user.is_some() {
                MessageRole::User
            } else {
                MessageRole::Assistant
            },
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    fn as_json(payload: &Arc<String>) -> Value {
        serde_json::from_str(payload).unwrap()
    }

    #[tokio::test]
    async fn personal_send_reaches_only_the_target() {
        let fx = Fixture::new();
        let (a, mut rx_a) = fx.connect("u1", "s1");
        let (_b, mut rx_b) = fx.connect("u2", "s1");

        assert!(fx.router.send_personal(&a.id, &pong()));
        assert_eq!(as_json(&rx_a.recv().await.unwrap())["type"], "pong");
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn personal_send_to_unknown_connection_is_noop() {
        let fx = Fixture::new();
        assert!(!fx.router.send_personal(&ConnectionId::from("ghost"), &pong()));
    }

    #[tokio::test]
    async fn session_broadcast_reaches_every_member() {
        let fx = Fixture::new();
        let (_a, mut rx_a) = fx.connect("u1", "s1");
        let (_b, mut rx_b) = fx.connect("u2", "s1");
        let (_c, mut rx_c) = fx.connect("u3", "s1");
        let (_d, mut rx_d) = fx.connect("u4", "s2");

        let delivered = fx.router.send_to_session(&SessionId::from("s1"), &pong());
        assert_eq!(delivered, 3);
        for rx in [&mut rx_a, &mut rx_b, &mut rx_c] {
            assert_eq!(as_json(&rx.recv().await.unwrap())["type"], "pong");
        }
        assert!(rx_d.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_serializes_once_and_shares_the_payload() {
        let fx = Fixture::new();
        let (_a, mut rx_a) = fx.connect("u1", "s1");
        let (_b, mut rx_b) = fx.connect("u2", "s1");

        let _ = fx.router.send_to_session(&SessionId::from("s1"), &pong());
        let payload_a = rx_a.recv().await.unwrap();
        let payload_b = rx_b.recv().await.unwrap();
        assert!(Arc::ptr_eq(&payload_a, &payload_b));
    }

    #[tokio::test]
    async fn user_broadcast_spans_sessions_and_devices() {
        let fx = Fixture::new();
        let (_a, mut rx_a) = fx.connect("u1", "s1");
        let (_b, mut rx_b) = fx.connect("u1", "s2");
        let (_c, mut rx_c) = fx.connect("u2", "s1");

        let delivered = fx.router.send_to_user(&UserId::from("u1"), &pong());
        assert_eq!(delivered, 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn tenant_broadcast_stays_inside_the_tenant() {
        let fx = Fixture::new();
        let (_a, mut rx_a) = fx.connect_with("u1", "acme", "s1", 8);
        let (_b, mut rx_b) = fx.connect_with("u2", "acme", "s2", 8);
        let (_c, mut rx_c) = fx.connect_with("u3", "globex", "s3", 8);

        let delivered = fx.router.send_to_tenant(&TenantId::from("acme"), &pong());
        assert_eq!(delivered, 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn chat_broadcast_echoes_to_the_sender_too() {
        let fx = Fixture::new();
        let (_sender, mut rx_sender) = fx.connect("u1", "s1");
        let (_peer, mut rx_peer) = fx.connect("u2", "s1");

        let delivered = fx
            .router
            .broadcast_chat_message(chat_message("s1", Some("u1"), "hello"));
        assert_eq!(delivered, 2);
        let echoed = as_json(&rx_sender.recv().await.unwrap());
        assert_eq!(echoed["type"], "message");
        assert_eq!(echoed["data"]["message"], "hello");
        assert_eq!(echoed["data"]["user_id"], "u1");
        assert!(rx_peer.try_recv().is_ok());
    }

    #[tokio::test]
    async fn typing_skips_every_connection_of_the_typist() {
        let fx = Fixture::new();
        let (_tab1, mut rx_tab1) = fx.connect("u1", "s1");
        let (_tab2, mut rx_tab2) = fx.connect("u1", "s1");
        let (_peer, mut rx_peer) = fx.connect("u2", "s1");

        let delivered =
            fx.router
                .broadcast_typing_indicator(&UserId::from("u1"), &SessionId::from("s1"), true);
        assert_eq!(delivered, 1);
        assert!(rx_tab1.try_recv().is_err());
        assert!(rx_tab2.try_recv().is_err());
        let frame = as_json(&rx_peer.recv().await.unwrap());
        assert_eq!(frame["type"], "typing");
        assert_eq!(frame["data"]["user_id"], "u1");
        assert_eq!(frame["data"]["is_typing"], true);
        assert_eq!(frame["data"]["session_id"], "s1");
    }

    #[tokio::test]
    async fn typing_alone_in_session_reaches_no_one() {
        let fx = Fixture::new();
        let (_only, mut rx) = fx.connect("u1", "s1");
        let delivered =
            fx.router
                .broadcast_typing_indicator(&UserId::from("u1"), &SessionId::from("s1"), true);
        assert_eq!(delivered, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_channel_removes_connection_and_spares_the_rest() {
        let fx = Fixture::new();
        let (dead, rx_dead) = fx.connect("u1", "s1");
        let (_b, mut rx_b) = fx.connect("u2", "s1");
        let (_c, mut rx_c) = fx.connect("u3", "s1");
        drop(rx_dead);

        let delivered = fx.router.send_to_session(&SessionId::from("s1"), &pong());
        assert_eq!(delivered, 2);
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_c.try_recv().is_ok());
        assert!(fx.registry.lookup(&dead.id).is_none());
        assert_eq!(fx.registry.connection_count(), 2);
    }

    #[tokio::test]
    async fn full_buffer_drops_frame_but_keeps_connection() {
        let fx = Fixture::new();
        // Capacity 1 and nothing draining: the first send fills it.
        let (slow, _rx) = fx.connect_with("u1", "t1", "s1", 1);
        assert_eq!(fx.router.send_to_session(&SessionId::from("s1"), &pong()), 1);
        assert_eq!(fx.router.send_to_session(&SessionId::from("s1"), &pong()), 0);
        assert_eq!(slow.drop_count(), 1);
        assert!(fx.registry.lookup(&slow.id).is_some());
    }

    #[tokio::test]
    async fn exhausted_drop_budget_disconnects_slow_client() {
        let fx = Fixture::new();
        let (slow, _rx) = fx.connect_with("u1", "t1", "s1", 1);
        // Fill the buffer, then drop until the budget runs out.
        let _ = fx.router.send_to_session(&SessionId::from("s1"), &pong());
        for _ in 0..MAX_TOTAL_DROPS {
            let _ = fx.router.send_to_session(&SessionId::from("s1"), &pong());
        }
        assert!(fx.registry.lookup(&slow.id).is_none());
        assert!(slow.drop_count() >= MAX_TOTAL_DROPS);
    }

    #[tokio::test]
    async fn send_error_carries_code_on_the_wire() {
        let fx = Fixture::new();
        let (a, mut rx) = fx.connect("u1", "s1");
        assert!(fx.router.send_error(&a.id, "Invalid JSON format", ErrorCode::InvalidJson));
        let frame = as_json(&rx.recv().await.unwrap());
        assert_eq!(frame["type"], "error");
        assert_eq!(frame["data"]["error"], "Invalid JSON format");
        assert_eq!(frame["data"]["error_code"], "INVALID_JSON");
    }

    #[tokio::test]
    async fn raw_broadcast_passes_payload_through_unchanged() {
        let fx = Fixture::new();
        let (_a, mut rx) = fx.connect("u1", "s1");
        let payload = json!({"type": "announcement", "data": {"text": "maintenance at noon"}});
        let delivered = fx.router.send_raw_to_session(&SessionId::from("s1"), &payload);
        assert_eq!(delivered, 1);
        assert_eq!(as_json(&rx.recv().await.unwrap()), payload);
    }

    #[tokio::test]
    async fn broadcast_to_empty_session_delivers_nothing() {
        let fx = Fixture::new();
        assert_eq!(fx.router.send_to_session(&SessionId::from("empty"), &pong()), 0);
    }

    #[tokio::test]
    async fn assistant_message_without_user_id_serializes_null() {
        let fx = Fixture::new();
        let (_a, mut rx) = fx.connect("u1", "s1");
        let _ = fx
            .router
            .broadcast_chat_message(chat_message("s1", None, "reply"));
        let frame = as_json(&rx.recv().await.unwrap());
        assert_eq!(frame["data"]["user_id"], Value::Null);
        assert_eq!(frame["data"]["message_type"], "assistant");
    }
}
