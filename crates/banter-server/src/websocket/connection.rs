//! Per-connection state.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use banter_core::{ConnectionId, OutboundFrame, SessionId, TenantId, UserId};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Result of a non-blocking enqueue onto a connection's send buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The frame was queued for the writer task.
    Sent,
    /// The buffer was full; the frame was dropped.
    Full,
    /// The writer task is gone; the connection is effectively dead.
    Closed,
}

impl SendOutcome {
    /// Whether the frame made it onto the buffer.
    pub fn is_sent(self) -> bool {
        matches!(self, Self::Sent)
    }
}

/// One live WebSocket connection.
///
/// Identity is fixed at registration: a connection belongs to exactly
/// one user, tenant, and session for its whole life. Everything mutable
/// (liveness, drop counter) is atomic, so senders never need `&mut`.
#[derive(Debug)]
pub struct ClientConnection {
    /// Unique id assigned at registration.
    pub id: ConnectionId,
    /// The authenticated user behind this socket.
    pub user_id: UserId,
    /// The tenant the user belongs to.
    pub tenant_id: TenantId,
    /// The chat session this socket joined.
    pub session_id: SessionId,
    tx: mpsc::Sender<Arc<String>>,
    cancel: CancellationToken,
    connected_at: Instant,
    is_alive: AtomicBool,
    last_pong: Mutex<Instant>,
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a connection backed by `tx`, the sending half of its
    /// writer task's buffer.
    pub fn new(
        id: ConnectionId,
        user_id: UserId,
        tenant_id: TenantId,
        session_id: SessionId,
        tx: mpsc::Sender<Arc<String>>,
    ) -> Self {
        Self {
            id,
            user_id,
            tenant_id,
            session_id,
            tx,
            cancel: CancellationToken::new(),
            connected_at: Instant::now(),
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(Instant::now()),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Token the connection task watches; cancelled when the connection
    /// is removed from the registry so the socket actually closes.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Ask the connection task to close its socket.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Enqueue a pre-serialized frame without blocking. A full buffer
    /// or a closed channel counts against [`Self::drop_count`].
    pub fn send(&self, message: Arc<String>) -> SendOutcome {
        match self.tx.try_send(message) {
            Ok(()) => SendOutcome::Sent,
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped_messages.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    connection_id = %self.id,
                    dropped,
                    "send buffer full; dropping frame"
                );
                SendOutcome::Full
            }
            Err(TrySendError::Closed(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                SendOutcome::Closed
            }
        }
    }

    /// Serialize `frame` and enqueue it. Returns whether it was queued.
    pub fn send_frame(&self, frame: &OutboundFrame) -> bool {
        match serde_json::to_string(frame) {
            Ok(json) => self.send(Arc::new(json)).is_sent(),
            Err(error) => {
                warn!(connection_id = %self.id, %error, "failed to serialize frame");
                false
            }
        }
    }

    /// Total frames dropped on this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record pong (or any inbound traffic) as proof of life.
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Consume the liveness flag: returns whether the connection was
    /// seen alive since the previous check, and clears the flag so the
    /// next ping must be answered to set it again.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Time since the last recorded pong.
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Time since registration.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
