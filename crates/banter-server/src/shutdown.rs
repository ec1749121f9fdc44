//! Coordinated shutdown.
//!
//! One [`ShutdownCoordinator`] is shared by the HTTP acceptor and every
//! connection task. Triggering it cancels the token each of them
//! watches; `graceful_shutdown` then waits (bounded) for the spawned
//! tasks to drain.

use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long `graceful_shutdown` waits for tasks when no explicit
/// timeout is given.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Broadcasts a cancellation signal and waits for task drain.
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a coordinator that has not yet been triggered.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Token for tasks to watch. Cloned tokens all observe the same
    /// cancellation.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Trigger shutdown. Idempotent.
    pub fn shutdown(&self) {
        if !self.token.is_cancelled() {
            info!("shutdown signal issued");
            self.token.cancel();
        }
    }

    /// Whether shutdown has been triggered.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Trigger shutdown and wait for `handles` to finish, up to
    /// `timeout` (defaults to [`DEFAULT_SHUTDOWN_TIMEOUT`]). Tasks still
    /// running at the deadline are abandoned with a warning.
    pub async fn graceful_shutdown(&self, handles: Vec<JoinHandle<()>>, timeout: Option<Duration>) {
        self.shutdown();
        if handles.is_empty() {
            return;
        }
        let deadline = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        let drained = tokio::time::timeout(deadline, join_all(handles)).await;
        match drained {
            Ok(results) => {
                let panicked = results.iter().filter(|r| r.is_err()).count();
                if panicked > 0 {
                    warn!(count = panicked, "tasks panicked during shutdown");
                } else {
                    info!("all tasks drained");
                }
            }
            Err(_) => {
                warn!(timeout_secs = deadline.as_secs(), "shutdown timed out; abandoning tasks");
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
