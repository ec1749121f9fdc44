//! Server wiring: shared application state and the serve loop.
//!
//! Collaborators (store, responder, authenticator) are injected as
//! trait objects, so tests and the gateway binary decide what backs
//! them; nothing in here reaches for a global.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use banter_responder::Responder;
use banter_store::MessageStore;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::auth::Authenticator;
use crate::config::ServerConfig;
use crate::routes;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::broadcast::BroadcastRouter;
use crate::websocket::registry::ConnectionRegistry;
use crate::websocket::stats::StatsReporter;
use crate::websocket::typing::TypingRelay;

/// Handles shared by every request handler and connection task.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration, fixed at boot.
    pub config: Arc<ServerConfig>,
    /// Live connection registry.
    pub registry: Arc<ConnectionRegistry>,
    /// Frame fan-out over the registry.
    pub broadcast: Arc<BroadcastRouter>,
    /// Typing indicator relay.
    pub typing: TypingRelay,
    /// Read-only stats over the registry.
    pub stats: StatsReporter,
    /// Chat message persistence.
    pub store: Arc<dyn MessageStore>,
    /// Reply generation for chat turns.
    pub responder: Arc<dyn Responder>,
    /// Token resolution for the WebSocket endpoint.
    pub authenticator: Arc<dyn Authenticator>,
    /// Shutdown signal shared with every connection task.
    pub shutdown: ShutdownCoordinator,
    /// Process start, for uptime reporting.
    pub start_time: Instant,
}

impl AppState {
    /// Wire up fresh state around the injected collaborators.
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn MessageStore>,
        responder: Arc<dyn Responder>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcast = Arc::new(BroadcastRouter::new(Arc::clone(&registry)));
        Self {
            config: Arc::new(config),
            typing: TypingRelay::new(Arc::clone(&broadcast)),
            stats: StatsReporter::new(Arc::clone(&registry)),
            registry,
            broadcast,
            store,
            responder,
            authenticator,
            shutdown: ShutdownCoordinator::new(),
            start_time: Instant::now(),
        }
    }
}

/// The chat gateway: owns the state and serves the router.
pub struct GatewayServer {
    state: AppState,
}

impl GatewayServer {
    /// Build a server around the injected collaborators. Installs the
    /// process-wide metrics recorder on first construction.
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn MessageStore>,
        responder: Arc<dyn Responder>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Self {
        let _ = crate::metrics::recorder_handle();
        Self {
            state: AppState::new(config, store, responder, authenticator),
        }
    }

    /// The shared state, for inspection and tests.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// The application router over this server's state.
    pub fn router(&self) -> Router {
        routes::router(self.state.clone())
    }

    /// Bind the configured address and start serving. Returns the bound
    /// address (useful with port 0) and the serve task handle; the task
    /// drains once [`Self::shutdown`] is triggered.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let bind_addr = format!("{}:{}", self.state.config.host, self.state.config.port);
        let listener = TcpListener::bind(&bind_addr).await?;
        let addr = listener.local_addr()?;
        info!(%addr, "gateway listening");

        let app = self.router();
        let token = self.state.shutdown.token();
        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(serve_error) = served {
                error!(error = %serve_error, "serve loop failed");
            }
        });
        Ok((addr, handle))
    }

    /// Trigger shutdown: stops accepting and closes every connection.
    pub fn shutdown(&self) {
        self.state.shutdown.shutdown();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
