//! HTTP and WebSocket server for the banter chat backend.
//!
//! Serves the realtime chat surface: a WebSocket endpoint per chat
//! session, a connection registry with per-user / per-session /
//! per-tenant indices, broadcast fan-out with slow-client protection,
//! and a small set of operational REST endpoints (stats, participants,
//! admin broadcast, forced disconnect).

#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod health;
pub mod metrics;
pub mod routes;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use auth::{AuthContext, AuthError, Authenticator, StaticAuthenticator};
pub use config::ServerConfig;
pub use server::{AppState, GatewayServer};
pub use shutdown::ShutdownCoordinator;
pub use websocket::broadcast::BroadcastRouter;
pub use websocket::connection::ClientConnection;
pub use websocket::registry::ConnectionRegistry;
pub use websocket::stats::{RegistryStats, SessionParticipant, StatsReporter};
pub use websocket::typing::TypingRelay;
