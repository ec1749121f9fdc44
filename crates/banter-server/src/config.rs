//! Server configuration.

use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Json, Serialized};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Configuration for the gateway server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to bind to (0 = OS-assigned).
    pub port: u16,
    /// Maximum number of concurrent WebSocket connections.
    pub max_connections: usize,
    /// Interval between server-initiated pings, in seconds.
    pub heartbeat_interval_secs: u64,
    /// How long a connection may go without a pong before it is
    /// considered dead, in seconds.
    pub heartbeat_timeout_secs: u64,
    /// Maximum size of an inbound WebSocket message, in bytes.
    pub max_message_size: usize,
    /// Capacity of each connection's outbound frame buffer.
    pub send_buffer_capacity: usize,
    /// How long a chat turn waits for the responder before giving up,
    /// in seconds.
    pub responder_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            max_connections: 1024,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            max_message_size: 64 * 1024,
            send_buffer_capacity: 256,
            responder_timeout_secs: 30,
        }
    }
}

impl ServerConfig {
    /// Layered load: built-in defaults, then an optional JSON file,
    /// then `BANTER_`-prefixed environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Json::file(path));
        }
        figment.merge(Env::prefixed("BANTER_")).extract()
    }

    /// Ping cadence as a [`Duration`].
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Pong deadline as a [`Duration`].
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    /// Responder deadline as a [`Duration`].
    pub fn responder_timeout(&self) -> Duration {
        Duration::from_secs(self.responder_timeout_secs)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
