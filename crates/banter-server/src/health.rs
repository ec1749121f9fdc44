//! Liveness endpoint payload.

use std::time::Instant;

use serde::Serialize;

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the process is serving.
    pub status: &'static str,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Currently registered WebSocket connections.
    pub connections: usize,
    /// Chat sessions with at least one live connection.
    pub active_sessions: usize,
}

/// Build the health payload from the process start time and current
/// registry counts.
pub fn health_check(start_time: Instant, connections: usize, active_sessions: usize) -> HealthResponse {
    HealthResponse {
        status: "ok",
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        active_sessions,
    }
}
