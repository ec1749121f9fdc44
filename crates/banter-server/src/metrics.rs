//! Prometheus metrics for the gateway.
//!
//! Metric names are centralized here so the recording sites and the
//! tests agree on spelling.

use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Counter: WebSocket connections accepted since boot.
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Counter: WebSocket connections removed since boot.
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Gauge: currently registered connections.
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Histogram: connection lifetime in seconds.
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Counter: inbound frames received.
pub const WS_MESSAGES_RECEIVED_TOTAL: &str = "ws_messages_received_total";
/// Counter: outbound frames enqueued for delivery.
pub const WS_FRAMES_SENT_TOTAL: &str = "ws_frames_sent_total";
/// Counter: outbound frames dropped because a send buffer was full or
/// its connection had gone away.
pub const WS_SEND_DROPS_TOTAL: &str = "ws_send_drops_total";
/// Counter: completed chat turns (user message answered).
pub const CHAT_TURNS_TOTAL: &str = "chat_turns_total";
/// Histogram: responder latency per chat turn.
pub const RESPONDER_DURATION_SECONDS: &str = "responder_duration_seconds";

static RECORDER: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the process-wide Prometheus recorder on first call and hand
/// back its render handle. Subsequent calls return the same handle, so
/// several servers in one process (tests) share a recorder.
pub fn recorder_handle() -> PrometheusHandle {
    RECORDER
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}
