//! HTTP surface: the WebSocket endpoint plus operational REST routes.
//!
//! All REST responses use the `{"status": "success", "data": ...}`
//! envelope. The upgrade endpoint authenticates before upgrading, so a
//! bad token costs a plain 401 and never a registered socket.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use banter_core::{ConnectionId, SessionId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::health::health_check;
use crate::metrics::recorder_handle;
use crate::server::AppState;
use crate::websocket::pipeline::run_connection;
use crate::websocket::stats::SessionParticipant;

/// Build the full application router over `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws/stats", get(ws_stats))
        .route("/ws/{session_id}", get(ws_upgrade))
        .route(
            "/ws/sessions/{session_id}/participants",
            get(session_participants),
        )
        .route(
            "/ws/sessions/{session_id}/broadcast",
            post(broadcast_to_session),
        )
        .route("/ws/connections/{connection_id}", delete(disconnect_connection))
        .route("/health", get(health))
        .route("/metrics", get(render_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Success envelope wrapping every REST payload.
#[derive(Debug, Serialize)]
struct ApiResponse<T> {
    status: &'static str,
    data: T,
}

impl<T: Serialize> ApiResponse<T> {
    fn success(data: T) -> Json<Self> {
        Json(Self {
            status: "success",
            data,
        })
    }
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: String,
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    if state.registry.connection_count() >= state.config.max_connections {
        warn!(
            limit = state.config.max_connections,
            "connection limit reached; rejecting upgrade"
        );
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let identity = match state.authenticator.resolve(&query.token).await {
        Ok(identity) => identity,
        Err(error) => {
            warn!(%error, "websocket token rejected");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };
    let session_id = SessionId::from(session_id);
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| run_connection(socket, identity, session_id, state))
}

async fn ws_stats(State(state): State<AppState>) -> impl IntoResponse {
    ApiResponse::success(state.stats.stats())
}

#[derive(Debug, Serialize)]
struct ParticipantsData {
    session_id: SessionId,
    participant_count: usize,
    participants: Vec<SessionParticipant>,
}

async fn session_participants(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let session_id = SessionId::from(session_id);
    let participants = state.stats.participants(&session_id);
    ApiResponse::success(ParticipantsData {
        participant_count: participants.len(),
        participants,
        session_id,
    })
}

#[derive(Debug, Serialize)]
struct BroadcastData {
    message: &'static str,
    session_id: SessionId,
}

async fn broadcast_to_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(payload): Json<Value>,
) -> impl IntoResponse {
    let session_id = SessionId::from(session_id);
    let delivered = state.broadcast.send_raw_to_session(&session_id, &payload);
    info!(session_id = %session_id, delivered, "admin broadcast");
    ApiResponse::success(BroadcastData {
        message: "Message broadcasted successfully",
        session_id,
    })
}

#[derive(Debug, Serialize)]
struct DisconnectData {
    message: &'static str,
    connection_id: ConnectionId,
}

async fn disconnect_connection(
    State(state): State<AppState>,
    Path(connection_id): Path<String>,
) -> impl IntoResponse {
    let connection_id = ConnectionId::from(connection_id);
    let removed = state.registry.disconnect(&connection_id);
    info!(connection_id = %connection_id, removed, "admin disconnect");
    ApiResponse::success(DisconnectData {
        message: "Connection disconnected successfully",
        connection_id,
    })
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(health_check(
        state.start_time,
        state.registry.connection_count(),
        state.registry.session_count(),
    ))
}

async fn render_metrics() -> String {
    recorder_handle().render()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticAuthenticator;
    use crate::config::ServerConfig;
    use axum::body::Body;
    use axum::http::Request;
    use banter_core::{TenantId, UserId};
    use banter_responder::CannedResponder;
    use banter_store::SqliteMessageStore;
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        AppState::new(
            ServerConfig::default(),
            Arc::new(SqliteMessageStore::in_memory().unwrap()),
            Arc::new(CannedResponder::new("ok")),
            Arc::new(StaticAuthenticator::default()),
        )
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn register(
        state: &AppState,
        user: &str,
        session: &str,
    ) -> (ConnectionId, mpsc::Receiver<Arc<String>>) {
        let (tx, mut rx) = mpsc::channel(8);
        let connection = state.registry.connect(
            UserId::from(user),
            TenantId::from("t1"),
            SessionId::from(session),
            tx,
        );
        let _ = rx.try_recv().unwrap();
        (connection.id.clone(), rx)
    }

    #[tokio::test]
    async fn stats_wrapped_in_success_envelope() {
        let state = test_state();
        let (_id, _rx) = register(&state, "u1", "s1");
        let (status, body) = get_json(router(state), "/ws/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(body["data"]["total_connections"], 1);
        assert_eq!(body["data"]["active_users"], 1);
        assert_eq!(body["data"]["connections_by_tenant"]["t1"], 1);
    }

    #[tokio::test]
    async fn participants_lists_session_members() {
        let state = test_state();
        let (id, _rx) = register(&state, "u1", "s1");
        let (_other, _rx2) = register(&state, "u2", "s2");
        let (status, body) = get_json(router(state), "/ws/sessions/s1/participants").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["session_id"], "s1");
        assert_eq!(body["data"]["participant_count"], 1);
        assert_eq!(body["data"]["participants"][0]["user_id"], "u1");
        assert_eq!(body["data"]["participants"][0]["connection_id"], id.as_str());
        assert_eq!(body["data"]["participants"][0]["tenant_id"], "t1");
    }

    #[tokio::test]
    async fn participants_of_empty_session_is_empty_list() {
        let (status, body) = get_json(router(test_state()), "/ws/sessions/ghost/participants").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["participant_count"], 0);
        assert_eq!(body["data"]["participants"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn admin_broadcast_delivers_raw_payload() {
        let state = test_state();
        let (_id, mut rx) = register(&state, "u1", "s1");
        let payload = serde_json::json!({"type": "announcement", "data": {"text": "hi"}});
        let response = router(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/ws/sessions/s1/broadcast")
                    .header("content-type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["data"]["message"], "Message broadcasted successfully");
        assert_eq!(body["data"]["session_id"], "s1");

        let received: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(received, payload);
    }

    #[tokio::test]
    async fn admin_disconnect_removes_connection() {
        let state = test_state();
        let (id, _rx) = register(&state, "u1", "s1");
        let app = router(state.clone());
        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/ws/connections/{}", id.as_str()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["data"]["message"], "Connection disconnected successfully");
        assert_eq!(body["data"]["connection_id"], id.as_str());
        assert!(state.registry.lookup(&id).is_none());
    }

    #[tokio::test]
    async fn admin_disconnect_of_unknown_id_still_succeeds() {
        let (status, body) = {
            let state = test_state();
            let response = router(state)
                .oneshot(
                    Request::builder()
                        .method("DELETE")
                        .uri("/ws/connections/ghost")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            let status = response.status();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            (status, serde_json::from_slice::<Value>(&bytes).unwrap())
        };
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
    }

    #[tokio::test]
    async fn health_reports_registry_counts() {
        let state = test_state();
        let (_id, _rx) = register(&state, "u1", "s1");
        let (status, body) = get_json(router(state), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connections"], 1);
        assert_eq!(body["active_sessions"], 1);
    }

    #[tokio::test]
    async fn metrics_exposition_renders() {
        // Install the recorder before anything increments counters.
        let _ = recorder_handle();
        let state = test_state();
        let (_id, _rx) = register(&state, "u1", "s1");
        let response = router(state)
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("ws_connections_total"));
    }

    #[tokio::test]
    async fn upgrade_requires_websocket_headers() {
        let response = router(test_state())
            .oneshot(
                Request::builder()
                    .uri("/ws/s1?token=abc")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn stats_route_is_not_shadowed_by_session_route() {
        // "/ws/stats" must hit the stats handler, not upgrade a session
        // literally named "stats".
        let (status, body) = get_json(router(test_state()), "/ws/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
    }
}
