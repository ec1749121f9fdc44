//! Per-connection ingest pipeline.
//!
//! [`run_connection`] owns one upgraded socket from registration to
//! removal. The socket is split: a writer task drains the connection's
//! send buffer and paces heartbeat pings, while this task consumes
//! inbound frames and dispatches them. The two halves never share the
//! socket.
//!
//! Frame handling is error-isolated: a frame that fails to decode or
//! process produces an `error` frame, never a closed connection.
//! Whatever does end the read loop (client close, transport error,
//! shutdown), cleanup runs unconditionally and unregisters the
//! connection.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use banter_core::{ChatInbound, ErrorCode, InboundFrame, NewChatMessage, OutboundFrame, SessionId};
use futures::{SinkExt, StreamExt};
use metrics::{counter, histogram};
use serde_json::json;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, instrument, warn};

use crate::auth::AuthContext;
use crate::metrics::{
    CHAT_TURNS_TOTAL, RESPONDER_DURATION_SECONDS, WS_CONNECTION_DURATION_SECONDS,
    WS_MESSAGES_RECEIVED_TOTAL,
};
use crate::server::AppState;
use crate::websocket::connection::ClientConnection;

/// Drive one WebSocket connection for its whole life.
#[instrument(skip_all, fields(session_id = %session_id, user_id = %identity.user_id))]
pub async fn run_connection(
    socket: WebSocket,
    identity: AuthContext,
    session_id: SessionId,
    state: AppState,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (send_tx, mut send_rx) = mpsc::channel::<Arc<String>>(state.config.send_buffer_capacity);

    let connection = state.registry.connect(
        identity.user_id,
        identity.tenant_id,
        session_id,
        send_tx,
    );
    let started = Instant::now();

    // Writer half: drains the send buffer and paces heartbeat pings.
    // Ends when the buffer closes, the socket errors, or the peer
    // stops answering pings.
    let writer_connection = Arc::clone(&connection);
    let ping_every = state.config.heartbeat_interval();
    let pong_deadline = state.config.heartbeat_timeout();
    let outbound = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(ping_every);
        ping_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; skip it so pings start
        // one full interval after connect.
        let _ = ping_interval.tick().await;
        loop {
            tokio::select! {
                maybe_payload = send_rx.recv() => {
                    let Some(payload) = maybe_payload else { break };
                    if ws_tx.send(Message::Text(payload.as_str().into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if !writer_connection.check_alive()
                        && writer_connection.last_pong_elapsed() > pong_deadline
                    {
                        warn!(
                            connection_id = %writer_connection.id,
                            "heartbeat timed out; closing connection"
                        );
                        break;
                    }
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let shutdown = state.shutdown.token();
    let removed = connection.cancel_token();
    loop {
        tokio::select! {
            maybe_message = ws_rx.next() => {
                match maybe_message {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&state, &connection, text.as_str()).await;
                    }
                    Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => handle_frame(&state, &connection, text).await,
                        Err(_) => {
                            let _ = state.broadcast.send_error(
                                &connection.id,
                                "Invalid JSON format",
                                ErrorCode::InvalidJson,
                            );
                        }
                    },
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        connection.mark_alive();
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection_id = %connection.id, "client closed connection");
                        break;
                    }
                    Some(Err(error)) => {
                        warn!(connection_id = %connection.id, %error, "websocket receive error");
                        // Best effort; the transport is usually gone by now.
                        let _ = state.broadcast.send_error(
                            &connection.id,
                            "Connection error occurred",
                            ErrorCode::ConnectionError,
                        );
                        break;
                    }
                    None => break,
                }
            }
            () = shutdown.cancelled() => {
                debug!(connection_id = %connection.id, "server shutting down; closing connection");
                break;
            }
            () = removed.cancelled() => {
                debug!(connection_id = %connection.id, "connection was force-disconnected");
                break;
            }
        }
    }

    // Unconditional cleanup: no exit path may leave the connection
    // registered or the writer running.
    outbound.abort();
    let _ = state.registry.disconnect(&connection.id);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
}

/// Dispatch one decoded (or undecodable) inbound frame.
async fn handle_frame(state: &AppState, connection: &Arc<ClientConnection>, text: &str) {
    counter!(WS_MESSAGES_RECEIVED_TOTAL).increment(1);
    match InboundFrame::parse(text) {
        Ok(InboundFrame::Chat(chat)) => {
            if let Err(turn_error) = handle_chat_turn(state, connection, chat).await {
                error!(
                    connection_id = %connection.id,
                    session_id = %connection.session_id,
                    error = %turn_error,
                    "chat turn failed"
                );
                // The user turn may already be visible to the session,
                // so the failure is announced session-wide too.
                let _ = state.broadcast.send_to_session(
                    &connection.session_id,
                    &OutboundFrame::error(
                        "Failed to process message",
                        ErrorCode::MessageProcessingError,
                    ),
                );
            }
        }
        Ok(InboundFrame::Typing(typing)) => {
            let _ = state
                .typing
                .relay(&connection.user_id, &connection.session_id, typing.is_typing);
        }
        Ok(InboundFrame::Ping) => {
            connection.mark_alive();
            let _ = state
                .broadcast
                .send_personal(&connection.id, &OutboundFrame::pong_now());
        }
        Err(decode_error) => {
            debug!(
                connection_id = %connection.id,
                error = %decode_error,
                "frame failed to decode"
            );
            let _ = state.broadcast.send_error(
                &connection.id,
                decode_error.client_message(),
                decode_error.error_code(),
            );
        }
    }
}

/// Why a chat turn failed after decoding.
#[derive(Debug, Error)]
enum ChatTurnError {
    #[error("failed to persist message: {0}")]
    Store(#[from] banter_store::StoreError),
    #[error("responder failed: {0}")]
    Responder(#[from] banter_responder::ResponderError),
    #[error("responder exceeded {0:?}")]
    ResponderTimeout(Duration),
    #[error("responder produced no reply")]
    EmptyReply,
}

/// One full chat turn: persist the user message, echo it to the
/// session, ask the responder (bounded by the configured deadline),
/// persist the reply, broadcast it.
///
/// Any failure after the first save leaves the user turn persisted and
/// visible; there is no rollback.
async fn handle_chat_turn(
    state: &AppState,
    connection: &Arc<ClientConnection>,
    chat: ChatInbound,
) -> Result<(), ChatTurnError> {
    if chat.message.trim().is_empty() {
        debug!(connection_id = %connection.id, "ignoring empty chat message");
        return Ok(());
    }

    let user_turn = state
        .store
        .save(NewChatMessage::user(
            connection.session_id.clone(),
            connection.user_id.clone(),
            chat.message.clone(),
            Some(chat.metadata.unwrap_or_else(|| json!({}))),
        ))
        .await?;
    let _ = state.broadcast.broadcast_chat_message(user_turn);

    let deadline = state.config.responder_timeout();
    let asked = Instant::now();
    let outcome = tokio::time::timeout(
        deadline,
        state.responder.generate(
            chat.message.trim(),
            &connection.session_id,
            &connection.user_id,
            &connection.tenant_id,
        ),
    )
    .await;
    histogram!(RESPONDER_DURATION_SECONDS).record(asked.elapsed().as_secs_f64());

    let reply = match outcome {
        Err(_) => return Err(ChatTurnError::ResponderTimeout(deadline)),
        Ok(Err(responder_error)) => return Err(ChatTurnError::Responder(responder_error)),
        Ok(Ok(maybe_reply)) => maybe_reply
            .filter(|reply| !reply.trim().is_empty())
            .ok_or(ChatTurnError::EmptyReply)?,
    };

    let assistant_turn = state
        .store
        .save(NewChatMessage::assistant(
            connection.session_id.clone(),
            reply,
            Some(json!({
                "model": state.responder.name(),
                "tenant_id": connection.tenant_id.as_str(),
            })),
        ))
        .await?;
    let _ = state.broadcast.broadcast_chat_message(assistant_turn);
    counter!(CHAT_TURNS_TOTAL).increment(1);
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
