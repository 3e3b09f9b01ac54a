//! Live task change stream over WebSocket.
//!
//! A session subscribes to its owner's topic and receives
//! `{"message": {"action": ..., "task": {...}}}` text frames. The channel is
//! receive-only: inbound text is ignored and pings are answered by the
//! transport.

use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};

use taskpulse_core::defaults::WS_PING_INTERVAL_SECS;
use taskpulse_core::{owner_topic, User};

use crate::auth::WsAuth;
use crate::context::AppState;

/// `GET /api/v1/ws`
pub async fn ws_handler(
    WsAuth(user): WsAuth,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state, user))
}

async fn handle_ws_connection(socket: WebSocket, state: AppState, user: User) {
    let count = state.ws_connections.fetch_add(1, Ordering::Relaxed) + 1;
    let topic = owner_topic(user.id);
    tracing::info!(
        subsystem = "ws",
        owner_id = %user.id,
        active = count,
        "WebSocket connection opened"
    );

    let (mut sender, mut receiver) = socket.split();
    let mut subscription = state.events.subscribe(&topic);

    // Forward owner events to the client
    let mut send_task = tokio::spawn(async move {
        let mut ping_interval =
            tokio::time::interval(Duration::from_secs(WS_PING_INTERVAL_SECS));
        loop {
            tokio::select! {
                envelope = subscription.recv() => {
                    let Some(envelope) = envelope else { break };
                    match envelope.wire_message() {
                        Ok(json) => {
                            if sender.send(Message::Text(json)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::error!(
                            subsystem = "ws",
                            event_id = %envelope.event_id,
                            error = %e,
                            "Failed to encode event"
                        ),
                    }
                }
                _ = ping_interval.tick() => {
                    if sender.send(Message::Ping(vec![])).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Drain client frames until it goes away
    let owner_id = user.id;
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Close(_) => break,
                Message::Text(text) => tracing::debug!(
                    subsystem = "ws",
                    owner_id = %owner_id,
                    len = text.len(),
                    "Ignoring inbound text frame"
                ),
                _ => {}
            }
        }
    });

    // Whichever side finishes first ends the session.
    let send_finished = tokio::select! {
        _ = &mut send_task => true,
        _ = &mut recv_task => false,
    };
    if send_finished {
        recv_task.abort();
        let _ = recv_task.await;
    } else {
        send_task.abort();
        // The subscription lives in the send task; wait until it is dropped.
        let _ = send_task.await;
    }
    state.events.release(&topic);

    let count = state.ws_connections.fetch_sub(1, Ordering::Relaxed) - 1;
    tracing::info!(
        subsystem = "ws",
        owner_id = %user.id,
        active = count,
        "WebSocket connection closed"
    );
}
