//! Axum WebSocket upgrade + the Session Handler's reader/writer task pair.
//! There is no pre-auth handshake: the `join` frame does inline,
//! authentication-free room binding.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use chatroom_core::types::HandlerId;
use chatroom_protocol::ServerEvent;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::app::AppState;
use crate::ws::session::RoomSession;

/// Axum handler — upgrades HTTP to WebSocket at GET /ws.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_connection(socket, state))
}

/// Per-connection task — lives for the entire WS session lifetime.
async fn handle_connection(socket: WebSocket, state: Arc<AppState>) {
    let handler_id = HandlerId::new();
    info!(handler_id = %handler_id, "new WS connection");

    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) =
        mpsc::channel::<ServerEvent>(state.config.limits.outbound_queue_capacity);

    // writer task: drains the outbound queue to the wire.
    let writer = tokio::spawn(async move {
        while let Some(event) = outbound_rx.recv().await {
            let Ok(json) = serde_json::to_string(&event) else {
                continue;
            };
            if sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let mut session = RoomSession::new(handler_id.clone(), state.clone(), outbound_tx);
    let max_frame_bytes = state.config.limits.max_frame_bytes;

    // reader loop: terminates when either task ends or the stream errors.
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if text.len() > max_frame_bytes {
                    warn!(handler_id = %handler_id, size = text.len(), "frame too large, closing");
                    break;
                }
                session.handle_text(&text).await;
            }
            Ok(Message::Close(_)) => break,
            Err(e) => {
                warn!(handler_id = %handler_id, error = %e, "ws read error");
                break;
            }
            _ => {}
        }
        if writer.is_finished() {
            break;
        }
    }

    session.on_disconnect().await;
    writer.abort();
    info!(handler_id = %handler_id, "WS connection closed");
}
