use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::api::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // Send the current active session immediately on connect.
    let session = state.store.active_session().await;
    if let Ok(frame) =
        serde_json::to_string(&json!({ "type": "rpg:session_update", "payload": session }))
    {
        if sender.send(Message::Text(frame)).await.is_err() {
            return;
        }
    }

    let mut rx = state.tx.subscribe();

    // Forward broadcast frames to the WebSocket client.
    let send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(msg) => {
                    if sender.send(Message::Text(msg)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("WS client lagged by {n} messages");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Drain incoming frames (ping/pong/close) until the client disconnects.
    while let Some(Ok(_)) = receiver.next().await {}

    send_task.abort();
    info!("WebSocket client disconnected");
}
