use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tracing::debug;

use super::AppState;

/// WebSocket endpoint streaming intersection snapshots. The scheduler
/// publishes twice a second; clients that fall behind skip ahead to the
/// freshest snapshot instead of replaying a backlog.
pub async fn ws_status(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut snapshot_rx = state.snapshots.subscribe();

    // Send the current state immediately so the client never waits a
    // publish interval for its first frame.
    let initial = state.shared.read().await.snapshot(Utc::now());
    if let Ok(json) = serde_json::to_string(&initial) {
        if sender.send(Message::Text(json.into())).await.is_err() {
            return;
        }
    }

    let forward_task = tokio::spawn(async move {
        loop {
            match snapshot_rx.recv().await {
                Ok(snapshot) => {
                    let Ok(json) = serde_json::to_string(&snapshot) else {
                        continue;
                    };
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "WebSocket client lagged, skipping snapshots");
                    continue;
                }
            }
        }
    });

    // The stream is one-way; drain the client side only to notice
    // disconnects.
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }

    forward_task.abort();
    debug!("WebSocket client disconnected");
}
