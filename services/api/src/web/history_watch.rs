//! services/api/src/web/history_watch.rs
//!
//! Pushes the signed-in user's history over a WebSocket: one snapshot on
//! connect, then a fresh sorted snapshot whenever a new record is saved.

use crate::error::{not_configured, Rejection};
use crate::web::{
    protocol::{HistoryRecordBody, ServerMessage},
    state::AppState,
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::Response,
    Extension,
};
use equation_ace_core::history::HistoryWatch;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

pub async fn ws_history_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<Response, Rejection> {
    let history = app_state
        .history
        .clone()
        .ok_or_else(|| not_configured("History"))?;
    let watch = history.watch(user_id).await.map_err(|e| {
        error!("Failed to start history watch: {:?}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to load history".to_string(),
        )
    })?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, watch, user_id)))
}

async fn handle_socket(socket: WebSocket, mut watch: HistoryWatch, user_id: Uuid) {
    info!("History watch opened for user: {}", user_id);
    let (mut sender, mut receiver) = socket.split();
    let token = CancellationToken::new();

    let forwarder = {
        let token = token.clone();
        tokio::spawn(async move {
            loop {
                let snapshot = tokio::select! {
                    _ = token.cancelled() => break,
                    snapshot = watch.next_snapshot() => snapshot,
                };
                let Some(records) = snapshot else {
                    break;
                };
                let msg = ServerMessage::HistorySnapshot {
                    records: records.iter().map(HistoryRecordBody::from).collect(),
                };
                let json = match serde_json::to_string(&msg) {
                    Ok(json) => json,
                    Err(e) => {
                        error!("Failed to serialize history snapshot: {}", e);
                        break;
                    }
                };
                if sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
        })
    };

    // Only a close (or a dropped connection) matters from the client.
    while let Some(Ok(msg)) = receiver.next().await {
        if let Message::Close(_) = msg {
            break;
        }
    }

    token.cancel();
    if let Err(e) = forwarder.await {
        error!("History forwarder task failed: {:?}", e);
    }
    info!("History watch closed for user: {}", user_id);
}
