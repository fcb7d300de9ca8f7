//! Cross-window sync endpoints and the live WebSocket feed.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::{Json, Response},
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use super::{ApiError, AppState};
use crate::playback::dataset::validate_filename;
use crate::playback::service::now_ms;
use crate::playback::{SyncMessage, SyncSnapshot, ViewStatus};

#[derive(Serialize)]
pub struct PublishResponse {
    /// False when a newer publication was already held.
    pub accepted: bool,
}

#[derive(Deserialize)]
pub struct ViewRequest {
    pub view: String,
    pub open: bool,
}

/// Messages a window may send over `/ws/sync`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
enum WsClientMessage {
    Ping { timestamp: i64 },
    Publish(SyncMessage),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
enum WsServerEvent {
    Sync(SyncMessage),
    Pong { timestamp: i64 },
}

pub async fn publish(
    State(state): State<AppState>,
    Json(message): Json<SyncMessage>,
) -> Result<Json<PublishResponse>, ApiError> {
    validate_filename(&message.filename)?;
    let accepted = state.service.sync().publish(message);
    Ok(Json(PublishResponse { accepted }))
}

pub async fn latest(State(state): State<AppState>) -> Json<SyncSnapshot> {
    Json(state.service.sync().snapshot(now_ms()))
}

pub async fn set_view(
    State(state): State<AppState>,
    Json(request): Json<ViewRequest>,
) -> Result<Json<ViewStatus>, ApiError> {
    let view = request.view.trim();
    if view.is_empty() {
        return Err(ApiError::BadRequest("view must not be empty".to_string()));
    }
    Ok(Json(state.service.sync().set_view(view, request.open, now_ms())))
}

pub async fn list_views(State(state): State<AppState>) -> Json<Vec<ViewStatus>> {
    Json(state.service.sync().views())
}

/// WebSocket handler for live sync messages
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send_event(socket: &mut WebSocket, event: &WsServerEvent) -> bool {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to serialize sync event: {}", e);
            return true;
        }
    };
    socket.send(Message::Text(text)).await.is_ok()
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let sync = state.service.sync();
    let mut rx = sync.subscribe();
    debug!(subscribers = sync.subscriber_count(), "Sync subscriber connected");

    // A fresh window renders the current position immediately.
    if let Some(latest) = sync.latest() {
        if !send_event(&mut socket, &WsServerEvent::Sync(latest)).await {
            return;
        }
    }

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(message) => {
                    if !send_event(&mut socket, &WsServerEvent::Sync(message)).await {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    // Only the newest position matters.
                    debug!(skipped, "Sync subscriber lagged, sending latest");
                    if let Some(latest) = sync.latest() {
                        if !send_event(&mut socket, &WsServerEvent::Sync(latest)).await {
                            break;
                        }
                    }
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<WsClientMessage>(&text) {
                        Ok(WsClientMessage::Ping { timestamp }) => {
                            if !send_event(&mut socket, &WsServerEvent::Pong { timestamp }).await {
                                break;
                            }
                        }
                        Ok(WsClientMessage::Publish(message)) => {
                            if validate_filename(&message.filename).is_ok() {
                                sync.publish(message);
                            }
                        }
                        Err(e) => debug!("Ignoring unrecognised sync message: {}", e),
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    debug!("Sync subscriber disconnected");
}
