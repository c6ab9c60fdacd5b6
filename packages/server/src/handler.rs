//! WebSocket connection handler and HTTP API handlers.

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    Json,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use tokio::sync::mpsc;

use tandem_shared::protocol::ClientEvent;
use tandem_shared::room_code;

use crate::registry::{RoomDetails, RoomOverview};
use crate::state::AppState;

/// Identity a connection assumes with its first `Join` and keeps until
/// teardown. Everything a client sends after joining is attributed to this,
/// never to ids carried in message bodies.
struct ConnectionIdentity {
    participant_id: String,
    display_name: String,
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let connection_serial = state.allocate_connection_serial();

    // Frames queued for this connection by the registry.
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    // Pusher: registry broadcasts -> this client's socket.
    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    let mut identity: Option<ConnectionIdentity> = None;
    let mut joined_rooms: HashSet<String> = HashSet::new();

    // Inbound loop runs on this task so identity and joined-room tracking
    // stay plain local state.
    while let Some(message) = receiver.next().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("WebSocket error on connection {}: {}", connection_serial, e);
                break;
            }
        };

        match message {
            Message::Text(text) => {
                let event = match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::warn!(
                            "Unparseable frame on connection {}: {} ({})",
                            connection_serial,
                            e,
                            text
                        );
                        continue;
                    }
                };
                dispatch(
                    &state,
                    connection_serial,
                    &tx,
                    &mut identity,
                    &mut joined_rooms,
                    event,
                )
                .await;
            }
            Message::Close(_) => {
                tracing::debug!("Connection {} requested close", connection_serial);
                break;
            }
            // Ping/pong handled by the protocol layer; binary frames are
            // not part of this protocol.
            _ => {}
        }
    }

    send_task.abort();

    // Implicit leave for every room this connection had joined. The
    // connection serial keeps this from evicting an entry written by a
    // newer connection of the same participant.
    if let Some(identity) = identity {
        for room in joined_rooms {
            state
                .registry
                .leave(&room, &identity.participant_id, Some(connection_serial))
                .await;
        }
    }
    tracing::debug!("Connection {} torn down", connection_serial);
}

async fn dispatch(
    state: &Arc<AppState>,
    connection_serial: u64,
    tx: &mpsc::UnboundedSender<String>,
    identity: &mut Option<ConnectionIdentity>,
    joined_rooms: &mut HashSet<String>,
    event: ClientEvent,
) {
    match event {
        ClientEvent::Join {
            room_code: code,
            participant_id,
            display_name,
        } => {
            joined_rooms.insert(room_code::normalize(&code));
            state
                .registry
                .join(
                    &code,
                    &participant_id,
                    &display_name,
                    tx.clone(),
                    connection_serial,
                )
                .await;
            *identity = Some(ConnectionIdentity {
                participant_id,
                display_name,
            });
        }
        ClientEvent::Leave { room_code: code } => {
            let Some(identity) = identity.as_ref() else {
                tracing::warn!("Leave before join on connection {}", connection_serial);
                return;
            };
            joined_rooms.remove(&room_code::normalize(&code));
            // Explicit leave removes regardless of which connection owns
            // the entry.
            state
                .registry
                .leave(&code, &identity.participant_id, None)
                .await;
        }
        ClientEvent::VideoState {
            room_code: code,
            patch,
        } => {
            let Some(identity) = identity.as_ref() else {
                tracing::warn!("Video state before join on connection {}", connection_serial);
                return;
            };
            state
                .registry
                .update_video_state(&code, &identity.participant_id, patch)
                .await;
        }
        ClientEvent::Chat {
            room_code: code,
            text,
        } => {
            let Some(identity) = identity.as_ref() else {
                tracing::warn!("Chat before join on connection {}", connection_serial);
                return;
            };
            state
                .registry
                .post_message(&code, &identity.participant_id, &identity.display_name, &text)
                .await;
        }
        ClientEvent::Signal {
            room_code: code,
            to,
            payload,
        } => {
            let Some(identity) = identity.as_ref() else {
                tracing::warn!("Signal before join on connection {}", connection_serial);
                return;
            };
            state
                .registry
                .relay_signal(&code, &identity.participant_id, &to, payload)
                .await;
        }
    }
}

/// Health check endpoint
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// List all active rooms
pub async fn get_rooms(State(state): State<Arc<AppState>>) -> Json<Vec<RoomOverview>> {
    Json(state.registry.overviews().await)
}

/// Get one room's detail by code
pub async fn get_room_detail(
    State(state): State<Arc<AppState>>,
    Path(room_code): Path<String>,
) -> Result<Json<RoomDetails>, StatusCode> {
    match state.registry.details(&room_code).await {
        Some(details) => Ok(Json(details)),
        None => Err(StatusCode::NOT_FOUND),
    }
}
