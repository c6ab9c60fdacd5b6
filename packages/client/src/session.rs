//! Room session management.
//!
//! A [`RoomSession`] owns one WebSocket connection to the server, sends the
//! join event, and splits the socket into a writer task (fed by the
//! mutation operations) and a reader task (surfacing parsed
//! [`ServerEvent`]s on a channel). Stale or unparseable frames are logged
//! and dropped, never surfaced.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

use tandem_shared::protocol::{ClientEvent, ServerEvent, SignalPayload, VideoStatePatch};
use tandem_shared::room_code;

use crate::error::ClientError;

/// Everything needed to join a room.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket endpoint, e.g. `ws://127.0.0.1:3001/ws`
    pub server_url: String,
    pub room_code: String,
    /// Stable for the lifetime of the client process; reconnects reuse it.
    pub participant_id: String,
    pub display_name: String,
}

/// A live connection to one room.
pub struct RoomSession {
    room_code: String,
    participant_id: String,
    outbound: mpsc::UnboundedSender<ClientEvent>,
    read_task: JoinHandle<()>,
    write_task: JoinHandle<()>,
}

impl RoomSession {
    /// Connect, join the room, and return the session handle plus the
    /// stream of server events.
    pub async fn connect(
        config: SessionConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ServerEvent>), ClientError> {
        let (ws_stream, _response) = connect_async(config.server_url.as_str())
            .await
            .map_err(|e| ClientError::Connection(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        let (event_tx, event_rx) = mpsc::unbounded_channel::<ServerEvent>();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientEvent>();

        let write_task = tokio::spawn(async move {
            while let Some(event) = out_rx.recv().await {
                let json = match serde_json::to_string(&event) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!("Failed to serialize outbound event: {}", e);
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(json.into())).await {
                    tracing::warn!("Failed to send frame: {}", e);
                    break;
                }
            }
        });

        let read_task = tokio::spawn(async move {
            while let Some(message) = read.next().await {
                match message {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(event) => {
                            if event_tx.send(event).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!("Unparseable frame from server: {} ({})", e, text);
                        }
                    },
                    Ok(Message::Close(_)) => {
                        tracing::info!("Server closed the connection");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("WebSocket read error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
            // event_tx drops here; the consumer observes end-of-stream.
        });

        let session = Self {
            room_code: room_code::normalize(&config.room_code),
            participant_id: config.participant_id.clone(),
            outbound: out_tx,
            read_task,
            write_task,
        };
        session.send(ClientEvent::Join {
            room_code: session.room_code.clone(),
            participant_id: config.participant_id,
            display_name: config.display_name,
        });

        Ok((session, event_rx))
    }

    pub fn room_code(&self) -> &str {
        &self.room_code
    }

    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    /// Send a chat message. Empty (after trimming) text is not sent.
    pub fn send_chat(&self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        self.send(ClientEvent::Chat {
            room_code: self.room_code.clone(),
            text: text.to_string(),
        });
    }

    /// Send a partial video-state update. The server merges, stamps, and
    /// echoes the full state back as confirmation.
    pub fn update_video_state(&self, patch: VideoStatePatch) {
        self.send(ClientEvent::VideoState {
            room_code: self.room_code.clone(),
            patch,
        });
    }

    /// Relay a handshake payload to one specific participant.
    pub fn send_signal(&self, to: &str, payload: SignalPayload) {
        self.send(ClientEvent::Signal {
            room_code: self.room_code.clone(),
            to: to.to_string(),
            payload,
        });
    }

    /// Leave the room and tear the connection down. Queued outbound events
    /// (including the leave itself) are flushed first.
    pub async fn shutdown(self) {
        let Self {
            room_code,
            outbound,
            read_task,
            write_task,
            ..
        } = self;
        let _ = outbound.send(ClientEvent::Leave { room_code });
        // Closing the channel lets the writer drain and exit.
        drop(outbound);
        let _ = write_task.await;
        read_task.abort();
    }

    fn send(&self, event: ClientEvent) {
        if self.outbound.send(event).is_err() {
            tracing::warn!("Session outbound channel closed, dropping event");
        }
    }
}
