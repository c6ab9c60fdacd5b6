//! Wire protocol spoken between the Tandem server and its clients.
//!
//! Every WebSocket text frame is one JSON-encoded [`ClientEvent`] or
//! [`ServerEvent`]. Both enums are closed: adding a message kind is a new
//! variant, checked exhaustively at every dispatch site.

use serde::{Deserialize, Serialize};

/// A room member as seen by every client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub participant_id: String,
    pub display_name: String,
}

/// One chat entry. The id and timestamp are always server-assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub participant_id: String,
    pub display_name: String,
    pub text: String,
    /// Server receive time, Unix epoch milliseconds.
    pub created_at: i64,
}

/// The single shared playback record of a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoState {
    pub url: String,
    pub is_playing: bool,
    pub position_seconds: f64,
    /// Server time of the last merge, Unix epoch milliseconds.
    /// Monotonically non-decreasing per room.
    pub last_updated_at: i64,
    /// Participant whose action produced the current value. Lets a client
    /// tell its own echoed update apart from someone else's.
    pub last_updated_by: String,
}

impl Default for VideoState {
    fn default() -> Self {
        Self {
            url: String::new(),
            is_playing: false,
            position_seconds: 0.0,
            last_updated_at: 0,
            last_updated_by: String::new(),
        }
    }
}

/// Partial update of a [`VideoState`]. Absent fields carry over on merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoStatePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_playing: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_seconds: Option<f64>,
}

impl VideoStatePatch {
    /// Patch emitted when a participant loads a new url: position rewinds
    /// to zero and playback starts, as one atomic update.
    pub fn for_new_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            is_playing: Some(true),
            position_seconds: Some(0.0),
        }
    }
}

/// Kind of a relayed media-handshake payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

/// Opaque handshake payload ferried between exactly two peers. The relay
/// never inspects `data`; only the mesh managers on either end do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalPayload {
    pub kind: SignalKind,
    pub data: serde_json::Value,
}

/// Events a client sends to the server.
///
/// Sender identity is bound to the connection by `Join`; later events on the
/// same connection never carry it again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientEvent {
    Join {
        room_code: String,
        participant_id: String,
        display_name: String,
    },
    Leave {
        room_code: String,
    },
    VideoState {
        room_code: String,
        patch: VideoStatePatch,
    },
    Chat {
        room_code: String,
        text: String,
    },
    Signal {
        room_code: String,
        to: String,
        payload: SignalPayload,
    },
}

/// Events the server emits to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Full room state, sent to a joining connection only.
    Snapshot {
        video_state: VideoState,
        messages: Vec<ChatMessage>,
        participants: Vec<Participant>,
    },
    /// Current membership, room-wide after every roster change.
    Participants { participants: Vec<Participant> },
    /// The entire merged video state, room-wide including the sender.
    VideoState { state: VideoState },
    /// A single new chat message, room-wide.
    Message { message: ChatMessage },
    /// A new arrival, to everyone already in the room (call initiation cue).
    ParticipantJoined { participant_id: String },
    /// A departure, room-wide.
    ParticipantLeft { participant_id: String },
    /// A relayed handshake payload, to one targeted connection only.
    Signal {
        from: String,
        payload: SignalPayload,
    },
}
