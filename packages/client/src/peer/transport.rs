//! Contracts toward the media handshake transport and local capture.
//!
//! The mesh manager never touches a media API directly: it fabricates links
//! through [`PeerConnector`], drives negotiation through [`PeerLinkHandle`],
//! and acquires capture tracks through [`MediaSource`]. Embedders supply
//! the real implementations; tests supply fakes.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{MediaError, PeerError};

/// A session description (offer or answer), opaque to everything but the
/// transport on either end.
pub type SessionDescription = serde_json::Value;

/// A connectivity candidate, equally opaque.
pub type IceCandidate = serde_json::Value;

/// Candidate-gathering endpoints handed to the connector per link.
#[derive(Debug, Clone)]
pub struct IceConfig {
    pub ice_servers: Vec<String>,
    pub candidate_pool_size: u8,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
                "stun:stun2.l.google.com:19302".to_string(),
                "stun:stun.stunprotocol.org:3478".to_string(),
            ],
            candidate_pool_size: 10,
        }
    }
}

/// Connectivity as reported by the transport itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// A remote participant's media stream, as an opaque handle the UI can
/// attach to a tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMediaStream {
    pub id: String,
}

/// Events a link pushes to the mesh manager.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// The transport's own connectivity signal changed.
    ConnectivityChanged {
        remote_id: String,
        state: Connectivity,
    },
    /// A locally gathered candidate, ready to relay to the remote side.
    LocalCandidate {
        remote_id: String,
        candidate: IceCandidate,
    },
    /// Remote media arrived on the link.
    RemoteMedia {
        remote_id: String,
        stream: RemoteMediaStream,
    },
}

/// Kind of a local capture track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// One local capture track. Enablement flips in place and never triggers
/// renegotiation.
pub trait LocalTrack: Send + Sync {
    fn kind(&self) -> TrackKind;
    fn is_enabled(&self) -> bool;
    fn set_enabled(&self, enabled: bool);
    /// Whether the device ended the track (revoked, unplugged). Ended
    /// tracks must be re-acquired, not re-enabled.
    fn is_ended(&self) -> bool;
    fn stop(&self);
}

/// The local audio/video capture pair attached to every link.
#[derive(Clone)]
pub struct LocalMedia {
    pub audio: Arc<dyn LocalTrack>,
    pub video: Arc<dyn LocalTrack>,
}

impl LocalMedia {
    /// True when either track was ended by the device.
    pub fn any_track_ended(&self) -> bool {
        self.audio.is_ended() || self.video.is_ended()
    }

    pub fn stop(&self) {
        self.audio.stop();
        self.video.stop();
    }
}

/// Acquires local capture media.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Acquire camera and microphone tracks, prompting for permission if
    /// needed.
    async fn acquire(&self) -> Result<LocalMedia, MediaError>;
}

/// One live media link toward a remote participant.
#[async_trait]
pub trait PeerLinkHandle: Send + Sync {
    /// Produce a local offer and store it as the pending local description.
    async fn create_offer(&self) -> Result<SessionDescription, PeerError>;

    /// Apply a remote offer and produce the matching answer.
    async fn accept_offer(
        &self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, PeerError>;

    /// Apply the remote answer to our outstanding offer.
    async fn accept_answer(&self, answer: SessionDescription) -> Result<(), PeerError>;

    /// Apply one remote candidate. Must tolerate duplicates.
    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError>;

    /// Swap the local capture tracks in place, without renegotiating.
    async fn replace_local_tracks(&self, media: &LocalMedia) -> Result<(), PeerError>;

    /// Whether remote media is still actually flowing. Used by foreground
    /// recovery to catch links that claim to be connected but went silent.
    fn has_live_remote_media(&self) -> bool;

    /// Release the link's resources. Idempotent.
    async fn close(&self);
}

/// Fabricates links. One call per remote participant per (re)connection
/// attempt.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(
        &self,
        config: &IceConfig,
        remote_id: &str,
        local_media: &LocalMedia,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Box<dyn PeerLinkHandle>, PeerError>;
}
