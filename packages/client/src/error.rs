//! Error types for the Tandem client.

use thiserror::Error;

/// Session-level errors
#[derive(Debug, Error)]
pub enum ClientError {
    /// Connection to the server failed or was lost
    #[error("Connection error: {0}")]
    Connection(String),
}

/// Peer-link errors, raised by the media transport
#[derive(Debug, Error)]
pub enum PeerError {
    /// Negotiation with a specific remote failed
    #[error("Negotiation with '{remote_id}' failed: {reason}")]
    Negotiation { remote_id: String, reason: String },

    /// The transport rejected an operation
    #[error("Peer transport error: {0}")]
    Transport(String),
}

/// Local media capture errors. These are the only client errors surfaced
/// to the user as a blocking state (with a manual retry); everything else
/// heals internally.
#[derive(Debug, Error)]
pub enum MediaError {
    /// Capture devices are missing or busy
    #[error("Media devices unavailable: {0}")]
    Unavailable(String),

    /// The user denied camera/microphone access
    #[error("Camera/microphone permission denied")]
    PermissionDenied,
}
