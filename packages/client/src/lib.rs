//! Tandem client library.
//!
//! Three cooperating pieces, each usable on its own:
//!
//! - [`session`]: the room session — joins a room over WebSocket, surfaces
//!   server events as a typed stream, and exposes the mutation operations
//!   (chat, video-state patches, peer signals).
//! - [`peer`]: the peer-mesh manager — one media link per remote
//!   participant, with glare-free call initiation, health monitoring, and
//!   automatic reconnection. The actual media handshake is reached through
//!   the [`peer::transport`] traits; embedders plug in a real transport.
//! - [`playback`]: the playback synchronizer — reconciles a local player
//!   against the room's authoritative video state.
//!
//! The `tandem-client` binary wires session + playback into a terminal
//! client (chat and synchronized playback against a headless clock player).

pub mod error;
pub mod formatter;
pub mod peer;
pub mod playback;
mod runner;
pub mod session;

pub use runner::{ClientOptions, run_client};
