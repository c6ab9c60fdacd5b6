//! Playback synchronization against the room's authoritative video state.

pub mod player;
pub mod sync;

pub use player::{ClockPlayer, PlayerSurface};
pub use sync::PlaybackSynchronizer;
