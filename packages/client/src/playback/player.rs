//! Player surface contract and the headless clock player.
//!
//! The rendering widget is an external collaborator; [`PlayerSurface`] is
//! the slice of it the synchronizer needs. [`ClockPlayer`] is the terminal
//! client's implementation: no frames, just a position that advances in
//! real time while playing.

use std::sync::Arc;

use tandem_shared::time::Clock;

/// What the synchronizer needs from a video player.
pub trait PlayerSurface: Send {
    /// Load a url, resetting the position to zero.
    fn load(&mut self, url: &str);
    fn set_playing(&mut self, playing: bool);
    fn seek(&mut self, position_seconds: f64);
    fn url(&self) -> &str;
    fn is_playing(&self) -> bool;
    /// Currently observed playback position.
    fn position_seconds(&self) -> f64;
}

/// A player with no rendering: position is derived from the wall clock.
pub struct ClockPlayer {
    clock: Arc<dyn Clock>,
    url: String,
    playing: bool,
    /// Position at the last play/pause/seek/load transition.
    base_position: f64,
    /// Clock reading at that transition, used while playing.
    base_at_millis: i64,
}

impl ClockPlayer {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let base_at_millis = clock.now_millis();
        Self {
            clock,
            url: String::new(),
            playing: false,
            base_position: 0.0,
            base_at_millis,
        }
    }

    fn rebase(&mut self, position: f64) {
        self.base_position = position;
        self.base_at_millis = self.clock.now_millis();
    }
}

impl PlayerSurface for ClockPlayer {
    fn load(&mut self, url: &str) {
        self.url = url.to_string();
        self.rebase(0.0);
    }

    fn set_playing(&mut self, playing: bool) {
        if self.playing == playing {
            return;
        }
        // Freeze (or resume from) the current position.
        let position = self.position_seconds();
        self.rebase(position);
        self.playing = playing;
    }

    fn seek(&mut self, position_seconds: f64) {
        self.rebase(position_seconds.max(0.0));
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn position_seconds(&self) -> f64 {
        if self.playing {
            let elapsed_millis = self.clock.now_millis() - self.base_at_millis;
            self.base_position + elapsed_millis as f64 / 1000.0
        } else {
            self.base_position
        }
    }
}

#[cfg(test)]
mod tests {
    use tandem_shared::time::FixedClock;

    use super::*;

    fn player_at(millis: i64) -> (ClockPlayer, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(millis));
        (ClockPlayer::new(clock.clone()), clock)
    }

    #[test]
    fn test_position_advances_only_while_playing() {
        let (mut player, clock) = player_at(0);
        player.load("https://example.com/movie");

        // Paused: time passes, position stays.
        clock.set(5_000);
        assert_eq!(player.position_seconds(), 0.0);

        // Playing: position tracks the clock.
        player.set_playing(true);
        clock.set(15_000);
        assert_eq!(player.position_seconds(), 10.0);

        // Paused again: frozen at the pause position.
        player.set_playing(false);
        clock.set(60_000);
        assert_eq!(player.position_seconds(), 10.0);
    }

    #[test]
    fn test_seek_rebases_while_playing() {
        let (mut player, clock) = player_at(0);
        player.load("https://example.com/movie");
        player.set_playing(true);

        clock.set(4_000);
        player.seek(100.0);
        clock.set(6_000);
        assert_eq!(player.position_seconds(), 102.0);
    }

    #[test]
    fn test_load_resets_position() {
        let (mut player, clock) = player_at(0);
        player.load("https://example.com/one");
        player.set_playing(true);
        clock.set(30_000);

        player.load("https://example.com/two");
        assert_eq!(player.url(), "https://example.com/two");
        assert_eq!(player.position_seconds(), 0.0);
        // Play state survives a load; the caller decides it.
        assert!(player.is_playing());
    }

    #[test]
    fn test_redundant_play_calls_do_not_rebase() {
        let (mut player, clock) = player_at(0);
        player.load("x");
        player.set_playing(true);
        clock.set(3_000);
        player.set_playing(true);
        clock.set(5_000);
        assert_eq!(player.position_seconds(), 5.0);
    }

    #[test]
    fn test_seek_clamps_negative_positions() {
        let (mut player, _clock) = player_at(0);
        player.seek(-3.0);
        assert_eq!(player.position_seconds(), 0.0);
    }
}
