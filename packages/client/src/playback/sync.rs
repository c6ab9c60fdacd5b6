//! Reconciliation between the authoritative shared video state and the
//! locally rendered player.
//!
//! Pure decision logic: callers feed in server updates, player events, and
//! the current instant, and get back either a seek target or an outgoing
//! state patch. The suppression window around programmatic seeks is what
//! keeps the synchronizer's own seeks from being re-reported as local
//! events and echoing around the room.

use std::time::{Duration, Instant};

use tandem_shared::protocol::{VideoState, VideoStatePatch};

/// Remote positions further than this from the observed position trigger a
/// corrective seek.
pub const DRIFT_SEEK_THRESHOLD_SECS: f64 = 1.5;

/// How long outgoing reports stay suppressed after a programmatic seek.
pub const SEEK_SUPPRESS_WINDOW: Duration = Duration::from_millis(500);

/// Drift that forces a proactive position rebroadcast while playing.
pub const PROGRESS_DRIFT_THRESHOLD_SECS: f64 = 3.0;

/// Maximum quiet time between position rebroadcasts while playing.
pub const PROGRESS_REBROADCAST_INTERVAL: Duration = Duration::from_secs(10);

/// Decision core of the playback synchronizer. One per joined room.
pub struct PlaybackSynchronizer {
    local_id: String,
    authoritative: Option<VideoState>,
    suppress_until: Option<Instant>,
    last_broadcast_at: Option<Instant>,
}

impl PlaybackSynchronizer {
    pub fn new(local_id: impl Into<String>) -> Self {
        Self {
            local_id: local_id.into(),
            authoritative: None,
            suppress_until: None,
            last_broadcast_at: None,
        }
    }

    /// The authoritative state the last server broadcast carried, if any.
    pub fn authoritative(&self) -> Option<&VideoState> {
        self.authoritative.as_ref()
    }

    fn suppressed(&self, now: Instant) -> bool {
        self.suppress_until.is_some_and(|until| now < until)
    }

    fn begin_suppression(&mut self, now: Instant) {
        self.suppress_until = Some(now + SEEK_SUPPRESS_WINDOW);
    }

    /// A video-state broadcast arrived. Returns the position to seek to
    /// when the update is remote-originated and the player has drifted too
    /// far from it; the seek opens the suppression window.
    pub fn apply_update(
        &mut self,
        state: VideoState,
        observed_position: f64,
        now: Instant,
    ) -> Option<f64> {
        let remote = state.last_updated_by != self.local_id;
        let target = state.position_seconds;
        self.authoritative = Some(state);

        if remote && (observed_position - target).abs() > DRIFT_SEEK_THRESHOLD_SECS {
            self.begin_suppression(now);
            return Some(target);
        }
        None
    }

    /// The player (re)initialized. A late joiner seeks straight to the
    /// known authoritative position, under the same suppression guard.
    pub fn on_player_ready(&mut self, now: Instant) -> Option<f64> {
        let target = self.authoritative.as_ref()?.position_seconds;
        self.begin_suppression(now);
        Some(target)
    }

    /// Local play action.
    pub fn on_local_play(&mut self, position: f64, now: Instant) -> Option<VideoStatePatch> {
        self.local_transport_event(Some(true), position, now)
    }

    /// Local pause action.
    pub fn on_local_pause(&mut self, position: f64, now: Instant) -> Option<VideoStatePatch> {
        self.local_transport_event(Some(false), position, now)
    }

    /// Local seek action. Keeps the current play flag explicit so the
    /// receiving side applies position and play state together.
    pub fn on_local_seek(&mut self, position: f64, now: Instant) -> Option<VideoStatePatch> {
        let playing = self.authoritative.as_ref().map(|s| s.is_playing);
        self.local_transport_event(playing, position, now)
    }

    /// Local url change: one atomic patch resetting position to zero and
    /// starting playback.
    pub fn on_local_url_change(&mut self, url: &str, now: Instant) -> VideoStatePatch {
        self.last_broadcast_at = Some(now);
        VideoStatePatch::for_new_url(url.trim())
    }

    /// Periodic progress callback while the player runs. Rebroadcasts the
    /// position when drift against the authoritative state exceeds the
    /// threshold, or when the last outgoing broadcast is too old —
    /// whichever comes first. Bounds both divergence and broadcast volume.
    pub fn on_progress(&mut self, position: f64, now: Instant) -> Option<VideoStatePatch> {
        if self.suppressed(now) {
            return None;
        }
        let state = self.authoritative.as_ref()?;
        if !state.is_playing {
            return None;
        }

        let drift = (position - state.position_seconds).abs();
        let quiet_too_long = match self.last_broadcast_at {
            Some(at) => now.duration_since(at) > PROGRESS_REBROADCAST_INTERVAL,
            None => true,
        };
        if drift > PROGRESS_DRIFT_THRESHOLD_SECS || quiet_too_long {
            self.last_broadcast_at = Some(now);
            return Some(VideoStatePatch {
                position_seconds: Some(position),
                ..Default::default()
            });
        }
        None
    }

    fn local_transport_event(
        &mut self,
        is_playing: Option<bool>,
        position: f64,
        now: Instant,
    ) -> Option<VideoStatePatch> {
        if self.suppressed(now) {
            // The event is fallout of our own programmatic seek.
            return None;
        }
        self.last_broadcast_at = Some(now);
        Some(VideoStatePatch {
            url: None,
            is_playing,
            position_seconds: Some(position),
        })
    }
}
