//! In-memory room model.
//!
//! Pure state and state transitions for one room: the member map, the
//! bounded chat log, and the shared video state with its merge rules. All
//! side effects (broadcasting, timers) live in the registry; this module is
//! directly unit-testable.

use std::collections::{HashMap, VecDeque};

use tokio::sync::mpsc;

use tandem_shared::protocol::{ChatMessage, Participant, VideoState, VideoStatePatch};

/// Channel over which a connection receives pre-serialized outbound frames.
pub type OutboundSender = mpsc::UnboundedSender<String>;

/// Chat history bound; the oldest entry is evicted first.
pub const MAX_MESSAGES: usize = 100;

/// A participant's entry in a room, augmented with routing state.
pub struct RoomMember {
    pub participant_id: String,
    pub display_name: String,
    pub sender: OutboundSender,
    /// Serial of the WebSocket connection that produced this entry. A stale
    /// connection's teardown must not evict an entry written by a newer one.
    pub connection_serial: u64,
}

/// One active room. Created lazily on first join, destroyed the instant the
/// member map becomes empty.
pub struct Room {
    pub members: HashMap<String, RoomMember>,
    pub video_state: VideoState,
    pub messages: VecDeque<ChatMessage>,
    /// Unix epoch milliseconds of room creation.
    pub created_at: i64,
}

impl Room {
    pub fn new(created_at: i64) -> Self {
        Self {
            members: HashMap::new(),
            video_state: VideoState::default(),
            messages: VecDeque::new(),
            created_at,
        }
    }

    /// Insert or overwrite a member entry. Overwriting is the rejoin path:
    /// participant ids are stable across reconnects, latest connection wins.
    pub fn insert_member(&mut self, member: RoomMember) {
        self.members.insert(member.participant_id.clone(), member);
    }

    /// Remove a member entry. When `connection_serial` is given (implicit
    /// leave on connection teardown) the entry is only removed if it still
    /// belongs to that connection. Returns whether an entry was removed.
    pub fn remove_member(&mut self, participant_id: &str, connection_serial: Option<u64>) -> bool {
        match self.members.get(participant_id) {
            None => false,
            Some(member) => {
                if let Some(serial) = connection_serial
                    && member.connection_serial != serial
                {
                    return false;
                }
                self.members.remove(participant_id);
                true
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Build the participant list, sorted by id for consistent ordering.
    pub fn participants(&self) -> Vec<Participant> {
        let mut participants: Vec<Participant> = self
            .members
            .values()
            .map(|m| Participant {
                participant_id: m.participant_id.clone(),
                display_name: m.display_name.clone(),
            })
            .collect();
        participants.sort_by(|a, b| a.participant_id.cmp(&b.participant_id));
        participants
    }

    /// Merge a patch into the video state. Unspecified fields carry over.
    /// `last_updated_at` is stamped with the server clock, clamped so it
    /// never decreases even if the host clock steps backwards.
    pub fn apply_video_patch(
        &mut self,
        patch: VideoStatePatch,
        updated_by: &str,
        now_millis: i64,
    ) -> VideoState {
        if let Some(url) = patch.url {
            self.video_state.url = url;
        }
        if let Some(is_playing) = patch.is_playing {
            self.video_state.is_playing = is_playing;
        }
        if let Some(position) = patch.position_seconds {
            self.video_state.position_seconds = position;
        }
        self.video_state.last_updated_by = updated_by.to_string();
        self.video_state.last_updated_at = now_millis.max(self.video_state.last_updated_at);
        self.video_state.clone()
    }

    /// Append a chat message, evicting the oldest entry past the bound.
    pub fn push_message(&mut self, message: ChatMessage) {
        self.messages.push_back(message);
        if self.messages.len() > MAX_MESSAGES {
            self.messages.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(participant_id: &str, serial: u64) -> RoomMember {
        let (sender, _receiver) = mpsc::unbounded_channel();
        RoomMember {
            participant_id: participant_id.to_string(),
            display_name: participant_id.to_string(),
            sender,
            connection_serial: serial,
        }
    }

    fn message(text: &str, created_at: i64) -> ChatMessage {
        ChatMessage {
            id: format!("id-{created_at}"),
            participant_id: "alice-id".to_string(),
            display_name: "alice".to_string(),
            text: text.to_string(),
            created_at,
        }
    }

    #[test]
    fn test_participants_sorted_by_id() {
        let mut room = Room::new(0);
        room.insert_member(member("charlie", 1));
        room.insert_member(member("alice", 2));
        room.insert_member(member("bob", 3));

        let participants = room.participants();
        let ids: Vec<&str> = participants
            .iter()
            .map(|p| p.participant_id.as_str())
            .collect();
        assert_eq!(ids, vec!["alice", "bob", "charlie"]);
    }

    #[test]
    fn test_insert_member_overwrites_on_rejoin() {
        // given: alice joined on connection 1
        let mut room = Room::new(0);
        room.insert_member(member("alice", 1));

        // when: alice rejoins on connection 2
        room.insert_member(member("alice", 2));

        // then: one roster entry, owned by the newer connection
        assert_eq!(room.members.len(), 1);
        assert_eq!(room.members["alice"].connection_serial, 2);
    }

    #[test]
    fn test_remove_member_ignores_stale_connection_serial() {
        // given: alice's entry belongs to connection 2
        let mut room = Room::new(0);
        room.insert_member(member("alice", 2));

        // when: connection 1's teardown tries to remove her
        let removed = room.remove_member("alice", Some(1));

        // then: the fresh entry survives
        assert!(!removed);
        assert!(room.members.contains_key("alice"));

        // Explicit leave (no serial) always removes.
        assert!(room.remove_member("alice", None));
        assert!(room.is_empty());
    }

    #[test]
    fn test_remove_member_is_idempotent() {
        let mut room = Room::new(0);
        room.insert_member(member("alice", 1));
        assert!(room.remove_member("alice", None));
        assert!(!room.remove_member("alice", None));
    }

    #[test]
    fn test_video_patch_carries_over_unspecified_fields() {
        // given: a state set by alice
        let mut room = Room::new(0);
        room.apply_video_patch(
            VideoStatePatch {
                url: Some("x".to_string()),
                is_playing: Some(false),
                position_seconds: Some(10.0),
            },
            "alice",
            1_000,
        );

        // when: bob patches only the play flag
        let state = room.apply_video_patch(
            VideoStatePatch {
                is_playing: Some(true),
                ..Default::default()
            },
            "bob",
            2_000,
        );

        // then: everything else carries over and attribution moves to bob
        assert_eq!(state.url, "x");
        assert!(state.is_playing);
        assert_eq!(state.position_seconds, 10.0);
        assert_eq!(state.last_updated_by, "bob");
        assert_eq!(state.last_updated_at, 2_000);
    }

    #[test]
    fn test_video_timestamp_never_decreases() {
        let mut room = Room::new(0);
        room.apply_video_patch(VideoStatePatch::default(), "alice", 5_000);

        // Host clock stepped backwards between updates.
        let state = room.apply_video_patch(VideoStatePatch::default(), "bob", 3_000);
        assert_eq!(state.last_updated_at, 5_000);

        let state = room.apply_video_patch(VideoStatePatch::default(), "bob", 6_000);
        assert_eq!(state.last_updated_at, 6_000);
    }

    #[test]
    fn test_chat_log_bounded_to_most_recent_100() {
        let mut room = Room::new(0);
        for i in 0..(MAX_MESSAGES as i64 + 1) {
            room.push_message(message(&format!("m{i}"), i));
        }

        assert_eq!(room.messages.len(), MAX_MESSAGES);
        // The oldest entry is gone, the newest is present.
        assert!(room.messages.iter().all(|m| m.created_at != 0));
        assert_eq!(
            room.messages.back().map(|m| m.created_at),
            Some(MAX_MESSAGES as i64)
        );
        assert_eq!(room.messages.front().map(|m| m.created_at), Some(1));
    }
}
