//! Room registry and signaling relay.
//!
//! Owns every active room behind one async mutex. Each public operation
//! locks, runs to completion, and releases — that serialization is what
//! makes concurrent video-state updates last-merge-wins without any further
//! coordination. Operations never return errors to the caller: a missing
//! room or participant is logged and dropped, because the protocol has no
//! server-to-client error channel by design.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use tandem_shared::protocol::{
    ChatMessage, Participant, ServerEvent, SignalPayload, VideoState, VideoStatePatch,
};
use tandem_shared::room_code;
use tandem_shared::time::Clock;

use crate::room::{OutboundSender, Room, RoomMember};

/// Registry of all active rooms.
pub struct RoomRegistry {
    rooms: Mutex<HashMap<String, Room>>,
    clock: Arc<dyn Clock>,
}

/// Read-only room listing entry for the HTTP API.
#[derive(Debug, Clone, Serialize)]
pub struct RoomOverview {
    pub room_code: String,
    pub member_count: usize,
    pub video_url: String,
    pub created_at: i64,
}

/// Read-only room detail for the HTTP API.
#[derive(Debug, Clone, Serialize)]
pub struct RoomDetails {
    pub room_code: String,
    pub participants: Vec<Participant>,
    pub video_state: VideoState,
    pub message_count: usize,
    pub created_at: i64,
}

impl RoomRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Insert (or overwrite) a participant entry, creating the room if
    /// absent. Broadcasts the updated roster room-wide, sends the full
    /// state snapshot to the joining connection only, and cues everyone
    /// else with the arrival's id.
    pub async fn join(
        &self,
        room_code: &str,
        participant_id: &str,
        display_name: &str,
        sender: OutboundSender,
        connection_serial: u64,
    ) {
        let code = room_code::normalize(room_code);
        let now = self.clock.now_millis();
        let mut rooms = self.rooms.lock().await;

        let room = rooms.entry(code.clone()).or_insert_with(|| {
            tracing::info!("Room '{}' created", code);
            Room::new(now)
        });

        room.insert_member(RoomMember {
            participant_id: participant_id.to_string(),
            display_name: display_name.to_string(),
            sender: sender.clone(),
            connection_serial,
        });
        tracing::info!(
            "Participant '{}' ({}) joined room '{}'",
            display_name,
            participant_id,
            code
        );

        // Roster to everyone, including the newcomer.
        let participants = room.participants();
        broadcast(
            room,
            &ServerEvent::Participants {
                participants: participants.clone(),
            },
        );

        // Snapshot to the joining connection only.
        let snapshot = ServerEvent::Snapshot {
            video_state: room.video_state.clone(),
            messages: room.messages.iter().cloned().collect(),
            participants,
        };
        send_to(&sender, participant_id, &encode(&snapshot));

        // Arrival cue to everyone already present.
        broadcast_except(
            room,
            participant_id,
            &ServerEvent::ParticipantJoined {
                participant_id: participant_id.to_string(),
            },
        );
    }

    /// Merge a patch into a room's video state and broadcast the entire
    /// merged state to every connection, the sender included (the echo is
    /// its confirmation). Silent no-op when the room is gone — that race
    /// with leave is expected.
    pub async fn update_video_state(
        &self,
        room_code: &str,
        participant_id: &str,
        patch: VideoStatePatch,
    ) {
        let code = room_code::normalize(room_code);
        let now = self.clock.now_millis();
        let mut rooms = self.rooms.lock().await;

        let Some(room) = rooms.get_mut(&code) else {
            tracing::warn!(
                "Video-state update for unknown room '{}' from '{}', dropping",
                code,
                participant_id
            );
            return;
        };

        let state = room.apply_video_patch(patch, participant_id, now);
        broadcast(room, &ServerEvent::VideoState { state });
    }

    /// Stamp and append a chat message, then broadcast it room-wide.
    pub async fn post_message(
        &self,
        room_code: &str,
        participant_id: &str,
        display_name: &str,
        text: &str,
    ) {
        let code = room_code::normalize(room_code);
        let now = self.clock.now_millis();
        let mut rooms = self.rooms.lock().await;

        let Some(room) = rooms.get_mut(&code) else {
            tracing::warn!(
                "Chat message for unknown room '{}' from '{}', dropping",
                code,
                participant_id
            );
            return;
        };

        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            participant_id: participant_id.to_string(),
            display_name: display_name.to_string(),
            text: text.to_string(),
            created_at: now,
        };
        room.push_message(message.clone());
        broadcast(room, &ServerEvent::Message { message });
    }

    /// Forward a handshake payload to the target participant's connection
    /// only, tagged with the sender's id. Logged and dropped when the target
    /// is not currently present (it may have just left).
    pub async fn relay_signal(
        &self,
        room_code: &str,
        from_participant_id: &str,
        to_participant_id: &str,
        payload: SignalPayload,
    ) {
        let code = room_code::normalize(room_code);
        let rooms = self.rooms.lock().await;

        let Some(room) = rooms.get(&code) else {
            tracing::warn!(
                "Signal for unknown room '{}' from '{}', dropping",
                code,
                from_participant_id
            );
            return;
        };
        let Some(target) = room.members.get(to_participant_id) else {
            tracing::warn!(
                "Signal target '{}' not found in room '{}', dropping",
                to_participant_id,
                code
            );
            return;
        };

        let event = ServerEvent::Signal {
            from: from_participant_id.to_string(),
            payload,
        };
        send_to(&target.sender, to_participant_id, &encode(&event));
    }

    /// Remove a participant, broadcast the departure and the updated roster,
    /// and destroy the room once empty. Both the explicit leave path and the
    /// connection-teardown path land here; the removal guard in
    /// [`Room::remove_member`] makes a second arrival a no-op.
    pub async fn leave(
        &self,
        room_code: &str,
        participant_id: &str,
        connection_serial: Option<u64>,
    ) {
        let code = room_code::normalize(room_code);
        let mut rooms = self.rooms.lock().await;

        let Some(room) = rooms.get_mut(&code) else {
            return;
        };
        if !room.remove_member(participant_id, connection_serial) {
            return;
        }
        tracing::info!("Participant '{}' left room '{}'", participant_id, code);

        broadcast(
            room,
            &ServerEvent::ParticipantLeft {
                participant_id: participant_id.to_string(),
            },
        );
        broadcast(
            room,
            &ServerEvent::Participants {
                participants: room.participants(),
            },
        );

        if room.is_empty() {
            rooms.remove(&code);
            tracing::info!("Room '{}' destroyed (empty)", code);
        }
    }

    /// Listing of all active rooms for the HTTP API.
    pub async fn overviews(&self) -> Vec<RoomOverview> {
        let rooms = self.rooms.lock().await;
        let mut overviews: Vec<RoomOverview> = rooms
            .iter()
            .map(|(code, room)| RoomOverview {
                room_code: code.clone(),
                member_count: room.members.len(),
                video_url: room.video_state.url.clone(),
                created_at: room.created_at,
            })
            .collect();
        overviews.sort_by(|a, b| a.room_code.cmp(&b.room_code));
        overviews
    }

    /// Detail view of one room, `None` when it does not exist (any more).
    pub async fn details(&self, room_code: &str) -> Option<RoomDetails> {
        let code = room_code::normalize(room_code);
        let rooms = self.rooms.lock().await;
        rooms.get(&code).map(|room| RoomDetails {
            room_code: code.clone(),
            participants: room.participants(),
            video_state: room.video_state.clone(),
            message_count: room.messages.len(),
            created_at: room.created_at,
        })
    }
}

fn encode(event: &ServerEvent) -> String {
    // Protocol types serialize infallibly.
    serde_json::to_string(event).unwrap()
}

fn send_to(sender: &OutboundSender, participant_id: &str, frame: &str) {
    if sender.send(frame.to_string()).is_err() {
        tracing::warn!(
            "Failed to push frame to participant '{}' (connection gone)",
            participant_id
        );
    }
}

fn broadcast(room: &Room, event: &ServerEvent) {
    let frame = encode(event);
    for member in room.members.values() {
        send_to(&member.sender, &member.participant_id, &frame);
    }
}

fn broadcast_except(room: &Room, exclude_participant_id: &str, event: &ServerEvent) {
    let frame = encode(event);
    for member in room.members.values() {
        if member.participant_id != exclude_participant_id {
            send_to(&member.sender, &member.participant_id, &frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_shared::time::FixedClock;
    use tokio::sync::mpsc;

    struct TestPeer {
        id: String,
        rx: mpsc::UnboundedReceiver<String>,
    }

    impl TestPeer {
        /// Drain and decode everything currently queued for this peer.
        fn drain(&mut self) -> Vec<ServerEvent> {
            let mut events = Vec::new();
            while let Ok(frame) = self.rx.try_recv() {
                events.push(serde_json::from_str(&frame).unwrap());
            }
            events
        }
    }

    fn registry_at(millis: i64) -> (RoomRegistry, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(millis));
        (RoomRegistry::new(clock.clone()), clock)
    }

    async fn join(registry: &RoomRegistry, room: &str, id: &str, serial: u64) -> TestPeer {
        let (tx, rx) = mpsc::unbounded_channel();
        registry.join(room, id, id, tx, serial).await;
        TestPeer {
            id: id.to_string(),
            rx,
        }
    }

    fn roster_of(events: &[ServerEvent]) -> Option<Vec<String>> {
        events.iter().rev().find_map(|e| match e {
            ServerEvent::Participants { participants } => Some(
                participants
                    .iter()
                    .map(|p| p.participant_id.clone())
                    .collect(),
            ),
            _ => None,
        })
    }

    #[tokio::test]
    async fn test_join_sends_snapshot_to_joiner_only() {
        // given: alice alone in a room
        let (registry, _clock) = registry_at(1_000);
        let mut alice = join(&registry, "ABC123", "alice", 1).await;
        alice.drain();

        // when: bob joins
        let mut bob = join(&registry, "ABC123", "bob", 2).await;

        // then: bob gets roster + snapshot, alice gets roster + arrival cue
        let bob_events = bob.drain();
        assert!(
            bob_events
                .iter()
                .any(|e| matches!(e, ServerEvent::Snapshot { .. }))
        );
        assert_eq!(
            roster_of(&bob_events),
            Some(vec!["alice".to_string(), "bob".to_string()])
        );

        let alice_events = alice.drain();
        assert!(
            !alice_events
                .iter()
                .any(|e| matches!(e, ServerEvent::Snapshot { .. }))
        );
        assert!(alice_events.iter().any(|e| matches!(
            e,
            ServerEvent::ParticipantJoined { participant_id } if participant_id == "bob"
        )));
    }

    #[tokio::test]
    async fn test_join_does_not_cue_the_newcomer_itself() {
        let (registry, _clock) = registry_at(1_000);
        let mut alice = join(&registry, "ABC123", "alice", 1).await;
        let events = alice.drain();
        assert!(
            !events
                .iter()
                .any(|e| matches!(e, ServerEvent::ParticipantJoined { .. }))
        );
    }

    #[tokio::test]
    async fn test_membership_reflects_joins_minus_leaves() {
        let (registry, _clock) = registry_at(0);
        let mut alice = join(&registry, "room", "alice", 1).await;
        let _bob = join(&registry, "room", "bob", 2).await;
        let _carol = join(&registry, "room", "carol", 3).await;
        registry.leave("room", "bob", None).await;

        let roster = roster_of(&alice.drain()).unwrap();
        assert_eq!(roster, vec!["alice".to_string(), "carol".to_string()]);
    }

    #[tokio::test]
    async fn test_room_codes_are_case_normalized() {
        let (registry, _clock) = registry_at(0);
        let mut alice = join(&registry, "abc123", "alice", 1).await;
        alice.drain();
        let mut bob = join(&registry, " ABC123 ", "bob", 2).await;
        bob.drain();

        let details = registry.details("AbC123").await.unwrap();
        assert_eq!(details.participants.len(), 2);
    }

    #[tokio::test]
    async fn test_video_state_merge_echoes_to_sender() {
        // given: alice set url/position, per the shared-state scenario
        let (registry, clock) = registry_at(10_000);
        let mut alice = join(&registry, "ABC123", "alice", 1).await;
        let mut bob = join(&registry, "ABC123", "bob", 2).await;
        registry
            .update_video_state(
                "ABC123",
                "alice",
                VideoStatePatch {
                    url: Some("x".to_string()),
                    is_playing: Some(false),
                    position_seconds: Some(10.0),
                },
            )
            .await;
        alice.drain();
        bob.drain();

        // when: bob patches only the play flag
        clock.set(20_000);
        registry
            .update_video_state(
                "ABC123",
                "bob",
                VideoStatePatch {
                    is_playing: Some(true),
                    ..Default::default()
                },
            )
            .await;

        // then: both (sender included) receive the full merged state
        for peer in [&mut alice, &mut bob] {
            let events = peer.drain();
            let state = events
                .iter()
                .find_map(|e| match e {
                    ServerEvent::VideoState { state } => Some(state.clone()),
                    _ => None,
                })
                .unwrap_or_else(|| panic!("no video state delivered to {}", peer.id));
            assert_eq!(state.url, "x");
            assert!(state.is_playing);
            assert_eq!(state.position_seconds, 10.0);
            assert_eq!(state.last_updated_by, "bob");
            assert_eq!(state.last_updated_at, 20_000);
        }
    }

    #[tokio::test]
    async fn test_video_state_update_for_missing_room_is_a_silent_noop() {
        let (registry, _clock) = registry_at(0);
        registry
            .update_video_state("GHOST", "alice", VideoStatePatch::default())
            .await;
        assert!(registry.details("GHOST").await.is_none());
    }

    #[tokio::test]
    async fn test_chat_is_server_stamped_and_broadcast() {
        let (registry, _clock) = registry_at(42_000);
        let mut alice = join(&registry, "room", "alice", 1).await;
        let mut bob = join(&registry, "room", "bob", 2).await;
        alice.drain();
        bob.drain();

        registry.post_message("room", "alice", "alice", "hello").await;

        for peer in [&mut alice, &mut bob] {
            let events = peer.drain();
            let message = events
                .iter()
                .find_map(|e| match e {
                    ServerEvent::Message { message } => Some(message.clone()),
                    _ => None,
                })
                .unwrap();
            assert_eq!(message.text, "hello");
            assert_eq!(message.created_at, 42_000);
            assert!(!message.id.is_empty());
        }
    }

    #[tokio::test]
    async fn test_signal_reaches_only_the_target() {
        let (registry, _clock) = registry_at(0);
        let mut alice = join(&registry, "room", "alice", 1).await;
        let mut bob = join(&registry, "room", "bob", 2).await;
        let mut carol = join(&registry, "room", "carol", 3).await;
        alice.drain();
        bob.drain();
        carol.drain();

        let payload = SignalPayload {
            kind: tandem_shared::protocol::SignalKind::Offer,
            data: serde_json::json!({"sdp": "v=0"}),
        };
        registry.relay_signal("room", "alice", "bob", payload).await;

        let bob_events = bob.drain();
        assert!(bob_events.iter().any(|e| matches!(
            e,
            ServerEvent::Signal { from, .. } if from == "alice"
        )));
        assert!(alice.drain().is_empty());
        assert!(carol.drain().is_empty());
    }

    #[tokio::test]
    async fn test_signal_to_departed_target_is_dropped() {
        let (registry, _clock) = registry_at(0);
        let mut alice = join(&registry, "room", "alice", 1).await;
        let bob = join(&registry, "room", "bob", 2).await;
        registry.leave("room", "bob", None).await;
        alice.drain();
        drop(bob);

        let payload = SignalPayload {
            kind: tandem_shared::protocol::SignalKind::Answer,
            data: serde_json::Value::Null,
        };
        registry.relay_signal("room", "alice", "bob", payload).await;
        assert!(alice.drain().is_empty());
    }

    #[tokio::test]
    async fn test_empty_room_is_destroyed_not_reused() {
        // given: a room with history and video state
        let (registry, _clock) = registry_at(0);
        let _alice = join(&registry, "ABC123", "alice", 1).await;
        registry.post_message("ABC123", "alice", "alice", "hi").await;
        registry
            .update_video_state(
                "ABC123",
                "alice",
                VideoStatePatch {
                    url: Some("x".to_string()),
                    ..Default::default()
                },
            )
            .await;

        // when: the last member leaves and someone joins the same code
        registry.leave("ABC123", "alice", None).await;
        assert!(registry.details("ABC123").await.is_none());
        let mut bob = join(&registry, "ABC123", "bob", 2).await;

        // then: the snapshot is pristine
        let events = bob.drain();
        let (video_state, messages) = events
            .iter()
            .find_map(|e| match e {
                ServerEvent::Snapshot {
                    video_state,
                    messages,
                    ..
                } => Some((video_state.clone(), messages.clone())),
                _ => None,
            })
            .unwrap();
        assert_eq!(video_state, VideoState::default());
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn test_stale_teardown_does_not_evict_rejoined_participant() {
        // given: alice joined on connection 1, then rejoined on connection 2
        let (registry, _clock) = registry_at(0);
        let _old = join(&registry, "room", "alice", 1).await;
        let _new = join(&registry, "room", "alice", 2).await;

        // when: connection 1's implicit teardown fires late
        registry.leave("room", "alice", Some(1)).await;

        // then: alice is still in the room
        let details = registry.details("room").await.unwrap();
        assert_eq!(details.participants.len(), 1);

        // and explicit leave still works
        registry.leave("room", "alice", None).await;
        assert!(registry.details("room").await.is_none());
    }

    #[tokio::test]
    async fn test_double_leave_emits_one_departure() {
        let (registry, _clock) = registry_at(0);
        let mut alice = join(&registry, "room", "alice", 1).await;
        let _bob = join(&registry, "room", "bob", 2).await;
        alice.drain();

        registry.leave("room", "bob", None).await;
        registry.leave("room", "bob", Some(2)).await;

        let departures = alice
            .drain()
            .iter()
            .filter(|e| matches!(e, ServerEvent::ParticipantLeft { .. }))
            .count();
        assert_eq!(departures, 1);
    }

    #[tokio::test]
    async fn test_overviews_list_live_rooms() {
        let (registry, _clock) = registry_at(7_000);
        let _a = join(&registry, "AAAA", "alice", 1).await;
        let _b = join(&registry, "BBBB", "bob", 2).await;

        let overviews = registry.overviews().await;
        assert_eq!(overviews.len(), 2);
        assert_eq!(overviews[0].room_code, "AAAA");
        assert_eq!(overviews[0].member_count, 1);
        assert_eq!(overviews[0].created_at, 7_000);
    }
}
