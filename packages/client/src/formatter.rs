//! Message formatting for the terminal client display.

use std::io::Write;

use tandem_shared::protocol::{ChatMessage, Participant, VideoState};
use tandem_shared::time::millis_to_rfc3339;

/// Message formatter for terminal display
pub struct MessageFormatter;

impl MessageFormatter {
    /// Format the room snapshot shown right after joining.
    pub fn format_snapshot(
        participants: &[Participant],
        messages: &[ChatMessage],
        video_state: &VideoState,
        self_id: &str,
    ) -> String {
        let mut output = String::new();
        output.push_str("\n============================================================\n");
        output.push_str(&Self::format_participants(participants, self_id));
        if video_state.url.is_empty() {
            output.push_str("No video loaded yet. Use /url <link> to start one.\n");
        } else {
            output.push_str(&Self::format_video_state(video_state, self_id));
        }
        if !messages.is_empty() {
            output.push_str(&format!("Last {} message(s):\n", messages.len()));
            for message in messages {
                output.push_str(&Self::format_chat_message(message));
            }
        }
        output.push_str("============================================================\n");
        output
    }

    /// Format the current roster.
    pub fn format_participants(participants: &[Participant], self_id: &str) -> String {
        let mut output = String::from("Watching together:\n");
        if participants.is_empty() {
            output.push_str("  (nobody)\n");
        } else {
            for participant in participants {
                let me_suffix = if participant.participant_id == self_id {
                    " (me)"
                } else {
                    ""
                };
                output.push_str(&format!("  {}{}\n", participant.display_name, me_suffix));
            }
        }
        output
    }

    pub fn format_participant_joined(participant_id: &str) -> String {
        format!("\n+ {} joined the room\n", participant_id)
    }

    pub fn format_participant_left(participant_id: &str) -> String {
        format!("\n- {} left the room\n", participant_id)
    }

    pub fn format_chat_message(message: &ChatMessage) -> String {
        format!(
            "[{}] {}: {}\n",
            millis_to_rfc3339(message.created_at),
            message.display_name,
            message.text
        )
    }

    /// Format a video-state transition notice.
    pub fn format_video_state(state: &VideoState, self_id: &str) -> String {
        let verb = if state.is_playing { "playing" } else { "paused" };
        let by = if state.last_updated_by == self_id {
            "you".to_string()
        } else if state.last_updated_by.is_empty() {
            "nobody yet".to_string()
        } else {
            state.last_updated_by.clone()
        };
        format!(
            "~ video {} at {:.1}s: {} (last update by {})\n",
            verb, state.position_seconds, state.url, by
        )
    }

    pub fn format_sync_seek(position_seconds: f64) -> String {
        format!("~ synced playback to {position_seconds:.1}s\n")
    }
}

/// Redraw the input prompt after asynchronous output interrupted it.
pub fn redisplay_prompt(display_name: &str) {
    print!("{}> ", display_name);
    let _ = std::io::stdout().flush();
}
