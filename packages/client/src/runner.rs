//! Terminal client execution: outer server-reconnect loop and the
//! per-session REPL.
//!
//! The terminal client drives chat and synchronized playback against a
//! headless [`ClockPlayer`]. Media signals addressed to it are logged and
//! ignored: the A/V mesh needs an embedder that supplies a real peer
//! transport.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::sync::mpsc;

use tandem_shared::protocol::{Participant, ServerEvent, VideoState};
use tandem_shared::time::SystemClock;

use crate::error::ClientError;
use crate::formatter::{MessageFormatter, redisplay_prompt};
use crate::playback::{ClockPlayer, PlaybackSynchronizer, PlayerSurface};
use crate::session::{RoomSession, SessionConfig};

const MAX_RECONNECT_ATTEMPTS: u32 = 5;
const RECONNECT_INTERVAL_SECS: u64 = 5;
const PROGRESS_TICK: Duration = Duration::from_secs(1);

/// Everything the binary collects from the command line.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub server_url: String,
    pub room_code: String,
    pub display_name: String,
    pub participant_id: String,
}

/// Run the terminal client with server-reconnection logic. Distinct from
/// per-peer-link reconnection: this heals the WebSocket to the server.
pub async fn run_client(options: ClientOptions) -> Result<(), Box<dyn std::error::Error>> {
    let mut reconnect_count = 0;

    loop {
        tracing::info!(
            "Connecting to {} as '{}' (attempt {}/{})",
            options.server_url,
            options.display_name,
            reconnect_count + 1,
            MAX_RECONNECT_ATTEMPTS
        );

        match run_room_session(&options).await {
            Ok(()) => {
                tracing::info!("Session ended");
                break;
            }
            Err(e) => {
                tracing::warn!("Connection lost: {}", e);
                reconnect_count += 1;

                if reconnect_count >= MAX_RECONNECT_ATTEMPTS {
                    tracing::error!(
                        "Failed to reconnect after {} attempts. Exiting.",
                        MAX_RECONNECT_ATTEMPTS
                    );
                    std::process::exit(1);
                }

                tracing::info!(
                    "Reconnecting in {} seconds... (attempt {}/{})",
                    RECONNECT_INTERVAL_SECS,
                    reconnect_count + 1,
                    MAX_RECONNECT_ATTEMPTS
                );
                tokio::time::sleep(Duration::from_secs(RECONNECT_INTERVAL_SECS)).await;
            }
        }
    }

    Ok(())
}

/// One connected session: join, pump events, read the REPL. `Ok(())` means
/// the user quit; an error means the connection dropped and the outer loop
/// may retry.
async fn run_room_session(options: &ClientOptions) -> Result<(), ClientError> {
    let (session, mut events) = RoomSession::connect(SessionConfig {
        server_url: options.server_url.clone(),
        room_code: options.room_code.clone(),
        participant_id: options.participant_id.clone(),
        display_name: options.display_name.clone(),
    })
    .await?;

    println!(
        "\nJoined room '{}' as '{}'.",
        session.room_code(),
        options.display_name
    );
    println!("Chat by typing. /play /pause /seek <secs> /url <link> /who /quit\n");

    let mut player = ClockPlayer::new(Arc::new(SystemClock));
    let mut sync = PlaybackSynchronizer::new(options.participant_id.clone());
    let mut roster: Vec<Participant> = Vec::new();

    // Blocking thread for rustyline (synchronous readline).
    let (input_tx, mut input_rx) = mpsc::unbounded_channel::<String>();
    let prompt_name = options.display_name.clone();
    std::thread::spawn(move || {
        let mut rl = match DefaultEditor::new() {
            Ok(rl) => rl,
            Err(e) => {
                eprintln!("Failed to initialize readline: {}", e);
                return;
            }
        };
        let prompt = format!("{}> ", prompt_name);
        loop {
            match rl.readline(&prompt) {
                Ok(line) => {
                    let line = line.trim().to_string();
                    if !line.is_empty() {
                        rl.add_history_entry(&line).ok();
                        if input_tx.send(line).is_err() {
                            break;
                        }
                    }
                }
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                    let _ = input_tx.send("/quit".to_string());
                    break;
                }
                Err(e) => {
                    tracing::error!("Readline error: {}", e);
                    break;
                }
            }
        }
    });

    let mut progress = tokio::time::interval(PROGRESS_TICK);
    progress.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    return Err(ClientError::Connection("Connection lost".to_string()));
                };
                handle_server_event(
                    event,
                    options,
                    &mut player,
                    &mut sync,
                    &mut roster,
                );
            }
            line = input_rx.recv() => {
                let Some(line) = line else { break; };
                if !handle_input_line(&line, &session, &mut player, &mut sync, &roster, options) {
                    break;
                }
            }
            _ = progress.tick() => {
                if player.is_playing()
                    && let Some(patch) = sync.on_progress(player.position_seconds(), Instant::now())
                {
                    session.update_video_state(patch);
                }
            }
        }
    }

    session.shutdown().await;
    Ok(())
}

fn handle_server_event(
    event: ServerEvent,
    options: &ClientOptions,
    player: &mut ClockPlayer,
    sync: &mut PlaybackSynchronizer,
    roster: &mut Vec<Participant>,
) {
    match event {
        ServerEvent::Snapshot {
            video_state,
            messages,
            participants,
        } => {
            print!(
                "{}",
                MessageFormatter::format_snapshot(
                    &participants,
                    &messages,
                    &video_state,
                    &options.participant_id
                )
            );
            *roster = participants;
            apply_video_state(video_state, player, sync);
        }
        ServerEvent::Participants { participants } => {
            print!(
                "{}",
                MessageFormatter::format_participants(&participants, &options.participant_id)
            );
            *roster = participants;
        }
        ServerEvent::VideoState { state } => {
            print!(
                "{}",
                MessageFormatter::format_video_state(&state, &options.participant_id)
            );
            apply_video_state(state, player, sync);
        }
        ServerEvent::Message { message } => {
            print!("{}", MessageFormatter::format_chat_message(&message));
        }
        ServerEvent::ParticipantJoined { participant_id } => {
            print!("{}", MessageFormatter::format_participant_joined(&participant_id));
        }
        ServerEvent::ParticipantLeft { participant_id } => {
            print!("{}", MessageFormatter::format_participant_left(&participant_id));
        }
        ServerEvent::Signal { from, .. } => {
            tracing::debug!(
                "Ignoring media signal from '{}': terminal client carries no peer transport",
                from
            );
            return;
        }
    }
    redisplay_prompt(&options.display_name);
}

/// Reconcile an authoritative state into the local player.
fn apply_video_state(
    state: VideoState,
    player: &mut ClockPlayer,
    sync: &mut PlaybackSynchronizer,
) {
    if !state.url.is_empty() && state.url != player.url() {
        player.load(&state.url);
    }
    player.set_playing(state.is_playing);
    if let Some(target) = sync.apply_update(state, player.position_seconds(), Instant::now()) {
        player.seek(target);
        print!("{}", MessageFormatter::format_sync_seek(target));
    }
}

/// Returns false when the user asked to quit.
fn handle_input_line(
    line: &str,
    session: &RoomSession,
    player: &mut ClockPlayer,
    sync: &mut PlaybackSynchronizer,
    roster: &[Participant],
    options: &ClientOptions,
) -> bool {
    let now = Instant::now();
    match line {
        "/quit" | "/q" => return false,
        "/who" => {
            print!(
                "{}",
                MessageFormatter::format_participants(roster, &options.participant_id)
            );
        }
        "/play" => {
            player.set_playing(true);
            if let Some(patch) = sync.on_local_play(player.position_seconds(), now) {
                session.update_video_state(patch);
            }
        }
        "/pause" => {
            player.set_playing(false);
            if let Some(patch) = sync.on_local_pause(player.position_seconds(), now) {
                session.update_video_state(patch);
            }
        }
        _ => {
            if let Some(position) = line.strip_prefix("/seek ") {
                match position.trim().parse::<f64>() {
                    Ok(position) => {
                        player.seek(position);
                        if let Some(patch) = sync.on_local_seek(player.position_seconds(), now) {
                            session.update_video_state(patch);
                        }
                    }
                    Err(_) => println!("Usage: /seek <seconds>"),
                }
            } else if let Some(url) = line.strip_prefix("/url ") {
                let url = url.trim();
                if url.is_empty() {
                    println!("Usage: /url <link>");
                } else {
                    player.load(url);
                    player.set_playing(true);
                    session.update_video_state(sync.on_local_url_change(url, now));
                }
            } else if line.starts_with('/') {
                println!("Unknown command. /play /pause /seek <secs> /url <link> /who /quit");
            } else {
                // Plain text is chat; the server's broadcast echoes it back
                // for display.
                session.send_chat(line);
            }
        }
    }
    true
}
