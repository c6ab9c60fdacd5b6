//! Tandem terminal client.
//!
//! Joins a watch-party room for chat and synchronized playback.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin tandem-client -- --name alice
//! cargo run --bin tandem-client -- --name bob --room ABC123
//! ```

use clap::Parser;
use uuid::Uuid;

use tandem_client::{ClientOptions, run_client};
use tandem_shared::{logger::setup_logger, room_code};

#[derive(Parser, Debug)]
#[command(name = "tandem-client")]
#[command(about = "Terminal client for Tandem watch-party rooms", long_about = None)]
struct Args {
    /// WebSocket URL of the server
    #[arg(short, long, default_value = "ws://127.0.0.1:3001/ws")]
    url: String,

    /// Room code to join; a fresh one is minted when omitted
    #[arg(short, long)]
    room: Option<String>,

    /// Display name shown to other participants
    #[arg(short, long)]
    name: String,

    /// Stable participant id; generated per process run when omitted
    #[arg(long)]
    participant_id: Option<String>,
}

#[tokio::main]
async fn main() {
    setup_logger(env!("CARGO_BIN_NAME"), "warn");

    let args = Args::parse();

    let room = match args.room {
        Some(room) => room_code::normalize(&room),
        None => {
            let room = room_code::generate();
            println!("Minted room code: {room} (share it to watch together)");
            room
        }
    };
    let participant_id = args
        .participant_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let options = ClientOptions {
        server_url: args.url,
        room_code: room,
        display_name: args.name,
        participant_id,
    };
    if let Err(e) = run_client(options).await {
        tracing::error!("Client error: {}", e);
        std::process::exit(1);
    }
}
