//! Tandem watch-party server.
//!
//! Holds room membership, chat history, and the shared video state; relays
//! peer handshake payloads between specific participants.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin tandem-server
//! cargo run --bin tandem-server -- --host 0.0.0.0 --port 3001
//! ```

use clap::Parser;

use tandem_shared::logger::setup_logger;

#[derive(Parser, Debug)]
#[command(name = "tandem-server")]
#[command(about = "Watch-party room broker and signaling relay", long_about = None)]
struct Args {
    /// Host address to bind the server to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port number to bind the server to
    #[arg(short = 'p', long, default_value = "3001")]
    port: u16,
}

#[tokio::main]
async fn main() {
    setup_logger(env!("CARGO_BIN_NAME"), "info");

    let args = Args::parse();

    if let Err(e) = tandem_server::run_server(args.host, args.port).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
