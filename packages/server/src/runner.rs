//! Server execution logic.

use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use tandem_shared::time::SystemClock;

use super::{
    handler::{get_room_detail, get_rooms, health_check, websocket_handler},
    signal::shutdown_signal,
    state::AppState,
};

/// Assemble the application router. Exposed so integration tests can serve
/// it in-process on an ephemeral port.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .route("/api/health", get(health_check))
        .route("/api/rooms", get(get_rooms))
        .route("/api/rooms/{room_code}", get(get_room_detail))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the watch-party server
///
/// # Arguments
///
/// * `host` - The host address to bind to (e.g., "127.0.0.1")
/// * `port` - The port number to bind to (e.g., 8080)
pub async fn run_server(host: String, port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let state = Arc::new(AppState::new(Arc::new(SystemClock)));
    let app = build_router(state);

    let bind_addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    tracing::info!("Tandem server listening on {}", listener.local_addr()?);
    tracing::info!("Connect to: ws://{}/ws", bind_addr);
    tracing::info!("Press Ctrl+C to shutdown gracefully");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");

    Ok(())
}
