//! Logging setup utilities shared by the server and client binaries.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber with the specified default log level.
///
/// Sets up logging for the workspace crates and the binary itself. The
/// level can be overridden with the `RUST_LOG` environment variable.
///
/// # Arguments
///
/// * `binary_name` - The name of the binary (e.g., "tandem-server")
/// * `default_log_level` - The default log level (e.g., "debug", "info")
pub fn setup_logger(binary_name: &str, default_log_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                let lvl = default_log_level;
                format!(
                    "tandem_shared={lvl},tandem_server={lvl},tandem_client={lvl},{}={lvl}",
                    binary_name.replace('-', "_")
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
