//! # quintet-server
//!
//! Directory relay binary. Serves:
//! - **`GET /ws`**: the relay socket (room membership and signal forwarding)
//! - **`GET /health`**: liveness plus room and participant counts
//! - **`GET /rooms/:room`**: current members of one room

use tracing::info;
use tracing_subscriber::EnvFilter;

use quintet_server::{serve, AppState, ServerConfig};
use quintet_shared::constants::APP_NAME;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,quintet_server=debug")),
        )
        .init();

    info!("Starting {} relay v{}", APP_NAME, env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    let addr = config.addr();
    let state = AppState::new(config);

    // -----------------------------------------------------------------------
    // 3. Run the HTTP server (blocks until shutdown)
    // -----------------------------------------------------------------------
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tokio::select! {
        result = serve(state, listener) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
