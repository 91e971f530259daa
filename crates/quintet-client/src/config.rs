//! Client configuration loaded from environment variables.
//!
//! Every setting has a default that works against a relay on the local
//! machine. Command-line flags override what is read here.

use std::path::PathBuf;
use std::time::Duration;

use quintet_shared::constants::{DEFAULT_RELAY_URL, HEARTBEAT_INTERVAL_SECS, TYPING_IDLE_MS};

use crate::session::ReconnectPolicy;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint of the directory relay.
    /// Env: `RELAY_URL`
    /// Default: `ws://127.0.0.1:8000/ws`
    pub relay_url: String,

    /// Location of the local message database.
    /// Env: `QUINTET_DB_PATH`
    /// Default: `None` (platform data directory)
    pub db_path: Option<PathBuf>,

    /// Interface direct links listen on when this side initiates.
    /// Env: `LINK_BIND_HOST`
    /// Default: `0.0.0.0`
    pub link_bind_host: String,

    /// Host other participants dial to reach our links.
    /// Env: `LINK_ADVERTISE_HOST`
    /// Default: `127.0.0.1`
    pub link_advertise_host: String,

    pub heartbeat_interval: Duration,
    pub typing_idle: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            db_path: None,
            link_bind_host: "0.0.0.0".to_string(),
            link_advertise_host: "127.0.0.1".to_string(),
            heartbeat_interval: Duration::from_secs(HEARTBEAT_INTERVAL_SECS),
            typing_idle: Duration::from_millis(TYPING_IDLE_MS),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("RELAY_URL") {
            if url.starts_with("ws://") || url.starts_with("wss://") {
                config.relay_url = url;
            } else {
                tracing::warn!(value = %url, "Invalid RELAY_URL, using default");
            }
        }

        if let Ok(path) = std::env::var("QUINTET_DB_PATH") {
            if !path.is_empty() {
                config.db_path = Some(PathBuf::from(path));
            }
        }

        if let Ok(host) = std::env::var("LINK_BIND_HOST") {
            config.link_bind_host = host;
        }

        if let Ok(host) = std::env::var("LINK_ADVERTISE_HOST") {
            config.link_advertise_host = host;
        }

        config
    }
}
