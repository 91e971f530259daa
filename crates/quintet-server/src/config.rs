//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the relay can start with zero
//! configuration for local development.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use quintet_shared::constants::{DEFAULT_RELAY_PORT, ROOM_CAPACITY};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface to listen on.
    /// Env: `HOST`
    /// Default: `0.0.0.0`
    pub host: IpAddr,

    /// TCP port for the HTTP and WebSocket endpoints.
    /// Env: `PORT`
    /// Default: `8000`
    pub port: u16,

    /// Maximum participants per room. Never above the mesh limit of 5.
    /// Env: `ROOM_CAPACITY`
    /// Default: `5`
    pub room_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_RELAY_PORT,
            room_capacity: ROOM_CAPACITY,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("HOST") {
            match host.parse::<IpAddr>() {
                Ok(parsed) => config.host = parsed,
                Err(_) => tracing::warn!(value = %host, "Invalid HOST, using default"),
            }
        }

        if let Ok(port) = std::env::var("PORT") {
            match port.parse::<u16>() {
                Ok(parsed) => config.port = parsed,
                Err(_) => tracing::warn!(value = %port, "Invalid PORT, using default"),
            }
        }

        if let Ok(val) = std::env::var("ROOM_CAPACITY") {
            match parse_capacity(&val) {
                Some(capacity) => config.room_capacity = capacity,
                None => tracing::warn!(value = %val, "Invalid ROOM_CAPACITY, using default"),
            }
        }

        config
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

/// A positive integer, clamped to the mesh limit.
fn parse_capacity(val: &str) -> Option<usize> {
    match val.trim().parse::<usize>() {
        Ok(0) | Err(_) => None,
        Ok(n) => Some(n.min(ROOM_CAPACITY)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.addr(), ([0, 0, 0, 0], 8000).into());
        assert_eq!(config.room_capacity, 5);
    }

    #[test]
    fn test_capacity_is_clamped() {
        assert_eq!(parse_capacity("3"), Some(3));
        assert_eq!(parse_capacity("12"), Some(5));
        assert_eq!(parse_capacity("0"), None);
        assert_eq!(parse_capacity("many"), None);
    }
}
