//! # quintet-server
//!
//! Directory relay for quintet rooms. Participants connect over a
//! WebSocket, join a room of at most five, and use the relay to exchange
//! the signals that set up their direct channels. Chat content never
//! passes through here.

pub mod api;
pub mod config;
pub mod directory;
pub mod error;
pub mod relay;

pub use api::{build_router, serve, AppState};
pub use config::ServerConfig;
pub use directory::{Directory, DirectoryStats, JoinOutcome};
