/// Application name
pub const APP_NAME: &str = "Quintet";

/// Maximum number of participants in one room (full mesh)
pub const ROOM_CAPACITY: usize = 5;

/// Serialized envelopes longer than this (in bytes) are split into chunks
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Partial chunk sets older than this are dropped on the next decode
pub const CHUNK_ASSEMBLY_TTL_SECS: u64 = 30;

/// First reconnection delay in milliseconds
pub const RECONNECT_BASE_MS: u64 = 1_000;

/// Upper bound on any reconnection delay in milliseconds
pub const RECONNECT_MAX_MS: u64 = 30_000;

/// Failed reconnection attempts before a session is abandoned
pub const RECONNECT_MAX_ATTEMPTS: u32 = 5;

/// A single connection attempt that neither opens nor closes within this
/// window counts as failed
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Heartbeat ping interval in seconds
pub const HEARTBEAT_INTERVAL_SECS: u64 = 15;

/// Round trips above this are flagged as slow (milliseconds)
pub const SLOW_LATENCY_MS: i64 = 2_000;

/// Local typing indicator is cleared after this much input inactivity
pub const TYPING_IDLE_MS: u64 = 2_000;

/// Default relay listen port
pub const DEFAULT_RELAY_PORT: u16 = 8000;

/// Default relay endpoint used by clients
pub const DEFAULT_RELAY_URL: &str = "ws://127.0.0.1:8000/ws";
