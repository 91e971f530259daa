//! # quintet-client
//!
//! Participant side of a quintet room: one direct channel per remote
//! participant, negotiated through the directory relay, with presence,
//! heartbeat and a durable offline queue for messages sent while alone.

pub mod bridge;
pub mod config;
pub mod error;
pub mod events;
pub mod outbox;
pub mod presence;
pub mod session;
pub mod state;

pub use bridge::{spawn_relay_bridge, start_session};
pub use config::ClientConfig;
pub use error::SessionError;
pub use events::SessionEvent;
pub use outbox::Outbox;
pub use session::{ConnectionState, PeerSession, ReconnectPolicy, SessionConfig, SessionManager};
pub use state::{Roster, RosterSnapshot};
