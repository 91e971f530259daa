use std::time::Duration;

use quintet_shared::protocol::ChatMessage;
use quintet_shared::types::{Activity, PeerId, Role, RoomId};

use crate::session::ConnectionState;

/// Notifications from the session layer to the front end.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The relay assigned our identifier for this connection
    Welcome { local_id: PeerId },
    /// Join accepted; `peers` were already present
    RoomJoined { room: RoomId, peers: usize },
    /// Join refused because the room is at capacity
    RoomFull { room: RoomId },
    PeerJoined { peer: PeerId, role: Role },
    PeerLeft { peer: PeerId },
    StateChanged { peer: PeerId, state: ConnectionState },
    ReconnectScheduled { peer: PeerId, attempt: u32, delay: Duration },
    Identified { peer: PeerId, name: String },
    MessageReceived { peer: PeerId, message: ChatMessage },
    Typing { peer: PeerId, typing: bool },
    StatusChanged { peer: PeerId, activity: Activity },
    Latency { peer: PeerId, millis: i64, slow: bool },
    /// The relay connection is gone; established links keep working
    RelayLost,
}
