//! Room registry of the directory relay.
//!
//! Knows which participant is connected and which room each one is in,
//! and nothing else. Signaling payloads pass through untouched; no message
//! content ever reaches the relay.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use quintet_shared::protocol::RelayEvent;
use quintet_shared::types::{PeerId, RoomId};

/// Outbound queue of one participant's socket.
pub type Outbound = mpsc::UnboundedSender<RelayEvent>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Added to the room; carries the members already there.
    Joined(Vec<PeerId>),
    /// The room is at capacity.
    Rejected,
    /// The participant is not registered.
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DirectoryStats {
    pub rooms: usize,
    pub participants: usize,
}

struct Participant {
    outbound: Outbound,
    room: Option<RoomId>,
}

#[derive(Default)]
struct Registry {
    participants: HashMap<PeerId, Participant>,
    /// Members in join order.
    rooms: HashMap<RoomId, Vec<PeerId>>,
}

impl Registry {
    fn deliver(&self, to: &PeerId, event: RelayEvent) -> bool {
        match self.participants.get(to) {
            Some(p) => p.outbound.send(event).is_ok(),
            None => false,
        }
    }

    /// Take `id` out of its room and tell the remaining members.
    fn leave_room(&mut self, id: &PeerId) {
        let Some(room) = self.participants.get_mut(id).and_then(|p| p.room.take()) else {
            return;
        };

        let remaining = match self.rooms.get_mut(&room) {
            Some(members) => {
                members.retain(|m| m != id);
                members.clone()
            }
            None => Vec::new(),
        };
        if remaining.is_empty() {
            self.rooms.remove(&room);
            debug!(room = %room, "Room is empty, removed");
        }

        for member in &remaining {
            self.deliver(member, RelayEvent::PeerLeft(id.clone()));
        }
        info!(peer = %id, room = %room, remaining = remaining.len(), "Participant left room");
    }
}

/// Shared room registry. All mutation happens under one lock and never
/// awaits while holding it.
pub struct Directory {
    capacity: usize,
    registry: Mutex<Registry>,
}

impl Directory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            registry: Mutex::new(Registry::default()),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Track a newly connected participant, not yet in any room.
    pub fn register(&self, id: PeerId, outbound: Outbound) {
        self.registry()
            .participants
            .insert(id.clone(), Participant { outbound, room: None });
        debug!(peer = %id, "Participant connected");
    }

    /// Put `id` in `room` and send it either the roster or a capacity
    /// rejection. A participant already in another room leaves it first,
    /// unless the new room turns out to be full.
    pub fn join_room(&self, id: &PeerId, room: RoomId) -> JoinOutcome {
        let mut registry = self.registry();
        let Some(current) = registry.participants.get(id).map(|p| p.room.clone()) else {
            warn!(peer = %id, "Join from unregistered participant");
            return JoinOutcome::Unknown;
        };

        if current.as_ref() == Some(&room) {
            let others: Vec<PeerId> = registry
                .rooms
                .get(&room)
                .map(|members| members.iter().filter(|m| *m != id).cloned().collect())
                .unwrap_or_default();
            registry.deliver(id, RelayEvent::Roster(others.clone()));
            return JoinOutcome::Joined(others);
        }

        let occupancy = registry.rooms.get(&room).map_or(0, Vec::len);
        if occupancy >= self.capacity {
            info!(peer = %id, room = %room, "Room full, join rejected");
            registry.deliver(id, RelayEvent::CapacityRejected);
            return JoinOutcome::Rejected;
        }

        registry.leave_room(id);

        let members = registry.rooms.entry(room.clone()).or_default();
        let others = members.clone();
        members.push(id.clone());
        if let Some(p) = registry.participants.get_mut(id) {
            p.room = Some(room.clone());
        }

        info!(peer = %id, room = %room, members = others.len() + 1, "Participant joined room");
        registry.deliver(id, RelayEvent::Roster(others.clone()));
        JoinOutcome::Joined(others)
    }

    /// Forward an initiator's signal to `target`, tagged with the sender.
    /// Returns whether the target was reachable.
    pub fn relay_signal(&self, from: &PeerId, target: &PeerId, signal: Value) -> bool {
        let delivered = self.registry().deliver(
            target,
            RelayEvent::IncomingSignal {
                signal,
                caller_id: from.clone(),
            },
        );
        if !delivered {
            debug!(from = %from, target = %target, "Signal target unreachable");
        }
        delivered
    }

    /// Forward a responder's answer back to the initiator `target`.
    pub fn relay_return_signal(&self, from: &PeerId, target: &PeerId, signal: Value) -> bool {
        let delivered = self.registry().deliver(
            target,
            RelayEvent::IncomingReturnSignal {
                signal,
                source_id: from.clone(),
            },
        );
        if !delivered {
            debug!(from = %from, target = %target, "Return signal target unreachable");
        }
        delivered
    }

    /// Forget `id`. Members of its room are told it left.
    pub fn disconnect(&self, id: &PeerId) {
        let mut registry = self.registry();
        registry.leave_room(id);
        if registry.participants.remove(id).is_some() {
            debug!(peer = %id, "Participant disconnected");
        }
    }

    pub fn members(&self, room: &RoomId) -> Option<Vec<PeerId>> {
        self.registry().rooms.get(room).cloned()
    }

    pub fn stats(&self) -> DirectoryStats {
        let registry = self.registry();
        DirectoryStats {
            rooms: registry.rooms.len(),
            participants: registry.participants.len(),
        }
    }
}
