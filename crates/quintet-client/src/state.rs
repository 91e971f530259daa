//! The local peer roster shared between the session manager, the peer
//! actors and the front end.
//!
//! Readers take a cheap snapshot (`Arc` clone) and never observe a
//! half-applied update. Writers replace the whole map under one lock.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use quintet_shared::types::PeerId;

use crate::session::PeerSession;

pub type RosterSnapshot = Arc<HashMap<PeerId, PeerSession>>;

#[derive(Debug, Clone, Default)]
pub struct Roster {
    inner: Arc<RwLock<RosterSnapshot>>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> RosterSnapshot {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Read-modify-write of the whole roster in one critical section.
    pub fn update<R>(&self, f: impl FnOnce(&mut HashMap<PeerId, PeerSession>) -> R) -> R {
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut next = (**guard).clone();
        let out = f(&mut next);
        *guard = Arc::new(next);
        out
    }

    /// Insert a new session. Returns `false` if the peer is already listed.
    pub fn insert(&self, session: PeerSession) -> bool {
        self.update(|map| {
            if map.contains_key(&session.peer) {
                return false;
            }
            map.insert(session.peer.clone(), session);
            true
        })
    }

    /// Overwrite an existing entry. Sessions removed in the meantime stay
    /// removed.
    pub fn replace(&self, session: &PeerSession) -> bool {
        self.update(|map| match map.get_mut(&session.peer) {
            Some(slot) => {
                *slot = session.clone();
                true
            }
            None => false,
        })
    }

    pub fn remove(&self, peer: &PeerId) -> Option<PeerSession> {
        self.update(|map| map.remove(peer))
    }

    pub fn clear(&self) {
        self.update(|map| map.clear());
    }

    pub fn connected(&self) -> Vec<PeerId> {
        self.snapshot()
            .values()
            .filter(|s| s.is_connected())
            .map(|s| s.peer.clone())
            .collect()
    }
}
