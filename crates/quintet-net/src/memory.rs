//! In-process links for tests and local demos.
//!
//! Every [`MemoryNetwork`] clone shares one switchboard. An initiator
//! registers an offer token; the responder that receives the token through
//! the relay claims it and the two endpoints are wired together. The
//! network can also sever every established link or refuse new ones, which
//! is how reconnection paths are exercised without real sockets.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use quintet_shared::types::Role;

use crate::transport::{Connector, DirectSignal, Link, LinkError, LinkEvent};

#[derive(Debug)]
struct Endpoint {
    events: mpsc::UnboundedSender<LinkEvent>,
    remote: Option<u64>,
}

#[derive(Debug, Default)]
struct Switchboard {
    next_id: u64,
    endpoints: HashMap<u64, Endpoint>,
    /// Offer token -> initiator endpoint id
    offers: HashMap<String, u64>,
    refuse: bool,
}

impl Switchboard {
    fn allocate(&mut self, events: mpsc::UnboundedSender<LinkEvent>) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.endpoints.insert(id, Endpoint { events, remote: None });
        id
    }

    /// Remove an endpoint and tell its remote side, if any.
    fn detach(&mut self, id: u64, reason: &str) {
        self.offers.retain(|_, owner| *owner != id);
        let Some(endpoint) = self.endpoints.remove(&id) else {
            return;
        };
        if let Some(remote_id) = endpoint.remote {
            if let Some(remote) = self.endpoints.remove(&remote_id) {
                let _ = remote.events.send(LinkEvent::Closed(Some(reason.to_string())));
            }
        }
    }
}

/// Shared in-memory network. Cloning yields a handle to the same network.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<Mutex<Switchboard>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn board(&self) -> MutexGuard<'_, Switchboard> {
        // A panic while holding the lock leaves the map consistent.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Drop every established link, reporting `Closed` on both ends.
    pub fn sever_all(&self) -> usize {
        let mut board = self.board();
        let connected: Vec<u64> = board
            .endpoints
            .iter()
            .filter(|(_, e)| e.remote.is_some())
            .map(|(id, _)| *id)
            .collect();
        for id in &connected {
            if let Some(endpoint) = board.endpoints.remove(id) {
                let _ = endpoint
                    .events
                    .send(LinkEvent::Closed(Some("severed".to_string())));
            }
        }
        debug!(endpoints = connected.len(), "Severed memory links");
        connected.len() / 2
    }

    /// While set, new links fail immediately as unreachable.
    pub fn set_refuse(&self, refuse: bool) {
        self.board().refuse = refuse;
    }

    /// Number of established links.
    pub fn live_links(&self) -> usize {
        self.board()
            .endpoints
            .values()
            .filter(|e| e.remote.is_some())
            .count()
            / 2
    }
}

impl Connector for MemoryNetwork {
    fn open(&self, role: Role, events: mpsc::UnboundedSender<LinkEvent>) -> Box<dyn Link> {
        let mut board = self.board();
        let id = board.allocate(events.clone());

        if role == Role::Initiator {
            if board.refuse {
                board.endpoints.remove(&id);
                let _ = events.send(LinkEvent::Closed(Some("unreachable".to_string())));
            } else {
                let token = format!("mem:{id}");
                board.offers.insert(token.clone(), id);
                let _ = events.send(LinkEvent::Signal(
                    DirectSignal::Offer { addr: token }.to_value(),
                ));
            }
        }
        drop(board);

        Box::new(MemoryLink {
            id,
            role,
            network: self.clone(),
        })
    }
}

struct MemoryLink {
    id: u64,
    role: Role,
    network: MemoryNetwork,
}

impl MemoryLink {
    fn accept_offer(&self, token: &str) {
        let mut board = self.network.board();
        let Some(own_events) = board.endpoints.get(&self.id).map(|e| e.events.clone()) else {
            return;
        };

        if board.refuse {
            board.endpoints.remove(&self.id);
            let _ = own_events.send(LinkEvent::Closed(Some("unreachable".to_string())));
            return;
        }

        let initiator = board
            .offers
            .remove(token)
            .and_then(|id| board.endpoints.get(&id).map(|e| (id, e.events.clone())));
        let Some((initiator_id, initiator_events)) = initiator else {
            board.endpoints.remove(&self.id);
            let _ = own_events.send(LinkEvent::Closed(Some(format!("offer {token} expired"))));
            return;
        };

        if let Some(e) = board.endpoints.get_mut(&initiator_id) {
            e.remote = Some(self.id);
        }
        if let Some(e) = board.endpoints.get_mut(&self.id) {
            e.remote = Some(initiator_id);
        }

        let _ = initiator_events.send(LinkEvent::Open);
        let _ = own_events.send(LinkEvent::Signal(DirectSignal::Answer.to_value()));
        let _ = own_events.send(LinkEvent::Open);
    }
}

impl Link for MemoryLink {
    fn signal(&mut self, signal: Value) {
        match (self.role, DirectSignal::from_value(&signal)) {
            (Role::Responder, Some(DirectSignal::Offer { addr })) => self.accept_offer(&addr),
            (Role::Initiator, Some(DirectSignal::Answer)) => {
                debug!(link = self.id, "Responder acknowledged offer");
            }
            (role, _) => warn!(?role, signal = %signal, "Unexpected signal for memory link"),
        }
    }

    fn send(&self, frame: &str) -> Result<(), LinkError> {
        let board = self.network.board();
        let endpoint = board.endpoints.get(&self.id).ok_or(LinkError::Closed)?;
        let remote_id = endpoint.remote.ok_or(LinkError::NotReady)?;
        let remote = board.endpoints.get(&remote_id).ok_or(LinkError::Closed)?;
        remote
            .events
            .send(LinkEvent::Data(frame.to_string()))
            .map_err(|_| LinkError::Closed)
    }

    fn close(&mut self) {
        self.network.board().detach(self.id, "remote closed");
    }
}

impl Drop for MemoryLink {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::UnboundedReceiver<LinkEvent>) -> Vec<LinkEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    fn connect_pair(
        net: &MemoryNetwork,
    ) -> (
        Box<dyn Link>,
        mpsc::UnboundedReceiver<LinkEvent>,
        Box<dyn Link>,
        mpsc::UnboundedReceiver<LinkEvent>,
    ) {
        let (a_tx, mut a_rx) = mpsc::unbounded_channel();
        let (b_tx, mut b_rx) = mpsc::unbounded_channel();
        let mut a = net.open(Role::Initiator, a_tx);
        let mut b = net.open(Role::Responder, b_tx);

        let offer = match drain(&mut a_rx).pop() {
            Some(LinkEvent::Signal(s)) => s,
            other => panic!("expected offer, got {other:?}"),
        };
        b.signal(offer);
        let b_events = drain(&mut b_rx);
        assert!(matches!(b_events[0], LinkEvent::Signal(_)));
        assert_eq!(b_events[1], LinkEvent::Open);
        if let LinkEvent::Signal(answer) = &b_events[0] {
            a.signal(answer.clone());
        }
        assert_eq!(drain(&mut a_rx), vec![LinkEvent::Open]);
        (a, a_rx, b, b_rx)
    }

    #[test]
    fn test_pair_exchanges_frames() {
        let net = MemoryNetwork::new();
        let (a, mut a_rx, b, mut b_rx) = connect_pair(&net);
        assert_eq!(net.live_links(), 1);

        a.send("hello").unwrap();
        b.send("hi").unwrap();
        assert_eq!(drain(&mut b_rx), vec![LinkEvent::Data("hello".into())]);
        assert_eq!(drain(&mut a_rx), vec![LinkEvent::Data("hi".into())]);
    }

    #[test]
    fn test_send_before_answer_is_not_ready() {
        let net = MemoryNetwork::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let link = net.open(Role::Initiator, tx);
        assert_eq!(link.send("x"), Err(LinkError::NotReady));
    }

    #[test]
    fn test_close_notifies_remote() {
        let net = MemoryNetwork::new();
        let (mut a, _a_rx, b, mut b_rx) = connect_pair(&net);
        a.close();
        a.close();
        assert_eq!(
            drain(&mut b_rx),
            vec![LinkEvent::Closed(Some("remote closed".into()))]
        );
        assert_eq!(b.send("late"), Err(LinkError::Closed));
        assert_eq!(net.live_links(), 0);
    }

    #[test]
    fn test_sever_and_refuse() {
        let net = MemoryNetwork::new();
        let (_a, mut a_rx, _b, mut b_rx) = connect_pair(&net);
        assert_eq!(net.sever_all(), 1);
        assert!(matches!(drain(&mut a_rx)[..], [LinkEvent::Closed(_)]));
        assert!(matches!(drain(&mut b_rx)[..], [LinkEvent::Closed(_)]));

        net.set_refuse(true);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _link = net.open(Role::Initiator, tx);
        assert_eq!(
            drain(&mut rx),
            vec![LinkEvent::Closed(Some("unreachable".into()))]
        );
    }
}
