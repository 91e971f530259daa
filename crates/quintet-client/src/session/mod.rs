//! Peer Session Manager.
//!
//! Turns relay events into one [`actor`] per remote participant, fans
//! outgoing envelopes out to those actors, and keeps the shared roster.
//! Each actor runs its own reconnection state machine; nothing here waits
//! on another peer's timers.

mod actor;
mod peer;

pub use peer::{ConnectionState, PeerSession, ReconnectPolicy};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use quintet_net::Connector;
use quintet_shared::codec;
use quintet_shared::constants::{HEARTBEAT_INTERVAL_SECS, TYPING_IDLE_MS};
use quintet_shared::protocol::{ChatMessage, ClientEvent, Envelope, RelayEvent};
use quintet_shared::types::{Activity, ContentKind, PeerId, Role, RoomId};
use quintet_store::Message;

use crate::config::ClientConfig;
use crate::error::{Result, SessionError};
use crate::events::SessionEvent;
use crate::outbox::Outbox;
use crate::presence::{run_heartbeat, run_typing, TypingIndicator, TypingInput};
use crate::state::{Roster, RosterSnapshot};

use self::actor::{ActorContext, PeerActor, PeerCommand};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Display name sent to peers in the `identity` envelope
    pub name: String,
    pub room: RoomId,
    pub reconnect: ReconnectPolicy,
    pub heartbeat_interval: Duration,
    pub typing_idle: Duration,
}

impl SessionConfig {
    pub fn new(name: impl Into<String>, room: RoomId) -> Self {
        Self {
            name: name.into(),
            room,
            reconnect: ReconnectPolicy::default(),
            heartbeat_interval: Duration::from_secs(HEARTBEAT_INTERVAL_SECS),
            typing_idle: Duration::from_millis(TYPING_IDLE_MS),
        }
    }

    pub fn from_client_config(config: &ClientConfig, name: impl Into<String>, room: RoomId) -> Self {
        Self {
            name: name.into(),
            room,
            reconnect: config.reconnect,
            heartbeat_interval: config.heartbeat_interval,
            typing_idle: config.typing_idle,
        }
    }
}

struct PeerHandle {
    mailbox: mpsc::UnboundedSender<PeerCommand>,
    task: JoinHandle<()>,
}

struct Inner {
    name: String,
    room: RwLock<RoomId>,
    local_id: RwLock<Option<PeerId>>,
    connector: Arc<dyn Connector>,
    relay_tx: mpsc::Sender<ClientEvent>,
    roster: Roster,
    outbox: Outbox,
    events: mpsc::UnboundedSender<SessionEvent>,
    policy: ReconnectPolicy,
    peers: Mutex<HashMap<PeerId, PeerHandle>>,
    activity: Mutex<Activity>,
    typing_tx: mpsc::UnboundedSender<TypingInput>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

/// Handle to the local participant's sessions. Cheap to clone.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SessionManager {
    /// Create the manager and spawn its heartbeat and typing tasks.
    ///
    /// `relay_tx` carries events to the relay; relay events come back
    /// through [`SessionManager::handle_relay_event`].
    pub fn start(
        config: SessionConfig,
        connector: Arc<dyn Connector>,
        outbox: Outbox,
        relay_tx: mpsc::Sender<ClientEvent>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (typing_tx, typing_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(Inner {
            name: config.name,
            room: RwLock::new(config.room),
            local_id: RwLock::new(None),
            connector,
            relay_tx,
            roster: Roster::new(),
            outbox,
            events: events_tx,
            policy: config.reconnect,
            peers: Mutex::new(HashMap::new()),
            activity: Mutex::new(Activity::Active),
            typing_tx,
            background: Mutex::new(Vec::new()),
        });

        let weak = Arc::downgrade(&inner);
        let heartbeat = tokio::spawn(run_heartbeat(config.heartbeat_interval, move || {
            match weak.upgrade() {
                Some(inner) => {
                    SessionManager { inner }.ping_connected();
                    true
                }
                None => false,
            }
        }));

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        let typing = tokio::spawn(run_typing(
            TypingIndicator::new(config.typing_idle),
            typing_rx,
            move |value| {
                if let Some(inner) = weak.upgrade() {
                    SessionManager { inner }.broadcast(Envelope::Typing { value });
                }
            },
        ));

        lock(&inner.background).extend([heartbeat, typing]);
        (SessionManager { inner }, events_rx)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn room(&self) -> RoomId {
        match self.inner.room.read() {
            Ok(room) => room.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Identifier assigned by the relay, once welcomed.
    pub fn local_id(&self) -> Option<PeerId> {
        match self.inner.local_id.read() {
            Ok(id) => id.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn roster(&self) -> RosterSnapshot {
        self.inner.roster.snapshot()
    }

    pub fn history(&self) -> Result<Vec<Message>> {
        self.inner.outbox.history(&self.room())
    }

    /// Ask the relay to add us to the configured room.
    pub async fn join(&self) -> Result<()> {
        let room = self.room();
        info!(room = %room, "Joining room");
        self.inner
            .relay_tx
            .send(ClientEvent::JoinRoom(room))
            .await
            .map_err(|_| SessionError::RelayUnavailable)
    }

    /// Drop every session of the current room and join `room` instead.
    pub async fn switch_room(&self, room: RoomId) -> Result<()> {
        self.shutdown_peers().await;
        match self.inner.room.write() {
            Ok(mut current) => *current = room,
            Err(poisoned) => *poisoned.into_inner() = room,
        }
        self.join().await
    }

    pub async fn handle_relay_event(&self, event: RelayEvent) {
        match event {
            RelayEvent::Welcome(id) => {
                info!(local_id = %id, "Relay assigned identifier");
                match self.inner.local_id.write() {
                    Ok(mut slot) => *slot = Some(id.clone()),
                    Err(poisoned) => *poisoned.into_inner() = Some(id.clone()),
                }
                self.emit(SessionEvent::Welcome { local_id: id });
            }
            RelayEvent::Roster(peers) => {
                let room = self.room();
                info!(room = %room, peers = peers.len(), "Joined room");
                self.emit(SessionEvent::RoomJoined {
                    room,
                    peers: peers.len(),
                });
                for peer in peers {
                    self.ensure_peer(peer, Role::Initiator);
                }
            }
            RelayEvent::CapacityRejected => {
                let room = self.room();
                warn!(room = %room, "Room is full");
                self.emit(SessionEvent::RoomFull { room });
            }
            RelayEvent::IncomingSignal { signal, caller_id } => {
                if let Some(mailbox) = self.ensure_peer(caller_id, Role::Responder) {
                    let _ = mailbox.send(PeerCommand::Offer(signal));
                }
            }
            RelayEvent::IncomingReturnSignal { signal, source_id } => {
                match lock(&self.inner.peers).get(&source_id) {
                    Some(handle) => {
                        let _ = handle.mailbox.send(PeerCommand::Answer(signal));
                    }
                    None => debug!(peer = %source_id, "Answer from unknown peer"),
                }
            }
            RelayEvent::PeerLeft(peer) => self.remove_peer(&peer).await,
        }
    }

    /// The relay connection ended. Existing links stay up; no new peers
    /// can be reached until the client reconnects to the relay.
    pub fn relay_lost(&self) {
        warn!("Relay connection lost");
        self.emit(SessionEvent::RelayLost);
    }

    /// Send a message to every connected peer, or queue it when nobody is
    /// connected. `reply_to` names a stored message to quote.
    pub fn send_message(
        &self,
        content: impl Into<String>,
        kind: ContentKind,
        reply_to: Option<&str>,
    ) -> Result<ChatMessage> {
        let quote = reply_to
            .map(|id| self.inner.outbox.find(id).map(|m| m.to_chat().quote()))
            .transpose()?;
        let message = ChatMessage::new(self.inner.name.clone(), content, kind, quote);
        let frames: Arc<[String]> = codec::encode(&Envelope::Message {
            value: message.clone(),
        })?
        .into();

        let room = self.room();
        let connected = self
            .inner
            .outbox
            .record_outgoing_with(&room, &message, || self.inner.roster.connected())?;

        {
            let peers = lock(&self.inner.peers);
            for peer in &connected {
                if let Some(handle) = peers.get(peer) {
                    let _ = handle.mailbox.send(PeerCommand::Transmit(frames.clone()));
                }
            }
        }

        debug!(
            id = %message.id,
            kind = kind.as_str(),
            frames = frames.len(),
            peers = connected.len(),
            "Message sent"
        );
        let _ = self.inner.typing_tx.send(TypingInput::Sent);
        Ok(message)
    }

    /// Local input changed (a keystroke in the compose box).
    pub fn notify_input(&self) {
        let _ = self.inner.typing_tx.send(TypingInput::Input);
    }

    /// Local window focus changed.
    pub fn set_focus(&self, focused: bool) {
        let activity = if focused {
            Activity::Active
        } else {
            Activity::Away
        };
        {
            let mut current = lock(&self.inner.activity);
            if *current == activity {
                return;
            }
            *current = activity;
        }
        info!(status = activity.as_str(), "Status changed");
        self.broadcast(Envelope::Status { value: activity });
    }

    pub fn activity(&self) -> Activity {
        *lock(&self.inner.activity)
    }

    /// Leave the room: end every session and stop background tasks.
    pub async fn leave(&self) {
        self.shutdown_peers().await;
        for task in lock(&self.inner.background).drain(..) {
            task.abort();
        }
        info!("Left room");
    }

    /// Deliver an envelope to every known peer, connected or not. Peers
    /// whose channel is not open drop it.
    fn broadcast(&self, envelope: Envelope) {
        for handle in lock(&self.inner.peers).values() {
            let _ = handle.mailbox.send(PeerCommand::Envelope(envelope.clone()));
        }
    }

    fn ping_connected(&self) {
        let connected = self.inner.roster.connected();
        if connected.is_empty() {
            return;
        }
        let ping = Envelope::Ping {
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        let peers = lock(&self.inner.peers);
        for peer in &connected {
            if let Some(handle) = peers.get(peer) {
                let _ = handle.mailbox.send(PeerCommand::Envelope(ping.clone()));
            }
        }
    }

    /// The mailbox of the actor for `peer`, spawning one if needed.
    fn ensure_peer(&self, peer: PeerId, role: Role) -> Option<mpsc::UnboundedSender<PeerCommand>> {
        let Some(local_id) = self.local_id() else {
            warn!(peer = %peer, "No identifier assigned yet, ignoring peer");
            return None;
        };
        if peer == local_id {
            return None;
        }

        let mut peers = lock(&self.inner.peers);
        if let Some(handle) = peers.get(&peer) {
            return Some(handle.mailbox.clone());
        }

        let session = PeerSession::new(peer.clone(), role);
        self.inner.roster.insert(session.clone());

        let ctx = Arc::new(ActorContext {
            local_id,
            local_name: self.inner.name.clone(),
            room: self.room(),
            connector: self.inner.connector.clone(),
            relay_tx: self.inner.relay_tx.clone(),
            roster: self.inner.roster.clone(),
            outbox: self.inner.outbox.clone(),
            events: self.inner.events.clone(),
            policy: self.inner.policy,
        });
        let (mailbox, task) = PeerActor::spawn(ctx, session);
        peers.insert(
            peer.clone(),
            PeerHandle {
                mailbox: mailbox.clone(),
                task,
            },
        );
        drop(peers);

        info!(peer = %peer, role = ?role, "New peer session");
        self.emit(SessionEvent::PeerJoined { peer, role });
        Some(mailbox)
    }

    async fn remove_peer(&self, peer: &PeerId) {
        let handle = lock(&self.inner.peers).remove(peer);
        if let Some(handle) = handle {
            stop_actor(peer, handle).await;
        }
        if self.inner.roster.remove(peer).is_some() {
            info!(peer = %peer, "Peer left");
            self.emit(SessionEvent::PeerLeft { peer: peer.clone() });
        }
    }

    async fn shutdown_peers(&self) {
        let handles: Vec<(PeerId, PeerHandle)> = lock(&self.inner.peers).drain().collect();
        for (peer, handle) in handles {
            stop_actor(&peer, handle).await;
        }
        self.inner.roster.clear();
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.inner.events.send(event);
    }
}

async fn stop_actor(peer: &PeerId, handle: PeerHandle) {
    let _ = handle.mailbox.send(PeerCommand::Shutdown);
    if let Err(e) = handle.task.await {
        warn!(peer = %peer, error = %e, "Peer task ended abnormally");
    }
}
