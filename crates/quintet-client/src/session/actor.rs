//! One task per remote participant.
//!
//! The actor owns the peer's session record, its current link and its
//! chunk reassembly buffers. Everything that touches them arrives through
//! the actor's mailbox or the link's event stream, so no per-peer state is
//! shared across tasks. The roster only ever receives copies.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use quintet_net::{Connector, Link, LinkEvent};
use quintet_shared::codec;
use quintet_shared::protocol::{ClientEvent, Envelope};
use quintet_shared::types::{PeerId, Role, RoomId};
use quintet_shared::ChunkAssembler;

use crate::events::SessionEvent;
use crate::outbox::Outbox;
use crate::presence::{measure_latency, sleep_until_opt};
use crate::session::peer::{ConnectionState, PeerSession, ReconnectPolicy};
use crate::state::Roster;

#[derive(Debug, Clone)]
pub(crate) enum PeerCommand {
    /// Initiator signal relayed from the peer
    Offer(Value),
    /// Responder signal relayed back from the peer
    Answer(Value),
    /// Pre-encoded frames, dropped unless the channel is open
    Transmit(Arc<[String]>),
    /// Best-effort envelope; failures are not retried
    Envelope(Envelope),
    Shutdown,
}

/// What every actor of one room shares.
pub(crate) struct ActorContext {
    pub local_id: PeerId,
    pub local_name: String,
    pub room: RoomId,
    pub connector: Arc<dyn Connector>,
    pub relay_tx: mpsc::Sender<ClientEvent>,
    pub roster: Roster,
    pub outbox: Outbox,
    pub events: mpsc::UnboundedSender<SessionEvent>,
    pub policy: ReconnectPolicy,
}

pub(crate) struct PeerActor {
    ctx: Arc<ActorContext>,
    session: PeerSession,
    link: Option<Box<dyn Link>>,
    link_role: Role,
    link_rx: mpsc::UnboundedReceiver<LinkEvent>,
    open: bool,
    assembler: ChunkAssembler,
    reconnect_at: Option<Instant>,
    attempt_deadline: Option<Instant>,
    mailbox: mpsc::UnboundedReceiver<PeerCommand>,
}

impl PeerActor {
    pub(crate) fn spawn(
        ctx: Arc<ActorContext>,
        session: PeerSession,
    ) -> (mpsc::UnboundedSender<PeerCommand>, JoinHandle<()>) {
        let (mailbox_tx, mailbox) = mpsc::unbounded_channel();
        let (_, link_rx) = mpsc::unbounded_channel();
        let actor = PeerActor {
            ctx,
            link_role: session.role,
            session,
            link: None,
            link_rx,
            open: false,
            assembler: ChunkAssembler::new(),
            reconnect_at: None,
            attempt_deadline: None,
            mailbox,
        };
        (mailbox_tx, tokio::spawn(actor.run()))
    }

    async fn run(mut self) {
        if self.session.role == Role::Initiator {
            self.open_link(Role::Initiator);
        }

        loop {
            tokio::select! {
                cmd = self.mailbox.recv() => match cmd {
                    Some(PeerCommand::Shutdown) | None => break,
                    Some(cmd) => self.on_command(cmd).await,
                },
                Some(event) = self.link_rx.recv() => self.on_link_event(event).await,
                _ = sleep_until_opt(self.reconnect_at) => {
                    self.reconnect_at = None;
                    debug!(peer = %self.session.peer, attempt = self.session.attempts, "Reconnecting");
                    self.open_link(Role::Initiator);
                }
                _ = sleep_until_opt(self.attempt_deadline) => {
                    self.attempt_deadline = None;
                    self.on_link_failed(Some("connect timeout".to_string())).await;
                }
            }
        }

        self.close_link();
        debug!(peer = %self.session.peer, "Peer session ended");
    }

    fn open_link(&mut self, role: Role) {
        self.close_link();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.link_rx = events_rx;
        self.link = Some(self.ctx.connector.open(role, events_tx));
        self.link_role = role;
        self.assembler = ChunkAssembler::new();
        self.attempt_deadline = Some(Instant::now() + self.ctx.policy.connect_timeout);
    }

    fn close_link(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.close();
        }
        self.open = false;
    }

    async fn on_command(&mut self, cmd: PeerCommand) {
        match cmd {
            PeerCommand::Offer(signal) => self.on_offer(signal),
            PeerCommand::Answer(signal) => match (&mut self.link, self.link_role) {
                (Some(link), Role::Initiator) => link.signal(signal),
                _ => debug!(peer = %self.session.peer, "Dropping answer with no pending offer"),
            },
            PeerCommand::Transmit(frames) => {
                if !self.send_frames(&frames) {
                    debug!(peer = %self.session.peer, "Channel not open, message not sent");
                }
            }
            PeerCommand::Envelope(envelope) => {
                if !self.send_envelope(&envelope) {
                    debug!(peer = %self.session.peer, kind = envelope.kind(), "Envelope not sent");
                }
            }
            PeerCommand::Shutdown => {}
        }
    }

    fn on_offer(&mut self, signal: Value) {
        // Both sides reconnect as initiator; the lower identifier keeps
        // that role and the other side answers.
        if self.link.is_some()
            && self.link_role == Role::Initiator
            && self.ctx.local_id < self.session.peer
        {
            debug!(peer = %self.session.peer, "Ignoring competing offer, keeping initiator role");
            return;
        }

        match self.session.state {
            ConnectionState::Connecting => {}
            ConnectionState::Abandoned => {
                info!(peer = %self.session.peer, "Incoming offer revives abandoned session");
                self.set_state(ConnectionState::Reconnecting);
            }
            _ => self.set_state(ConnectionState::Reconnecting),
        }

        self.reconnect_at = None;
        self.open_link(Role::Responder);
        if let Some(link) = self.link.as_mut() {
            link.signal(signal);
        }
    }

    async fn on_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Signal(signal) => self.forward_signal(signal).await,
            LinkEvent::Open => self.on_open(),
            LinkEvent::Data(frame) => self.on_frame(&frame),
            LinkEvent::Closed(reason) => self.on_link_failed(reason).await,
        }
    }

    // `&mut self`: the link is not `Sync`, so a shared borrow held across
    // the await would make the actor future `!Send`.
    async fn forward_signal(&mut self, signal: Value) {
        let peer = self.session.peer.clone();
        let event = match self.link_role {
            Role::Initiator => ClientEvent::ForwardSignal {
                target_id: peer,
                caller_id: self.ctx.local_id.clone(),
                signal,
            },
            Role::Responder => ClientEvent::ForwardReturnSignal {
                signal,
                caller_id: peer,
            },
        };
        if self.ctx.relay_tx.send(event).await.is_err() {
            warn!(peer = %self.session.peer, "Relay unavailable, signal dropped");
        }
    }

    fn on_open(&mut self) {
        self.open = true;
        self.attempt_deadline = None;
        self.reconnect_at = None;
        self.session.mark_connected();
        self.publish();
        info!(peer = %self.session.peer, role = ?self.link_role, "Channel established");
        self.emit(SessionEvent::StateChanged {
            peer: self.session.peer.clone(),
            state: ConnectionState::Connected,
        });

        let identity = Envelope::Identity {
            value: self.ctx.local_name.clone(),
        };
        if !self.send_envelope(&identity) {
            warn!(peer = %self.session.peer, "Failed to send identity");
        }

        let Some(link) = self.link.as_deref() else {
            return;
        };
        if let Err(e) = self
            .ctx
            .outbox
            .flush_pending(&self.ctx.room, |frames| send_frames(link, frames))
        {
            warn!(peer = %self.session.peer, error = %e, "Failed to flush pending messages");
        }
    }

    fn on_frame(&mut self, frame: &str) {
        match self.assembler.decode(frame) {
            Ok(Some(envelope)) => self.on_envelope(envelope),
            Ok(None) => {}
            Err(e) => warn!(peer = %self.session.peer, error = %e, "Dropping malformed frame"),
        }
    }

    fn on_envelope(&mut self, envelope: Envelope) {
        let peer = self.session.peer.clone();
        match envelope {
            Envelope::Identity { value } => {
                info!(peer = %peer, name = %value, "Peer identified");
                self.session.display_name = Some(value.clone());
                self.publish();
                self.emit(SessionEvent::Identified { peer, name: value });
            }
            Envelope::Status { value } => {
                self.session.activity = value;
                self.publish();
                self.emit(SessionEvent::StatusChanged {
                    peer,
                    activity: value,
                });
            }
            Envelope::Typing { value } => {
                self.session.typing = value;
                self.publish();
                self.emit(SessionEvent::Typing {
                    peer,
                    typing: value,
                });
            }
            Envelope::Ping { timestamp } => {
                self.send_envelope(&Envelope::Pong { timestamp });
            }
            Envelope::Pong { timestamp } => {
                let latency = measure_latency(timestamp, chrono::Utc::now().timestamp_millis());
                if latency.slow {
                    warn!(peer = %peer, millis = latency.millis, "Slow round trip");
                } else {
                    debug!(peer = %peer, millis = latency.millis, "Round trip");
                }
                self.emit(SessionEvent::Latency {
                    peer,
                    millis: latency.millis,
                    slow: latency.slow,
                });
            }
            Envelope::Message { value } => {
                match self.ctx.outbox.record_incoming(&self.ctx.room, &value) {
                    Ok(false) => return,
                    Ok(true) => {}
                    Err(e) => warn!(peer = %peer, error = %e, "Failed to store incoming message"),
                }
                self.emit(SessionEvent::MessageReceived {
                    peer,
                    message: value,
                });
            }
            Envelope::Chunk { .. } => {
                debug!(peer = %peer, "Unexpected chunk after reassembly");
            }
        }
    }

    async fn on_link_failed(&mut self, reason: Option<String>) {
        let was_open = self.open;
        self.close_link();
        self.attempt_deadline = None;

        let peer = self.session.peer.clone();
        if was_open {
            info!(peer = %peer, reason = ?reason, "Channel lost");
            self.emit(SessionEvent::StateChanged {
                peer: peer.clone(),
                state: ConnectionState::Disconnected,
            });
        } else {
            debug!(peer = %peer, reason = ?reason, "Connection attempt failed");
        }

        match self.session.mark_link_lost(&self.ctx.policy) {
            Some(delay) => {
                self.reconnect_at = Some(Instant::now() + delay);
                self.publish();
                debug!(
                    peer = %peer,
                    attempt = self.session.attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Reconnection scheduled"
                );
                self.emit(SessionEvent::StateChanged {
                    peer: peer.clone(),
                    state: ConnectionState::Reconnecting,
                });
                self.emit(SessionEvent::ReconnectScheduled {
                    peer,
                    attempt: self.session.attempts,
                    delay,
                });
            }
            None => {
                warn!(peer = %peer, attempts = self.session.attempts, "Peer unreachable, giving up");
                self.publish();
                self.emit(SessionEvent::StateChanged {
                    peer,
                    state: ConnectionState::Abandoned,
                });
            }
        }
    }

    fn send_envelope(&self, envelope: &Envelope) -> bool {
        match codec::encode(envelope) {
            Ok(frames) => self.send_frames(&frames),
            Err(e) => {
                warn!(peer = %self.session.peer, error = %e, "Failed to encode envelope");
                false
            }
        }
    }

    fn send_frames(&self, frames: &[String]) -> bool {
        match self.link.as_deref() {
            Some(link) if self.open => send_frames(link, frames),
            _ => false,
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.session.state = state;
        self.publish();
        self.emit(SessionEvent::StateChanged {
            peer: self.session.peer.clone(),
            state,
        });
    }

    fn publish(&self) {
        self.ctx.roster.replace(&self.session);
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.ctx.events.send(event);
    }
}

fn send_frames(link: &dyn Link, frames: &[String]) -> bool {
    for frame in frames {
        if let Err(e) = link.send(frame) {
            debug!(error = %e, "Channel send failed");
            return false;
        }
    }
    true
}
