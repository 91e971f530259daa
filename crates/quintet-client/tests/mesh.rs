//! Several participants wired together over the in-memory network, with a
//! small in-test relay doing what the directory relay does.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use quintet_client::{
    spawn_relay_bridge, ConnectionState, Outbox, ReconnectPolicy, SessionConfig, SessionEvent,
    SessionManager,
};
use quintet_net::{Connector, Link, LinkEvent, MemoryNetwork, RelayNotification};
use quintet_shared::protocol::{ClientEvent, Envelope, RelayEvent};
use quintet_shared::types::{Activity, ContentKind, PeerId, Role, RoomId};
use quintet_store::Database;

// ---------------------------------------------------------------------------
// In-test relay
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RelayState {
    clients: HashMap<PeerId, mpsc::Sender<RelayNotification>>,
    rooms: HashMap<RoomId, Vec<PeerId>>,
}

#[derive(Clone, Default)]
struct TestRelay {
    state: Arc<Mutex<RelayState>>,
}

impl TestRelay {
    fn register(&self, id: PeerId, tx: mpsc::Sender<RelayNotification>) {
        self.state.lock().unwrap().clients.insert(id, tx);
    }

    async fn deliver(&self, to: &PeerId, event: RelayEvent) {
        let tx = self.state.lock().unwrap().clients.get(to).cloned();
        if let Some(tx) = tx {
            let _ = tx.send(RelayNotification::Event(event)).await;
        }
    }

    async fn route(&self, from: &PeerId, event: ClientEvent) {
        match event {
            ClientEvent::JoinRoom(room) => {
                let others = {
                    let mut state = self.state.lock().unwrap();
                    let members = state.rooms.entry(room).or_default();
                    let others = members.clone();
                    members.push(from.clone());
                    others
                };
                self.deliver(from, RelayEvent::Roster(others)).await;
            }
            ClientEvent::ForwardSignal {
                target_id, signal, ..
            } => {
                self.deliver(
                    &target_id,
                    RelayEvent::IncomingSignal {
                        signal,
                        caller_id: from.clone(),
                    },
                )
                .await;
            }
            ClientEvent::ForwardReturnSignal { signal, caller_id } => {
                self.deliver(
                    &caller_id,
                    RelayEvent::IncomingReturnSignal {
                        signal,
                        source_id: from.clone(),
                    },
                )
                .await;
            }
        }
    }

    async fn disconnect(&self, id: &PeerId) {
        let remaining = {
            let mut state = self.state.lock().unwrap();
            state.clients.remove(id);
            let mut remaining = Vec::new();
            for members in state.rooms.values_mut() {
                if members.contains(id) {
                    members.retain(|m| m != id);
                    remaining.extend(members.iter().cloned());
                }
            }
            remaining
        };
        for peer in remaining {
            self.deliver(&peer, RelayEvent::PeerLeft(id.clone())).await;
        }
    }
}

/// Memory network that counts every link it is asked to open.
#[derive(Clone)]
struct CountingConnector {
    inner: MemoryNetwork,
    opens: Arc<AtomicUsize>,
}

impl Connector for CountingConnector {
    fn open(&self, role: Role, events: mpsc::UnboundedSender<LinkEvent>) -> Box<dyn Link> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.inner.open(role, events)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Participant {
    id: PeerId,
    manager: SessionManager,
    events: mpsc::UnboundedReceiver<SessionEvent>,
}

fn fast_config(name: &str) -> SessionConfig {
    let mut config = SessionConfig::new(name, RoomId::from("lobby"));
    config.reconnect = ReconnectPolicy {
        base: Duration::from_millis(20),
        max: Duration::from_millis(200),
        max_attempts: 5,
        connect_timeout: Duration::from_secs(2),
    };
    config.heartbeat_interval = Duration::from_millis(200);
    config.typing_idle = Duration::from_millis(150);
    config
}

async fn join(relay: &TestRelay, net: &MemoryNetwork, id: &str, name: &str) -> Participant {
    let id = PeerId::from(id);
    let (relay_tx, mut relay_rx) = mpsc::channel::<ClientEvent>(256);
    let (notif_tx, notif_rx) = mpsc::channel(256);

    let (manager, events) = SessionManager::start(
        fast_config(name),
        Arc::new(net.clone()),
        Outbox::new(Database::open_in_memory().unwrap()),
        relay_tx,
    );

    relay.register(id.clone(), notif_tx.clone());
    notif_tx
        .send(RelayNotification::Event(RelayEvent::Welcome(id.clone())))
        .await
        .unwrap();
    spawn_relay_bridge(manager.clone(), notif_rx);

    let router = relay.clone();
    let from = id.clone();
    tokio::spawn(async move {
        while let Some(event) = relay_rx.recv().await {
            router.route(&from, event).await;
        }
    });

    manager.join().await.unwrap();
    Participant {
        id,
        manager,
        events,
    }
}

async fn wait_for(
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
    mut pred: impl FnMut(&SessionEvent) -> bool,
) -> SessionEvent {
    timeout(Duration::from_secs(10), async {
        loop {
            let event = events.recv().await.expect("event channel open");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for session event")
}

async fn wait_identified(p: &mut Participant, count: usize) {
    for _ in 0..count {
        wait_for(&mut p.events, |e| matches!(e, SessionEvent::Identified { .. })).await;
    }
}

async fn wait_received(p: &mut Participant) -> quintet_shared::ChatMessage {
    match wait_for(&mut p.events, |e| matches!(e, SessionEvent::MessageReceived { .. })).await {
        SessionEvent::MessageReceived { message, .. } => message,
        _ => unreachable!(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_pair_connects_and_exchanges_identity() {
    let relay = TestRelay::default();
    let net = MemoryNetwork::new();
    let mut ann = join(&relay, &net, "a-ann", "ann").await;
    let mut bob = join(&relay, &net, "b-bob", "bob").await;

    let event = wait_for(&mut ann.events, |e| matches!(e, SessionEvent::Identified { .. })).await;
    assert_eq!(
        event,
        SessionEvent::Identified {
            peer: bob.id.clone(),
            name: "bob".into()
        }
    );
    wait_identified(&mut bob, 1).await;

    let ann_view = ann.manager.roster();
    let bob_session = &ann_view[&bob.id];
    assert_eq!(bob_session.role, Role::Responder);
    assert_eq!(bob_session.state, ConnectionState::Connected);
    assert_eq!(bob_session.display_name.as_deref(), Some("bob"));

    let bob_view = bob.manager.roster();
    assert_eq!(bob_view[&ann.id].role, Role::Initiator);
    assert_eq!(net.live_links(), 1);
}

#[tokio::test]
async fn test_message_reaches_every_peer_and_replies_quote() {
    let relay = TestRelay::default();
    let net = MemoryNetwork::new();
    let mut ann = join(&relay, &net, "a-ann", "ann").await;
    let mut bob = join(&relay, &net, "b-bob", "bob").await;
    let mut cat = join(&relay, &net, "c-cat", "cat").await;

    wait_identified(&mut ann, 2).await;
    wait_identified(&mut bob, 2).await;
    wait_identified(&mut cat, 2).await;
    assert_eq!(net.live_links(), 3);

    let sent = ann
        .manager
        .send_message("hello all", ContentKind::Text, None)
        .unwrap();
    assert_eq!(wait_received(&mut bob).await, sent);
    assert_eq!(wait_received(&mut cat).await, sent);
    assert!(!ann.manager.history().unwrap()[0].pending);

    let stored = bob.manager.history().unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, sent.id);
    assert!(!stored[0].pending);

    let reply = bob
        .manager
        .send_message("hi ann", ContentKind::Text, Some(&sent.id))
        .unwrap();
    let received = wait_received(&mut ann).await;
    assert_eq!(received.id, reply.id);
    let quote = received.reply_to.expect("reply carries a quote");
    assert_eq!(quote.id, sent.id);
    assert_eq!(quote.sender, "ann");
    assert_eq!(quote.content, "hello all");
}

#[tokio::test]
async fn test_departed_peer_is_removed() {
    let relay = TestRelay::default();
    let net = MemoryNetwork::new();
    let mut ann = join(&relay, &net, "a-ann", "ann").await;
    let mut bob = join(&relay, &net, "b-bob", "bob").await;
    wait_identified(&mut ann, 1).await;
    wait_identified(&mut bob, 1).await;

    relay.disconnect(&bob.id).await;
    bob.manager.leave().await;

    let event = wait_for(&mut ann.events, |e| matches!(e, SessionEvent::PeerLeft { .. })).await;
    assert_eq!(event, SessionEvent::PeerLeft { peer: bob.id.clone() });
    assert!(ann.manager.roster().is_empty());
    assert_eq!(net.live_links(), 0);
}

#[tokio::test]
async fn test_message_sent_alone_is_delivered_to_first_peer() {
    let relay = TestRelay::default();
    let net = MemoryNetwork::new();
    let mut ann = join(&relay, &net, "a-ann", "ann").await;
    wait_for(&mut ann.events, |e| matches!(e, SessionEvent::RoomJoined { .. })).await;

    let queued = ann
        .manager
        .send_message("anyone there?", ContentKind::Text, None)
        .unwrap();
    assert!(ann.manager.history().unwrap()[0].pending);

    let mut bob = join(&relay, &net, "b-bob", "bob").await;
    assert_eq!(wait_received(&mut bob).await, queued);

    timeout(Duration::from_secs(5), async {
        while ann.manager.history().unwrap()[0].pending {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("queued message marked delivered");

    // A later peer does not get the backlog again.
    let mut cat = join(&relay, &net, "c-cat", "cat").await;
    wait_identified(&mut cat, 2).await;
    let fresh = ann.manager.send_message("welcome cat", ContentKind::Text, None).unwrap();
    assert_eq!(wait_received(&mut cat).await, fresh);
}

#[tokio::test]
async fn test_large_image_is_chunked_and_reassembled() {
    let relay = TestRelay::default();
    let net = MemoryNetwork::new();
    let mut ann = join(&relay, &net, "a-ann", "ann").await;
    let mut bob = join(&relay, &net, "b-bob", "bob").await;
    wait_identified(&mut ann, 1).await;
    wait_identified(&mut bob, 1).await;

    let content = format!("data:image/png;base64,{}", "iVBORw0KGgo".repeat(10_000));
    let sent = ann
        .manager
        .send_message(content.clone(), ContentKind::Image, None)
        .unwrap();

    let received = wait_received(&mut bob).await;
    assert_eq!(received.kind, ContentKind::Image);
    assert_eq!(received.content, content);
    assert_eq!(received.id, sent.id);
}

#[tokio::test]
async fn test_presence_typing_status_and_heartbeat() {
    let relay = TestRelay::default();
    let net = MemoryNetwork::new();
    let mut ann = join(&relay, &net, "a-ann", "ann").await;
    let mut bob = join(&relay, &net, "b-bob", "bob").await;
    wait_identified(&mut ann, 1).await;
    wait_identified(&mut bob, 1).await;

    ann.manager.notify_input();
    wait_for(&mut bob.events, |e| {
        matches!(e, SessionEvent::Typing { typing: true, .. })
    })
    .await;
    wait_for(&mut bob.events, |e| {
        matches!(e, SessionEvent::Typing { typing: false, .. })
    })
    .await;

    ann.manager.set_focus(false);
    let event = wait_for(&mut bob.events, |e| matches!(e, SessionEvent::StatusChanged { .. })).await;
    assert_eq!(
        event,
        SessionEvent::StatusChanged {
            peer: ann.id.clone(),
            activity: Activity::Away
        }
    );
    assert_eq!(bob.manager.roster()[&ann.id].activity, Activity::Away);

    match wait_for(&mut ann.events, |e| matches!(e, SessionEvent::Latency { .. })).await {
        SessionEvent::Latency { peer, slow, .. } => {
            assert_eq!(peer, bob.id);
            assert!(!slow);
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_severed_links_reconnect() {
    let relay = TestRelay::default();
    let net = MemoryNetwork::new();
    let mut ann = join(&relay, &net, "a-ann", "ann").await;
    let mut bob = join(&relay, &net, "b-bob", "bob").await;
    wait_identified(&mut ann, 1).await;
    wait_identified(&mut bob, 1).await;

    assert_eq!(net.sever_all(), 1);

    for p in [&mut ann, &mut bob] {
        wait_for(&mut p.events, |e| {
            matches!(
                e,
                SessionEvent::StateChanged {
                    state: ConnectionState::Disconnected,
                    ..
                }
            )
        })
        .await;
        wait_for(&mut p.events, |e| {
            matches!(
                e,
                SessionEvent::StateChanged {
                    state: ConnectionState::Connected,
                    ..
                }
            )
        })
        .await;
    }

    let sent = bob
        .manager
        .send_message("still here", ContentKind::Text, None)
        .unwrap();
    assert_eq!(wait_received(&mut ann).await, sent);
    assert_eq!(net.live_links(), 1);
    assert_eq!(ann.manager.roster()[&bob.id].attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_peer_backoff_then_abandon_then_revive() {
    let net = MemoryNetwork::new();
    net.set_refuse(true);

    let (relay_tx, mut relay_rx) = mpsc::channel(256);
    let mut config = SessionConfig::new("ann", RoomId::from("lobby"));
    config.heartbeat_interval = Duration::from_secs(3600);
    let (manager, mut events) = SessionManager::start(
        config,
        Arc::new(net.clone()),
        Outbox::new(Database::open_in_memory().unwrap()),
        relay_tx,
    );

    let bob = PeerId::from("b-bob");
    manager
        .handle_relay_event(RelayEvent::Welcome(PeerId::from("a-ann")))
        .await;
    manager
        .handle_relay_event(RelayEvent::Roster(vec![bob.clone()]))
        .await;

    let start = tokio::time::Instant::now();
    let mut delays = Vec::new();
    loop {
        match events.recv().await.unwrap() {
            SessionEvent::ReconnectScheduled { delay, .. } => delays.push(delay.as_millis()),
            SessionEvent::StateChanged {
                state: ConnectionState::Abandoned,
                ..
            } => break,
            _ => {}
        }
    }

    assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);
    assert!(start.elapsed() >= Duration::from_millis(31_000));
    let roster = manager.roster();
    assert_eq!(roster[&bob].state, ConnectionState::Abandoned);

    // No further attempts are scheduled.
    tokio::time::sleep(Duration::from_secs(120)).await;
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, SessionEvent::ReconnectScheduled { .. }));
    }

    // The peer comes back and offers a fresh channel.
    net.set_refuse(false);
    let (bob_tx, mut bob_rx) = mpsc::unbounded_channel();
    let _bob_link = net.open(Role::Initiator, bob_tx);
    let offer = match bob_rx.recv().await.unwrap() {
        LinkEvent::Signal(offer) => offer,
        other => panic!("expected offer, got {other:?}"),
    };
    manager
        .handle_relay_event(RelayEvent::IncomingSignal {
            signal: offer,
            caller_id: bob.clone(),
        })
        .await;

    loop {
        if let SessionEvent::StateChanged {
            state: ConnectionState::Connected,
            ..
        } = events.recv().await.unwrap()
        {
            break;
        }
    }
    assert_eq!(bob_rx.recv().await.unwrap(), LinkEvent::Open);
    match bob_rx.recv().await.unwrap() {
        LinkEvent::Data(frame) => {
            let envelope: Envelope = serde_json::from_str(&frame).unwrap();
            assert_eq!(envelope, Envelope::Identity { value: "ann".into() });
        }
        other => panic!("expected identity, got {other:?}"),
    }

    match relay_rx.recv().await.unwrap() {
        ClientEvent::ForwardReturnSignal { caller_id, .. } => assert_eq!(caller_id, bob),
        other => panic!("expected answer, got {other:?}"),
    }
    manager.leave().await;
}

#[tokio::test(start_paused = true)]
async fn test_departure_during_backoff_cancels_reconnect() {
    let net = MemoryNetwork::new();
    net.set_refuse(true);
    let opens = Arc::new(AtomicUsize::new(0));
    let connector = CountingConnector {
        inner: net.clone(),
        opens: opens.clone(),
    };

    let (relay_tx, _relay_rx) = mpsc::channel(256);
    let mut config = SessionConfig::new("ann", RoomId::from("lobby"));
    config.heartbeat_interval = Duration::from_secs(3600);
    let (manager, mut events) = SessionManager::start(
        config,
        Arc::new(connector),
        Outbox::new(Database::open_in_memory().unwrap()),
        relay_tx,
    );

    let bob = PeerId::from("b-bob");
    manager
        .handle_relay_event(RelayEvent::Welcome(PeerId::from("a-ann")))
        .await;
    manager
        .handle_relay_event(RelayEvent::Roster(vec![bob.clone()]))
        .await;

    wait_for(&mut events, |e| {
        matches!(e, SessionEvent::ReconnectScheduled { attempt: 1, .. })
    })
    .await;
    assert_eq!(opens.load(Ordering::SeqCst), 1);

    // The relay reports the departure while the first retry is pending.
    manager
        .handle_relay_event(RelayEvent::PeerLeft(bob.clone()))
        .await;
    wait_for(&mut events, |e| matches!(e, SessionEvent::PeerLeft { peer } if *peer == bob)).await;
    assert!(manager.roster().is_empty());

    // Well past every backoff delay: nothing was dialed again.
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(opens.load(Ordering::SeqCst), 1);
    assert!(manager.roster().is_empty());
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, SessionEvent::ReconnectScheduled { .. }),
            "unexpected retry after departure: {event:?}"
        );
    }
    manager.leave().await;
}

#[tokio::test]
async fn test_capacity_rejection_is_reported() {
    let (relay_tx, _relay_rx) = mpsc::channel(8);
    let (manager, mut events) = SessionManager::start(
        SessionConfig::new("ann", RoomId::from("busy")),
        Arc::new(MemoryNetwork::new()),
        Outbox::new(Database::open_in_memory().unwrap()),
        relay_tx,
    );
    manager.handle_relay_event(RelayEvent::CapacityRejected).await;
    assert_eq!(
        events.recv().await.unwrap(),
        SessionEvent::RoomFull {
            room: RoomId::from("busy")
        }
    );
    assert!(manager.roster().is_empty());
}
