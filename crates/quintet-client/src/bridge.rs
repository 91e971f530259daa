//! Glue between the relay socket and the session manager.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use quintet_net::{connect_relay, RelayNotification, TcpConnector};
use quintet_shared::types::RoomId;

use crate::config::ClientConfig;
use crate::events::SessionEvent;
use crate::outbox::Outbox;
use crate::session::{SessionConfig, SessionManager};

/// Connect to the relay, start a session manager on direct TCP links,
/// spawn the notification loop and join `room`.
pub async fn start_session(
    config: &ClientConfig,
    name: &str,
    room: RoomId,
    outbox: Outbox,
) -> anyhow::Result<(SessionManager, mpsc::UnboundedReceiver<SessionEvent>)> {
    let (relay_tx, notif_rx) = connect_relay(&config.relay_url).await?;

    let connector = TcpConnector {
        bind_host: config.link_bind_host.clone(),
        advertise_host: config.link_advertise_host.clone(),
        connect_timeout: config.reconnect.connect_timeout,
    };

    let session_config = SessionConfig::from_client_config(config, name, room);
    let (manager, events) =
        SessionManager::start(session_config, Arc::new(connector), outbox, relay_tx);

    spawn_relay_bridge(manager.clone(), notif_rx);
    manager.join().await?;

    Ok((manager, events))
}

pub fn spawn_relay_bridge(
    manager: SessionManager,
    notif_rx: mpsc::Receiver<RelayNotification>,
) -> JoinHandle<()> {
    tokio::spawn(notification_loop(manager, notif_rx))
}

/// Feed relay notifications into the session manager until the relay
/// connection ends.
async fn notification_loop(manager: SessionManager, mut notif_rx: mpsc::Receiver<RelayNotification>) {
    info!("Relay notification bridge started");

    while let Some(notification) = notif_rx.recv().await {
        match notification {
            RelayNotification::Event(event) => manager.handle_relay_event(event).await,
            RelayNotification::Closed => break,
        }
    }

    manager.relay_lost();
    warn!("Relay notification loop ended");
}
