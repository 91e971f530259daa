//! WebSocket connection to the directory relay.
//!
//! The socket runs in a dedicated tokio task. Callers push [`ClientEvent`]s
//! into a command channel and read [`RelayNotification`]s from a
//! notification channel, keeping the rest of the client decoupled from the
//! socket itself.

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use quintet_shared::protocol::{ClientEvent, RelayEvent};

#[derive(Error, Debug)]
pub enum RelayClientError {
    #[error("Relay connection failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Notifications sent *from* the relay task to the application.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayNotification {
    Event(RelayEvent),
    /// The socket is gone; no further notifications follow.
    Closed,
}

/// Connect to the relay at `url` and spawn the socket task.
///
/// Returns `(command_tx, notification_rx)`. Dropping `command_tx` closes
/// the socket.
pub async fn connect_relay(
    url: &str,
) -> Result<(mpsc::Sender<ClientEvent>, mpsc::Receiver<RelayNotification>), RelayClientError> {
    let (ws_stream, _) = tokio_tungstenite::connect_async(url).await?;
    info!(url = %url, "Connected to relay");

    let (mut ws_writer, mut ws_reader) = ws_stream.split();
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<ClientEvent>(256);
    let (notif_tx, notif_rx) = mpsc::channel::<RelayNotification>(256);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    let Some(event) = cmd else {
                        debug!("Relay command channel closed, shutting down socket");
                        let _ = ws_writer.send(Message::Close(None)).await;
                        break;
                    };
                    let text = match event.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            warn!(error = %e, "Failed to serialize relay event");
                            continue;
                        }
                    };
                    if let Err(e) = ws_writer.send(Message::text(text)).await {
                        warn!(error = %e, "Relay write failed");
                        break;
                    }
                }
                frame = ws_reader.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            match RelayEvent::from_json(text.as_str()) {
                                Ok(event) => {
                                    if notif_tx.send(RelayNotification::Event(event)).await.is_err() {
                                        break;
                                    }
                                }
                                Err(e) => warn!(error = %e, "Ignoring malformed relay frame"),
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!("Relay closed the connection");
                            break;
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "Relay read failed");
                            break;
                        }
                        Some(Ok(_)) => {}
                    }
                }
            }
        }

        let _ = notif_tx.send(RelayNotification::Closed).await;
    });

    Ok((cmd_tx, notif_rx))
}
