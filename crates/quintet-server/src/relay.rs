//! WebSocket endpoint of the directory relay.
//!
//! One socket per participant. Each connection gets a fresh identifier,
//! announced with a `welcome` event, and is dropped from the directory
//! when the socket closes.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use quintet_shared::protocol::{ClientEvent, RelayEvent};
use quintet_shared::types::PeerId;

use crate::api::AppState;
use crate::directory::Directory;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.directory))
}

async fn handle_socket(socket: WebSocket, directory: Arc<Directory>) {
    let id = PeerId::new(Uuid::new_v4().simple().to_string());
    let (mut sink, mut stream) = socket.split();

    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<RelayEvent>();
    let _ = outbound.send(RelayEvent::Welcome(id.clone()));
    directory.register(id.clone(), outbound);
    info!(peer = %id, "Participant connected to relay");

    // The directory holds the only sender, so this ends once the
    // participant is disconnected.
    let writer = tokio::spawn(async move {
        while let Some(event) = outbound_rx.recv().await {
            let text = match event.to_json() {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "Failed to encode relay event");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match ClientEvent::from_json(&text) {
                Ok(event) => dispatch(&directory, &id, event),
                Err(e) => warn!(peer = %id, error = %e, "Ignoring malformed relay frame"),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(peer = %id, error = %e, "Socket error");
                break;
            }
        }
    }

    directory.disconnect(&id);
    let _ = writer.await;
    info!(peer = %id, "Participant disconnected from relay");
}

fn dispatch(directory: &Directory, from: &PeerId, event: ClientEvent) {
    match event {
        ClientEvent::JoinRoom(room) => {
            directory.join_room(from, room);
        }
        // The claimed caller is ignored; the socket identity is authoritative.
        ClientEvent::ForwardSignal {
            target_id, signal, ..
        } => {
            directory.relay_signal(from, &target_id, signal);
        }
        ClientEvent::ForwardReturnSignal { signal, caller_id } => {
            directory.relay_return_signal(from, &caller_id, signal);
        }
    }
}
