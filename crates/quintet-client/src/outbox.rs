//! Offline delivery queue on top of the local message store.
//!
//! Every message is written to the store the moment it is sent or received.
//! Outgoing messages that reached nobody stay `pending` until the next peer
//! connects, at which point they are sent to that peer and marked delivered.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use quintet_shared::codec;
use quintet_shared::protocol::{ChatMessage, Envelope};
use quintet_shared::types::{PeerId, RoomId};
use quintet_store::{Database, Message, StoreError};

use crate::error::{Result, SessionError};

#[derive(Clone)]
pub struct Outbox {
    db: Arc<Mutex<Database>>,
}

impl Outbox {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    fn db(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record_outgoing(&self, room: &RoomId, message: &ChatMessage, pending: bool) -> Result<()> {
        self.db()
            .insert_message(&Message::from_chat(message, room, pending))?;
        Ok(())
    }

    /// Record an outgoing message, deciding whether it is pending from the
    /// recipients `connected` yields. The recipient list is taken under the
    /// same lock [`Outbox::flush_pending`] holds, so a peer that connects
    /// concurrently either appears in it or finds the row when it flushes.
    pub fn record_outgoing_with(
        &self,
        room: &RoomId,
        message: &ChatMessage,
        connected: impl FnOnce() -> Vec<PeerId>,
    ) -> Result<Vec<PeerId>> {
        let db = self.db();
        let recipients = connected();
        let pending = recipients.is_empty();
        db.insert_message(&Message::from_chat(message, room, pending))?;
        if pending {
            info!(id = %message.id, room = %room, "No peer connected, message queued");
        }
        Ok(recipients)
    }

    /// Store a message received from a peer. Returns `false` for a message
    /// id already on record.
    pub fn record_incoming(&self, room: &RoomId, message: &ChatMessage) -> Result<bool> {
        let written = self
            .db()
            .insert_message_if_absent(&Message::from_chat(message, room, false))?;
        if !written {
            debug!(id = %message.id, "Ignoring duplicate message");
        }
        Ok(written)
    }

    /// Send every pending message of `room` through `send` and mark the ones
    /// it accepted as delivered. Returns how many were delivered.
    ///
    /// The flag is global per message: the first peer to connect receives
    /// the backlog and later peers do not.
    pub fn flush_pending(&self, room: &RoomId, mut send: impl FnMut(&[String]) -> bool) -> Result<usize> {
        let db = self.db();
        let pending = db.get_pending_messages(room)?;
        if pending.is_empty() {
            return Ok(0);
        }

        let mut delivered = 0;
        for message in &pending {
            let envelope = Envelope::Message {
                value: message.to_chat(),
            };
            let frames = match codec::encode(&envelope) {
                Ok(frames) => frames,
                Err(e) => {
                    warn!(id = %message.id, error = %e, "Failed to encode queued message");
                    continue;
                }
            };
            if !send(&frames) {
                debug!(id = %message.id, "Channel refused queued message, keeping it pending");
                break;
            }
            if db.mark_delivered(&message.id)? {
                delivered += 1;
            }
        }

        info!(room = %room, delivered, queued = pending.len(), "Flushed pending messages");
        Ok(delivered)
    }

    pub fn history(&self, room: &RoomId) -> Result<Vec<Message>> {
        Ok(self.db().get_messages_for_room(room)?)
    }

    pub fn pending(&self, room: &RoomId) -> Result<Vec<Message>> {
        Ok(self.db().get_pending_messages(room)?)
    }

    pub fn find(&self, id: &str) -> Result<Message> {
        match self.db().get_message_by_id(id) {
            Ok(message) => Ok(message),
            Err(StoreError::NotFound) => Err(SessionError::UnknownMessage(id.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}
