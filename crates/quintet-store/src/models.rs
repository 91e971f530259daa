//! Domain model structs persisted in the local SQLite database.

use serde::{Deserialize, Serialize};

use quintet_shared::protocol::{ChatMessage, Quote};
use quintet_shared::types::{ContentKind, RoomId};

/// A chat message as stored locally, sent or received.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Message identifier chosen by the sender.
    pub id: String,
    /// The room this message belongs to.
    pub room_id: RoomId,
    /// Sender display name.
    pub sender: String,
    /// Text, or a `data:` URL for images.
    pub content: String,
    pub kind: ContentKind,
    /// Quoted message when this is a reply.
    pub reply_to: Option<Quote>,
    /// Unix epoch millis, as reported by the sender.
    pub timestamp: i64,
    /// True while an outgoing message has not reached any peer.
    pub pending: bool,
}

impl Message {
    pub fn from_chat(chat: &ChatMessage, room_id: &RoomId, pending: bool) -> Self {
        Self {
            id: chat.id.clone(),
            room_id: room_id.clone(),
            sender: chat.sender.clone(),
            content: chat.content.clone(),
            kind: chat.kind,
            reply_to: chat.reply_to.clone(),
            timestamp: chat.timestamp,
            pending,
        }
    }

    /// The wire form of this message (room and pending flag are local only).
    pub fn to_chat(&self) -> ChatMessage {
        ChatMessage {
            id: self.id.clone(),
            sender: self.sender.clone(),
            content: self.content.clone(),
            kind: self.kind,
            reply_to: self.reply_to.clone(),
            timestamp: self.timestamp,
        }
    }
}
