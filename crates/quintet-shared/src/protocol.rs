use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::types::{Activity, ContentKind, PeerId, RoomId};

// ---------------------------------------------------------------------------
// Relay protocol
// ---------------------------------------------------------------------------

/// Events sent by a participant to the directory relay.
///
/// Wire form: `{"event": "<kebab-name>", "data": ...}` as a JSON text frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Join (or switch to) a room
    JoinRoom(RoomId),

    /// Forward an opaque signaling blob to another participant
    ForwardSignal {
        #[serde(rename = "targetID")]
        target_id: PeerId,
        /// Informational only; the relay tags with the real sender
        #[serde(rename = "callerID")]
        caller_id: PeerId,
        signal: Value,
    },

    /// Answer a signal back to the participant that initiated it
    ForwardReturnSignal {
        signal: Value,
        #[serde(rename = "callerID")]
        caller_id: PeerId,
    },
}

/// Events sent by the directory relay to a participant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum RelayEvent {
    /// Identifier assigned to this relay connection
    Welcome(PeerId),

    /// Participants already in the room, excluding the joiner
    Roster(Vec<PeerId>),

    /// The room is at capacity; the join was refused
    CapacityRejected,

    /// An initiator's signal addressed to us
    IncomingSignal {
        signal: Value,
        #[serde(rename = "callerID")]
        caller_id: PeerId,
    },

    /// A responder's answer to a signal we sent
    IncomingReturnSignal {
        signal: Value,
        #[serde(rename = "sourceID")]
        source_id: PeerId,
    },

    /// A participant of our room disconnected
    PeerLeft(PeerId),
}

impl ClientEvent {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

impl RelayEvent {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

// ---------------------------------------------------------------------------
// Peer channel protocol
// ---------------------------------------------------------------------------

/// A chat message. Immutable once created; the pending flag lives in the
/// local store, never on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Send timestamp plus random suffix; unique per sender, not ordered
    pub id: String,
    pub sender: String,
    /// Plain text, or a `data:` URL for images
    pub content: String,
    #[serde(rename = "type")]
    pub kind: ContentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<Quote>,
    /// Unix epoch millis
    pub timestamp: i64,
}

/// The replied-to message as shown next to a reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Quote {
    pub id: String,
    pub sender: String,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: ContentKind,
}

impl ChatMessage {
    pub fn new(
        sender: impl Into<String>,
        content: impl Into<String>,
        kind: ContentKind,
        reply_to: Option<Quote>,
    ) -> Self {
        let timestamp = chrono::Utc::now().timestamp_millis();
        Self {
            id: generate_message_id(timestamp),
            sender: sender.into(),
            content: content.into(),
            kind,
            reply_to,
            timestamp,
        }
    }

    pub fn quote(&self) -> Quote {
        Quote {
            id: self.id.clone(),
            sender: self.sender.clone(),
            content: self.content.clone(),
            kind: self.kind,
        }
    }
}

/// `<millis><9 random base36 chars>`
pub fn generate_message_id(timestamp_ms: i64) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("{timestamp_ms}{suffix}")
}

/// Unit exchanged over an established peer channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Envelope {
    /// Sender's display name, sent once the channel opens
    Identity { value: String },
    Status { value: Activity },
    Typing { value: bool },
    Ping { timestamp: i64 },
    Pong { timestamp: i64 },
    Message { value: ChatMessage },
    /// One slice of an oversized serialized envelope
    Chunk {
        id: String,
        current: u32,
        total: u32,
        data: String,
    },
}

impl Envelope {
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Identity { .. } => "identity",
            Envelope::Status { .. } => "status",
            Envelope::Typing { .. } => "typing",
            Envelope::Ping { .. } => "ping",
            Envelope::Pong { .. } => "pong",
            Envelope::Message { .. } => "message",
            Envelope::Chunk { .. } => "chunk",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_event_wire_names() {
        let ev = ClientEvent::ForwardSignal {
            target_id: PeerId::from("b"),
            caller_id: PeerId::from("a"),
            signal: serde_json::json!({"kind": "offer"}),
        };
        let json: Value = serde_json::from_str(&ev.to_json().unwrap()).unwrap();
        assert_eq!(json["event"], "forward-signal");
        assert_eq!(json["data"]["targetID"], "b");
        assert_eq!(json["data"]["callerID"], "a");

        let join = ClientEvent::from_json(r#"{"event":"join-room","data":"lobby"}"#).unwrap();
        assert_eq!(join, ClientEvent::JoinRoom(RoomId::from("lobby")));
    }

    #[test]
    fn test_relay_event_wire_names() {
        let json: Value = serde_json::from_str(
            &RelayEvent::IncomingReturnSignal {
                signal: Value::Null,
                source_id: PeerId::from("x"),
            }
            .to_json()
            .unwrap(),
        )
        .unwrap();
        assert_eq!(json["event"], "incoming-return-signal");
        assert_eq!(json["data"]["sourceID"], "x");

        let full = RelayEvent::CapacityRejected.to_json().unwrap();
        assert_eq!(RelayEvent::from_json(&full).unwrap(), RelayEvent::CapacityRejected);
    }

    #[test]
    fn test_envelope_shapes() {
        let ping = serde_json::to_value(Envelope::Ping { timestamp: 42 }).unwrap();
        assert_eq!(ping, serde_json::json!({"type": "ping", "timestamp": 42}));

        let typing = serde_json::to_value(Envelope::Typing { value: true }).unwrap();
        assert_eq!(typing, serde_json::json!({"type": "typing", "value": true}));

        let status = serde_json::to_value(Envelope::Status {
            value: Activity::Away,
        })
        .unwrap();
        assert_eq!(status, serde_json::json!({"type": "status", "value": "away"}));
    }

    #[test]
    fn test_message_envelope_uses_camel_case() {
        let original = ChatMessage::new("ann", "first", ContentKind::Text, None);
        let reply = ChatMessage::new("bob", "re", ContentKind::Text, Some(original.quote()));
        let json = serde_json::to_value(Envelope::Message { value: reply }).unwrap();

        assert_eq!(json["type"], "message");
        assert_eq!(json["value"]["type"], "text");
        assert_eq!(json["value"]["replyTo"]["id"], original.id.as_str());
        assert_eq!(json["value"]["replyTo"]["sender"], "ann");
    }

    #[test]
    fn test_message_ids_are_distinct() {
        let a = generate_message_id(1_700_000_000_000);
        let b = generate_message_id(1_700_000_000_000);
        assert!(a.starts_with("1700000000000"));
        assert_eq!(a.len(), 13 + 9);
        assert_ne!(a, b);
    }
}
