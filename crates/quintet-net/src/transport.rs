//! The point-to-point channel capability.
//!
//! A [`Connector`] creates one [`Link`] per connection attempt. The link
//! produces opaque signaling blobs that must reach the other participant
//! through the relay, accepts the blobs coming back, and reports its
//! lifecycle through a stream of [`LinkEvent`]s. Once open, a link is an
//! ordered, bidirectional stream of text frames.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::mpsc;

use quintet_shared::types::Role;

/// Lifecycle and data events produced by a link.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// A signaling blob to deliver to the remote side
    Signal(Value),
    /// The channel is established and `send` will succeed
    Open,
    /// One frame received from the remote side
    Data(String),
    /// The channel failed or was closed; no further events follow
    Closed(Option<String>),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("Channel not open yet")]
    NotReady,

    #[error("Channel closed")]
    Closed,
}

/// One direct channel to one remote participant.
///
/// Methods never block; `send` queues the frame for the writer.
pub trait Link: Send {
    /// Feed a signaling blob received from the remote side.
    fn signal(&mut self, signal: Value);

    fn send(&self, frame: &str) -> Result<(), LinkError>;

    /// Tear the channel down. Idempotent.
    fn close(&mut self);
}

/// Factory for links.
pub trait Connector: Send + Sync + 'static {
    fn open(&self, role: Role, events: mpsc::UnboundedSender<LinkEvent>) -> Box<dyn Link>;
}

/// Signaling blobs exchanged by the bundled connectors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DirectSignal {
    /// Initiator's reachable endpoint
    Offer { addr: String },
    /// Responder reached the endpoint
    Answer,
}

impl DirectSignal {
    pub fn to_value(&self) -> Value {
        match self {
            DirectSignal::Offer { addr } => json!({ "kind": "offer", "addr": addr }),
            DirectSignal::Answer => json!({ "kind": "answer" }),
        }
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_signal_shape() {
        let offer = DirectSignal::Offer {
            addr: "127.0.0.1:4000".into(),
        };
        assert_eq!(
            offer.to_value(),
            serde_json::json!({"kind": "offer", "addr": "127.0.0.1:4000"})
        );
        assert_eq!(
            DirectSignal::from_value(&serde_json::json!({"kind": "answer"})),
            Some(DirectSignal::Answer)
        );
        assert_eq!(DirectSignal::from_value(&serde_json::json!("junk")), None);
    }

    #[test]
    fn test_direct_signal_reads_back_its_own_value() {
        for signal in [
            DirectSignal::Offer {
                addr: "mem:7".into(),
            },
            DirectSignal::Answer,
        ] {
            let value = signal.to_value();
            assert!(!value.is_null());
            assert_eq!(value, serde_json::to_value(&signal).unwrap());
            assert_eq!(DirectSignal::from_value(&value), Some(signal));
        }
    }
}
