//! # quintet-shared
//!
//! Types shared by the relay and the participants: identifiers, the relay
//! event protocol, peer-channel envelopes and the chunked transport codec.

pub mod codec;
pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use codec::ChunkAssembler;
pub use error::{CodecError, ProtocolError};
pub use protocol::{ChatMessage, ClientEvent, Envelope, Quote, RelayEvent};
pub use types::{Activity, ContentKind, PeerId, Role, RoomId};
