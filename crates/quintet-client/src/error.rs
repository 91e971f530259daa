use thiserror::Error;

use quintet_shared::CodecError;
use quintet_store::StoreError;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Relay connection is closed")]
    RelayUnavailable,

    #[error("Message not found: {0}")]
    UnknownMessage(String),
}

pub type Result<T> = std::result::Result<T, SessionError>;
