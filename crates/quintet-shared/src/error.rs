use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Envelope serialization failed: {0}")]
    Serialize(serde_json::Error),

    #[error("Malformed envelope: {0}")]
    Malformed(serde_json::Error),

    #[error("Chunk index {index} out of range (total {total})")]
    ChunkOutOfRange { index: u32, total: u32 },

    #[error("Chunk total mismatch for {id}: expected {expected}, got {got}")]
    ChunkTotalMismatch { id: String, expected: u32, got: u32 },

    #[error("Reassembled payload is itself a chunk")]
    NestedChunk,
}
