//! Chunked transport framing for the peer channel.
//!
//! The point-to-point channel caps individual frames, so an envelope whose
//! JSON form exceeds [`CHUNK_SIZE`] bytes is cut into `chunk` envelopes and
//! glued back together on the receiving side.
//!
//! Slices are cut on UTF-8 character boundaries, so every slice is valid
//! text and reassembly is byte-identical. For ASCII payloads the number of
//! slices is exactly `ceil(len / CHUNK_SIZE)`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::constants::{CHUNK_ASSEMBLY_TTL_SECS, CHUNK_SIZE};
use crate::error::CodecError;
use crate::protocol::{generate_message_id, Envelope};

/// Serialize an envelope into one or more wire frames.
pub fn encode(envelope: &Envelope) -> Result<Vec<String>, CodecError> {
    encode_with_limit(envelope, CHUNK_SIZE)
}

/// Same as [`encode`] with an explicit slice limit.
pub fn encode_with_limit(envelope: &Envelope, limit: usize) -> Result<Vec<String>, CodecError> {
    let serialized = serde_json::to_string(envelope).map_err(CodecError::Serialize)?;
    if serialized.len() <= limit {
        return Ok(vec![serialized]);
    }

    let id = match envelope {
        Envelope::Message { value } => value.id.clone(),
        _ => generate_message_id(chrono::Utc::now().timestamp_millis()),
    };

    let slices = split_on_char_boundaries(&serialized, limit);
    let total = slices.len() as u32;

    debug!(
        id = %id,
        len = serialized.len(),
        chunks = total,
        "Splitting envelope into chunks"
    );

    slices
        .into_iter()
        .enumerate()
        .map(|(i, data)| {
            let chunk = Envelope::Chunk {
                id: id.clone(),
                current: i as u32,
                total,
                data: data.to_string(),
            };
            serde_json::to_string(&chunk).map_err(CodecError::Serialize)
        })
        .collect()
}

fn split_on_char_boundaries(s: &str, limit: usize) -> Vec<&str> {
    let limit = limit.max(4);
    let mut slices = Vec::with_capacity(s.len() / limit + 1);
    let mut start = 0;
    while start < s.len() {
        let mut end = (start + limit).min(s.len());
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        slices.push(&s[start..end]);
        start = end;
    }
    slices
}

/// Partially received chunk set for one message.
#[derive(Debug)]
struct PartialEnvelope {
    total: u32,
    slices: HashMap<u32, String>,
    first_seen: Instant,
}

/// Reassembly buffers for the frames arriving from a single peer.
///
/// Each peer session owns its own assembler, so buffers are keyed by
/// message id only. Incomplete sets are evicted once they are older than
/// the configured TTL.
#[derive(Debug)]
pub struct ChunkAssembler {
    partial: HashMap<String, PartialEnvelope>,
    ttl: Duration,
}

impl ChunkAssembler {
    pub fn new() -> Self {
        Self::with_ttl(Duration::from_secs(CHUNK_ASSEMBLY_TTL_SECS))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            partial: HashMap::new(),
            ttl,
        }
    }

    /// Decode one wire frame. Returns `None` while a chunk set is incomplete.
    pub fn decode(&mut self, frame: &str) -> Result<Option<Envelope>, CodecError> {
        self.decode_at(frame, Instant::now())
    }

    pub fn decode_at(&mut self, frame: &str, now: Instant) -> Result<Option<Envelope>, CodecError> {
        self.evict_stale(now);

        let envelope: Envelope = serde_json::from_str(frame).map_err(CodecError::Malformed)?;
        let (id, current, total, data) = match envelope {
            Envelope::Chunk {
                id,
                current,
                total,
                data,
            } => (id, current, total, data),
            other => return Ok(Some(other)),
        };

        if current >= total {
            return Err(CodecError::ChunkOutOfRange {
                index: current,
                total,
            });
        }

        let entry = self
            .partial
            .entry(id.clone())
            .or_insert_with(|| PartialEnvelope {
                total,
                slices: HashMap::new(),
                first_seen: now,
            });
        if entry.total != total {
            return Err(CodecError::ChunkTotalMismatch {
                id,
                expected: entry.total,
                got: total,
            });
        }

        // Duplicate indices overwrite.
        entry.slices.insert(current, data);
        if entry.slices.len() < total as usize {
            return Ok(None);
        }

        let Some(mut complete) = self.partial.remove(&id) else {
            return Ok(None);
        };
        let mut joined = String::new();
        for i in 0..total {
            if let Some(slice) = complete.slices.remove(&i) {
                joined.push_str(&slice);
            }
        }

        debug!(id = %id, chunks = total, len = joined.len(), "Reassembled chunked envelope");

        match serde_json::from_str::<Envelope>(&joined).map_err(CodecError::Malformed)? {
            Envelope::Chunk { .. } => Err(CodecError::NestedChunk),
            envelope => Ok(Some(envelope)),
        }
    }

    /// Drop partial sets older than the TTL. Returns how many were dropped.
    pub fn evict_stale(&mut self, now: Instant) -> usize {
        let ttl = self.ttl;
        let before = self.partial.len();
        self.partial
            .retain(|_, p| now.saturating_duration_since(p.first_seen) < ttl);
        let evicted = before - self.partial.len();
        if evicted > 0 {
            debug!(evicted, "Evicted incomplete chunk sets");
        }
        evicted
    }

    /// Number of chunk sets still waiting for slices.
    pub fn pending(&self) -> usize {
        self.partial.len()
    }
}

impl Default for ChunkAssembler {
    fn default() -> Self {
        Self::new()
    }
}
