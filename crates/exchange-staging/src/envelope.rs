//! Intermediate geometry artifacts.
//!
//! When requested, the payload is also written as a length-delimited
//! protobuf [`GeometryEnvelope`] next to its carrier, so the bytes that were
//! published can be inspected or replayed later.

use std::path::Path;

use anyhow::{anyhow, Result};
use prost::Message;

use crate::paths::replace_staged_file;

#[derive(Clone, PartialEq, Message)]
pub struct GeometryEnvelope {
    /// Raw payload bytes, unmodified.
    #[prost(bytes = "vec", tag = "1")]
    pub body: Vec<u8>,
}

impl GeometryEnvelope {
    pub fn new(body: Vec<u8>) -> Self {
        Self { body }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode_length_delimited_to_vec()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::decode_length_delimited(bytes)
            .map_err(|e| anyhow!("Failed to decode geometry envelope: {}", e))
    }
}

/// Wrap the payload at `payload` into an envelope file at `out`.
pub fn wrap_payload_file(payload: &Path, out: &Path) -> Result<()> {
    let body = std::fs::read(payload)
        .map_err(|e| anyhow!("Failed to read payload {}: {}", payload.display(), e))?;
    replace_staged_file(out, &GeometryEnvelope::new(body).to_bytes())
}

/// Read the payload bytes back out of an envelope file.
pub fn unwrap_envelope_file(path: &Path) -> Result<Vec<u8>> {
    let bytes = std::fs::read(path)
        .map_err(|e| anyhow!("Failed to read envelope {}: {}", path.display(), e))?;
    Ok(GeometryEnvelope::from_bytes(&bytes)?.body)
}
