//! Audio frame wire format
//!
//! A frame is an opaque block of little-endian f32 mono samples. Frames
//! from the broadcaster travel inside a small bincode envelope naming the
//! target room; frames fanned out to listeners are the bare payload.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::constants::MAX_FRAME_BYTES;
use crate::error::ProtocolError;

/// Client-to-server binary message: one PCM frame addressed to a room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameEnvelope {
    pub room_code: String,
    pub payload: Vec<u8>,
}

impl FrameEnvelope {
    pub fn new(room_code: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            room_code: room_code.into(),
            payload,
        }
    }

    /// Serialize for transmission
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        if self.payload.len() > MAX_FRAME_BYTES {
            return Err(ProtocolError::FrameTooLarge(self.payload.len()));
        }
        bincode::serialize(self)
            .map(Bytes::from)
            .map_err(|e| ProtocolError::MalformedFrame(e.to_string()))
    }

    /// Deserialize an inbound binary message, enforcing the frame ceiling
    /// before touching the contents.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() > MAX_FRAME_BYTES {
            return Err(ProtocolError::FrameTooLarge(bytes.len()));
        }
        bincode::deserialize(bytes).map_err(|e| ProtocolError::MalformedFrame(e.to_string()))
    }
}

/// Pack mono f32 samples into little-endian bytes
pub fn encode_samples(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 4);
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

/// Unpack little-endian bytes into mono f32 samples
///
/// Pure format transform; must not block.
pub fn decode_samples(bytes: &[u8]) -> Result<Vec<f32>, ProtocolError> {
    if bytes.len() > MAX_FRAME_BYTES {
        return Err(ProtocolError::FrameTooLarge(bytes.len()));
    }
    if bytes.len() % 4 != 0 {
        return Err(ProtocolError::MalformedFrame(format!(
            "payload length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}
