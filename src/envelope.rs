use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;
use uuid::Uuid;

/// Errors from the envelope codec.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),

    /// Malformed bytes from the bus. Dropped and logged by the adapter,
    /// never propagated to connection code.
    #[error("malformed envelope: {0}")]
    Decode(#[source] serde_json::Error),
}

/// The unit published to the bus for one broadcast.
///
/// Self-contained: the decoder reconstructs the full target from the bytes
/// alone, with no context from the channel it arrived on. Ephemeral - an
/// envelope exists only in transit and is never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Namespace the broadcast is scoped to.
    pub namespace: String,
    /// Target room, or `None` for a whole-namespace broadcast.
    pub room: Option<String>,
    /// Connection ids that must not receive the payload.
    pub except: HashSet<String>,
    /// Identity of the process that published the envelope, used to
    /// suppress self-loops when the bus echoes a publish back.
    pub origin: Uuid,
    /// Opaque payload bytes handed to the transport unchanged.
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(self).map_err(CodecError::Encode)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        serde_json::from_slice(bytes).map_err(CodecError::Decode)
    }
}
