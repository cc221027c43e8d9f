use thiserror::Error;

use crate::bus::BusError;
use crate::envelope::CodecError;

/// Errors surfaced by the adapter's public operations.
///
/// None of these are fatal to the process: a bus failure degrades the
/// adapter to local-only delivery, and malformed bus input is dropped
/// before it reaches connection code.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Namespace, room or connection identifier containing the channel
    /// delimiter; rejected before any state mutation.
    #[error("invalid identifier {0:?}: contains reserved channel delimiter '#'")]
    InvalidIdentifier(String),

    #[error("bus operation failed: {0}")]
    Bus(#[from] BusError),

    #[error("envelope codec failure: {0}")]
    Codec(#[from] CodecError),
}
