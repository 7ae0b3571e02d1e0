//! Chunked, versioned snapshot synchronization
//!
//! Publishing writes every chunk of a serialized [`Aggregate`] under a fresh
//! deployment id and only then overwrites the metadata document. Readers
//! decide what is current from metadata alone, so they observe either the old
//! deployment or the new one, never a mix. Superseded chunks are reclaimed in
//! the background.

mod gc;
mod publish;
mod subscribe;

pub use gc::*;
pub use publish::*;
pub use subscribe::*;

use crate::aggregate::Aggregate;
use crate::error::{Error, Result};

/// Serialize an aggregate into the published payload
pub fn encode_snapshot(aggregate: &Aggregate) -> Result<String> {
    Ok(serde_json::to_string(aggregate)?)
}

/// Parse a published payload
pub fn decode_snapshot(payload: &str) -> Result<Aggregate> {
    serde_json::from_str(payload)
        .map_err(|e| Error::Integrity(format!("Snapshot payload does not parse: {}", e)))
}
