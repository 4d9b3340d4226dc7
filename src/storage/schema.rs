//! Index artifact layout and versioning.
//!
//! # File Layout
//!
//! ```text
//! ┌──────────┬────────────────┬──────────────────────────────────────────┐
//! │ "NLIX"   │ format version │ bincode body (ArtifactBody)              │
//! │ 4 bytes  │ u32 LE         │ dimension, index config, generation,     │
//! │          │                │ snapshot version, built_at, records      │
//! └──────────┴────────────────┴──────────────────────────────────────────┘
//! ```
//!
//! Only the records are persisted for the approximate strategy; the graph
//! is rebuilt from them on load.

use serde::{Deserialize, Serialize};

use crate::config::IndexConfig;
use crate::store::Metadata;
use crate::types::{Generation, RecordId, StoreVersion, Timestamp};

/// Magic bytes at the start of every artifact.
pub const MAGIC: [u8; 4] = *b"NLIX";

/// Current artifact format version.
///
/// Increment this when making breaking changes to the body layout.
/// Artifacts with a different version are refused on load.
pub const FORMAT_VERSION: u32 = 1;

/// Bytes before the bincode body.
pub const HEADER_LEN: usize = MAGIC.len() + std::mem::size_of::<u32>();

/// One persisted record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistedRecord {
    /// Record id.
    pub id: RecordId,
    /// Embedding as stored (not normalized).
    pub embedding: Vec<f32>,
    /// Metadata.
    pub metadata: Metadata,
}

/// Serialized body of an artifact.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArtifactBody {
    /// Embedding dimension.
    pub dimension: usize,
    /// Metric and strategy the generation was built with.
    pub index: IndexConfig,
    /// Generation that was saved.
    pub generation: Generation,
    /// Store version of that generation's snapshot.
    pub snapshot_version: StoreVersion,
    /// When that generation was built.
    pub built_at: Timestamp,
    /// Live records of the generation, ascending by id.
    pub records: Vec<PersistedRecord>,
}

/// Writes the magic and version header.
pub(crate) fn write_header(out: &mut Vec<u8>) {
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
}

/// Reads the format version after checking the magic.
///
/// Returns `None` if the input is too short or the magic is wrong.
pub(crate) fn read_header(bytes: &[u8]) -> Option<u32> {
    if bytes.len() < HEADER_LEN || bytes[..MAGIC.len()] != MAGIC {
        return None;
    }
    let mut version = [0u8; 4];
    version.copy_from_slice(&bytes[MAGIC.len()..HEADER_LEN]);
    Some(u32::from_le_bytes(version))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_round_trip() {
        let mut out = Vec::new();
        write_header(&mut out);
        assert_eq!(out.len(), HEADER_LEN);
        assert_eq!(read_header(&out), Some(FORMAT_VERSION));
    }

    #[test]
    fn test_header_rejects_bad_magic_and_short_input() {
        assert_eq!(read_header(b"NLI"), None);
        assert_eq!(read_header(b"XXXX\x01\x00\x00\x00"), None);
    }
}
