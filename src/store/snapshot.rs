//! Point-in-time views of the vector store.

use std::sync::Arc;

use crate::types::{StoreVersion, Timestamp};

use super::VectorRecord;

/// Immutable view of all live records at one store version.
///
/// Taking a snapshot copies record handles, not vectors: each entry is an
/// `Arc` to a record value that the store never mutates in place. Writes
/// after the snapshot install new values in the store and leave this view
/// untouched.
#[derive(Clone, Debug)]
pub struct Snapshot {
    version: StoreVersion,
    dimension: usize,
    taken_at: Timestamp,
    records: Arc<[Arc<VectorRecord>]>,
}

impl Snapshot {
    pub(crate) fn new(
        version: StoreVersion,
        dimension: usize,
        records: Vec<Arc<VectorRecord>>,
    ) -> Self {
        Self {
            version,
            dimension,
            taken_at: Timestamp::now(),
            records: records.into(),
        }
    }

    /// Store version this snapshot reflects.
    #[inline]
    pub fn version(&self) -> StoreVersion {
        self.version
    }

    /// Embedding dimension of every record.
    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// When the snapshot was taken.
    #[inline]
    pub fn taken_at(&self) -> Timestamp {
        self.taken_at
    }

    /// Live records, in store order.
    #[inline]
    pub fn records(&self) -> &[Arc<VectorRecord>] {
        &self.records
    }

    /// Number of live records.
    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the snapshot holds no records.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
