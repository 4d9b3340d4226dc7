//! Vector store: the source of truth for records.
//!
//! The store owns every [`VectorRecord`] plus an id → slot index. It is
//! append-only with tombstone deletes; physical removal happens only in
//! [`VectorStore::compact`], which the refresh scheduler calls after a
//! generation built without the tombstoned records has been published.
//!
//! # Concurrency
//!
//! ```text
//!   insert / update / soft_delete ──► write lock (one writer at a time)
//!   snapshot / get / len          ──► read lock (copies Arc handles only)
//! ```
//!
//! Records are immutable values behind `Arc`. A mutation swaps the slot's
//! `Arc` and never touches a value a snapshot may hold, so the write lock
//! is held only for a slot assignment and a snapshot only for cloning
//! handles.

mod snapshot;
mod types;

pub use snapshot::Snapshot;
pub use types::{Metadata, MetadataValue, NewRecord, VectorRecord};

pub(crate) use types::{validate_embedding, validate_metadata};

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, instrument};

use crate::error::{NearlineError, NotFoundError, Result, ValidationError};
use crate::types::{RecordId, StoreVersion};

/// Append-only record store with tombstone deletes and versioned snapshots.
#[derive(Debug)]
pub struct VectorStore {
    /// Fixed embedding length for every record.
    dimension: usize,

    /// Records, slot index and version counter.
    state: RwLock<StoreState>,
}

#[derive(Debug, Default)]
struct StoreState {
    /// Physical slots, live and tombstoned.
    records: Vec<Arc<VectorRecord>>,

    /// id → slot in `records`.
    positions: HashMap<RecordId, usize>,

    /// Bumped by every successful mutation.
    version: StoreVersion,

    /// Count of non-tombstoned slots.
    live: usize,
}

impl StoreState {
    fn bump(&mut self) -> StoreVersion {
        self.version = StoreVersion(self.version.0 + 1);
        self.version
    }

    fn live_slot(&self, id: &RecordId) -> Option<usize> {
        self.positions
            .get(id)
            .copied()
            .filter(|&slot| !self.records[slot].deleted)
    }

    fn put(&mut self, record: NewRecord) {
        let version = self.bump();
        let stored = Arc::new(VectorRecord {
            id: record.id,
            embedding: record.embedding,
            metadata: record.metadata,
            deleted: false,
            version,
        });
        match self.positions.get(&stored.id).copied() {
            // Reviving a tombstoned id reuses its slot
            Some(slot) => self.records[slot] = stored,
            None => {
                self.positions.insert(stored.id.clone(), self.records.len());
                self.records.push(stored);
            }
        }
        self.live += 1;
    }
}

impl VectorStore {
    /// Creates an empty store for embeddings of the given dimension.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            state: RwLock::new(StoreState::default()),
        }
    }

    /// Creates a store pre-populated with live records at a given version.
    ///
    /// Used when restoring from a persisted artifact. Records are validated
    /// by the caller; every restored record is tagged with `version`.
    pub(crate) fn restore(
        dimension: usize,
        records: Vec<(RecordId, Vec<f32>, Metadata)>,
        version: StoreVersion,
    ) -> Self {
        let mut state = StoreState {
            version,
            ..Default::default()
        };
        for (id, embedding, metadata) in records {
            state.positions.insert(id.clone(), state.records.len());
            state.records.push(Arc::new(VectorRecord {
                id,
                embedding,
                metadata,
                deleted: false,
                version,
            }));
            state.live += 1;
        }
        Self {
            dimension,
            state: RwLock::new(state),
        }
    }

    /// Embedding dimension enforced on every insert and update.
    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreState>> {
        self.state
            .read()
            .map_err(|_| NearlineError::internal("Vector store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreState>> {
        self.state
            .write()
            .map_err(|_| NearlineError::internal("Vector store lock poisoned"))
    }

    /// Inserts a new record.
    ///
    /// # Errors
    ///
    /// - `DimensionMismatch` if the embedding length differs from the store
    ///   dimension (the store is left untouched)
    /// - `DuplicateId` if a live record already uses `id`; use
    ///   [`update`](Self::update) to replace it
    #[instrument(skip(self, record), fields(id = %record.id))]
    pub fn insert(&self, record: NewRecord) -> Result<StoreVersion> {
        self.validate(&record)?;

        let mut state = self.write()?;
        if state.live_slot(&record.id).is_some() {
            return Err(NearlineError::duplicate_id(&record.id));
        }
        state.put(record);
        debug!(version = %state.version, "Record inserted");
        Ok(state.version)
    }

    /// Inserts many records atomically.
    ///
    /// Either every record is inserted or, on the first invalid record or
    /// id collision (including collisions within the batch), none is.
    #[instrument(skip(self, records), fields(count = records.len()))]
    pub fn insert_batch(&self, records: Vec<NewRecord>) -> Result<StoreVersion> {
        for record in &records {
            self.validate(record)?;
        }

        let mut state = self.write()?;
        let mut seen = HashSet::with_capacity(records.len());
        for record in &records {
            if !seen.insert(&record.id) || state.live_slot(&record.id).is_some() {
                return Err(NearlineError::duplicate_id(&record.id));
            }
        }
        for record in records {
            state.put(record);
        }
        debug!(version = %state.version, "Batch inserted");
        Ok(state.version)
    }

    /// Replaces embedding and metadata of a live record.
    ///
    /// # Errors
    ///
    /// - `DimensionMismatch` for a wrong-length embedding
    /// - `NotFound` if `id` is unknown or tombstoned
    #[instrument(skip(self, embedding, metadata), fields(id = %id))]
    pub fn update(
        &self,
        id: &RecordId,
        embedding: Vec<f32>,
        metadata: Metadata,
    ) -> Result<StoreVersion> {
        validate_embedding(&embedding, self.dimension)?;
        validate_metadata(&metadata)?;

        let mut state = self.write()?;
        let slot = state
            .live_slot(id)
            .ok_or_else(|| NotFoundError::record(id))?;
        let version = state.bump();
        state.records[slot] = Arc::new(VectorRecord {
            id: id.clone(),
            embedding,
            metadata,
            deleted: false,
            version,
        });
        debug!(version = %version, "Record updated");
        Ok(version)
    }

    /// Tombstones a live record.
    ///
    /// The record stays physically present until [`compact`](Self::compact)
    /// runs past this version.
    ///
    /// # Errors
    ///
    /// `NotFound` if `id` is unknown or already tombstoned.
    #[instrument(skip(self), fields(id = %id))]
    pub fn soft_delete(&self, id: &RecordId) -> Result<StoreVersion> {
        let mut state = self.write()?;
        let slot = state
            .live_slot(id)
            .ok_or_else(|| NotFoundError::record(id))?;
        let version = state.bump();
        let tombstone = VectorRecord {
            deleted: true,
            version,
            ..VectorRecord::clone(&state.records[slot])
        };
        state.records[slot] = Arc::new(tombstone);
        state.live -= 1;
        debug!(version = %version, "Record tombstoned");
        Ok(version)
    }

    /// Returns the live record with the given id.
    pub fn get(&self, id: &RecordId) -> Result<Option<Arc<VectorRecord>>> {
        let state = self.read()?;
        Ok(state.live_slot(id).map(|slot| Arc::clone(&state.records[slot])))
    }

    /// Takes a consistent view of all live records at the current version.
    pub fn snapshot(&self) -> Result<Snapshot> {
        let state = self.read()?;
        let records: Vec<Arc<VectorRecord>> = state
            .records
            .iter()
            .filter(|r| !r.deleted)
            .cloned()
            .collect();
        Ok(Snapshot::new(state.version, self.dimension, records))
    }

    /// Physically removes tombstones created at or before `up_to`.
    ///
    /// Called once a generation built from a snapshot at `up_to` is active:
    /// such a snapshot already excluded these records. Compaction is not a
    /// logical mutation and leaves the version unchanged.
    ///
    /// Returns the number of slots removed.
    #[instrument(skip(self))]
    pub fn compact(&self, up_to: StoreVersion) -> Result<usize> {
        let mut state = self.write()?;
        let before = state.records.len();
        state
            .records
            .retain(|r| !(r.deleted && r.version <= up_to));
        let removed = before - state.records.len();
        if removed > 0 {
            let positions = state
                .records
                .iter()
                .enumerate()
                .map(|(slot, r)| (r.id.clone(), slot))
                .collect();
            state.positions = positions;
            debug!(removed, "Compacted tombstones");
        }
        Ok(removed)
    }

    /// Current store version.
    pub fn version(&self) -> Result<StoreVersion> {
        Ok(self.read()?.version)
    }

    /// Number of live records.
    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.live)
    }

    /// Returns true if the store has no live records.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Number of tombstoned records still physically present.
    pub fn tombstones(&self) -> Result<usize> {
        let state = self.read()?;
        Ok(state.records.len() - state.live)
    }

    fn validate(&self, record: &NewRecord) -> Result<()> {
        if record.id.is_empty() {
            return Err(ValidationError::required_field("id").into());
        }
        validate_embedding(&record.embedding, self.dimension)?;
        validate_metadata(&record.metadata)?;
        Ok(())
    }
}
