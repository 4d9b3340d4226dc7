//! Active-generation management with atomic swap-in.
//!
//! [`IndexManager`] owns the pointer to the active [`IndexStructure`].
//! Readers load it with a single atomic operation and keep their own
//! `Arc`; a publish replaces the pointer and never waits for readers.
//!
//! ```text
//!  query ──load_full()──► Arc<gen N>  ───────────────► search ─► drop
//!                                 ▲
//!  publish(gen N+1) ──store()─────┘ (gen N retired; freed at last drop)
//! ```
//!
//! Writers (publishers) serialize on a small mutex that also holds the
//! bookkeeping (last refresh time, retired generations, subscribers);
//! readers never touch it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use arc_swap::ArcSwap;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::config::IndexConfig;
use crate::error::{NearlineError, Result, ValidationError};
use crate::index::{IndexStructure, SearchResult};
use crate::query::Query;
use crate::types::{Generation, StoreVersion, Timestamp};

/// Shared handle to a published generation.
///
/// Holding one keeps that generation alive even after a newer one is
/// published.
pub type ActiveGeneration = Arc<IndexStructure>;

/// Observability view of the manager.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IndexStatus {
    /// Generation currently serving queries.
    pub active_generation: Generation,

    /// Store version the active generation was built from.
    pub snapshot_version: StoreVersion,

    /// When the active generation was published; `None` before the first
    /// publish.
    pub last_refresh: Option<Timestamp>,

    /// Records indexed by the active generation.
    pub record_count: usize,
}

/// Sent to subscribers after each successful publish.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishEvent {
    /// Newly active generation.
    pub generation: Generation,

    /// Store version it was built from.
    pub snapshot_version: StoreVersion,

    /// Records it indexes.
    pub record_count: usize,
}

#[derive(Debug, Default)]
struct PublishState {
    last_refresh: Option<Timestamp>,
    retired: Vec<Weak<IndexStructure>>,
    subscribers: Vec<Sender<PublishEvent>>,
}

/// Holds the active index generation and swaps in new ones atomically.
#[derive(Debug)]
pub struct IndexManager {
    dimension: usize,
    active: ArcSwap<IndexStructure>,
    next_generation: AtomicU64,
    state: Mutex<PublishState>,
}

impl IndexManager {
    /// Creates a manager serving the empty generation 0.
    pub fn new(dimension: usize, config: &IndexConfig) -> Self {
        Self {
            dimension,
            active: ArcSwap::from_pointee(IndexStructure::empty(dimension, config)),
            next_generation: AtomicU64::new(Generation::INITIAL.next().0),
            state: Mutex::new(PublishState::default()),
        }
    }

    /// Reserves the next generation number for a build.
    ///
    /// Numbers are handed out in increasing order; a build that fails
    /// simply leaves a gap.
    pub fn allocate_generation(&self) -> Generation {
        Generation(self.next_generation.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the active generation.
    ///
    /// A single atomic load; never blocks on a concurrent publish.
    #[inline]
    pub fn load(&self) -> ActiveGeneration {
        self.active.load_full()
    }

    /// Runs `query` against the generation active at call time.
    ///
    /// The whole query runs against that one generation even if another
    /// is published meanwhile.
    pub fn query(&self, query: &Query) -> Result<Vec<SearchResult>> {
        let generation = self.load();
        generation.search(&query.embedding, query.k, query.filter.as_ref(), query.timeout)
    }

    /// Makes `structure` the active generation.
    ///
    /// The previous generation is retired: it is freed as soon as the last
    /// query holding it finishes.
    ///
    /// # Errors
    ///
    /// - `StaleGeneration` if `structure` is not newer than the active one
    /// - `Validation(DimensionMismatch)` if its dimension differs
    #[instrument(skip(self, structure), fields(generation = %structure.generation()))]
    pub fn publish(&self, structure: IndexStructure) -> Result<()> {
        if structure.dimension() != self.dimension {
            return Err(
                ValidationError::dimension_mismatch(self.dimension, structure.dimension()).into(),
            );
        }

        let mut state = self.lock_state()?;
        let active = self.active.load();
        if structure.generation() <= active.generation() {
            return Err(NearlineError::StaleGeneration {
                offered: structure.generation(),
                active: active.generation(),
            });
        }
        drop(active);

        let event = PublishEvent {
            generation: structure.generation(),
            snapshot_version: structure.snapshot_version(),
            record_count: structure.len(),
        };

        let previous = self.active.swap(Arc::new(structure));
        state.retired.push(Arc::downgrade(&previous));
        drop(previous);
        state.retired.retain(|weak| weak.strong_count() > 0);
        state.last_refresh = Some(Timestamp::now());

        state.subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("Dropping slow publish subscriber");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        });

        info!(
            generation = %event.generation,
            snapshot_version = %event.snapshot_version,
            records = event.record_count,
            "Published index generation"
        );
        Ok(())
    }

    /// Current generation, snapshot version and last refresh time.
    pub fn status(&self) -> Result<IndexStatus> {
        let state = self.lock_state()?;
        let active = self.active.load();
        Ok(IndexStatus {
            active_generation: active.generation(),
            snapshot_version: active.snapshot_version(),
            last_refresh: state.last_refresh,
            record_count: active.len(),
        })
    }

    /// Number of retired generations still held by in-flight queries.
    pub fn retired_in_flight(&self) -> Result<usize> {
        let mut state = self.lock_state()?;
        state.retired.retain(|weak| weak.strong_count() > 0);
        Ok(state.retired.len())
    }

    /// Subscribes to publish events.
    ///
    /// The channel holds up to `capacity` events; a subscriber that falls
    /// behind or hangs up is dropped, never blocking a publish.
    pub fn subscribe(&self, capacity: usize) -> Result<Receiver<PublishEvent>> {
        let (tx, rx) = bounded(capacity.max(1));
        self.lock_state()?.subscribers.push(tx);
        Ok(rx)
    }

    /// Embedding dimension every published generation must have.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, PublishState>> {
        self.state
            .lock()
            .map_err(|_| NearlineError::internal("Index manager state lock poisoned"))
    }
}
