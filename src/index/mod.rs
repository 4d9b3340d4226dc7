//! Immutable index structures built from store snapshots.
//!
//! An [`IndexStructure`] is one *generation*: built once from a
//! [`Snapshot`], never mutated, shared across reader threads behind an
//! `Arc`, and dropped when the last query holding it finishes.
//!
//! # Architecture
//!
//! ```text
//! Snapshot ──build()──► IndexStructure { generation, snapshot_version, records }
//!                               │
//!                               ├── SearchStrategy::Exact(FlatIndex)
//!                               │       linear scan, true top-k
//!                               │
//!                               └── SearchStrategy::Approximate(HnswIndex)
//!                                       graph candidates → exact rescore
//! ```
//!
//! Records are laid out in ascending id order, so the slot tie-break of
//! the top-k selection orders equal scores by ascending id.

mod exact;
mod hnsw;
mod metric;
mod topk;

pub use exact::FlatIndex;
pub use hnsw::HnswIndex;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, instrument};

use crate::config::{IndexConfig, IndexKind, Metric};
use crate::error::{NearlineError, Result, ValidationError};
use crate::query::MetadataFilter;
use crate::store::{Metadata, Snapshot, VectorRecord};
use crate::types::{Generation, RecordId, StoreVersion, Timestamp};

use metric::normalized;
use topk::Scored;

/// One entry of a result set.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SearchResult {
    /// Record id.
    pub id: RecordId,

    /// Similarity score; higher is closer for every metric.
    pub score: f32,

    /// Record metadata as of the generation's snapshot.
    pub metadata: Metadata,
}

/// Wall-clock budget for one query.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Deadline {
    start: Instant,
    budget: Option<Duration>,
}

impl Deadline {
    pub(crate) fn new(budget: Option<Duration>) -> Self {
        Self {
            start: Instant::now(),
            budget,
        }
    }

    #[cfg(test)]
    pub(crate) fn none() -> Self {
        Self::new(None)
    }

    /// Fails with `Timeout` once the budget is spent.
    #[inline]
    pub(crate) fn check(&self) -> Result<()> {
        match self.budget {
            Some(budget) if self.start.elapsed() >= budget => Err(NearlineError::timeout(budget)),
            _ => Ok(()),
        }
    }
}

/// Validates a query embedding and converts it into the layout the metric
/// scores against. Normalization happens here, once per query.
pub(crate) fn prepare_query(
    metric: Metric,
    dimension: usize,
    embedding: &[f32],
) -> Result<Vec<f32>> {
    if embedding.len() != dimension {
        return Err(ValidationError::dimension_mismatch(dimension, embedding.len()).into());
    }
    if embedding.iter().any(|v| !v.is_finite()) {
        return Err(NearlineError::invalid_query(
            "query embedding contains non-finite values",
        ));
    }
    if metric.normalizes() {
        normalized(embedding).ok_or_else(|| {
            NearlineError::invalid_query("zero-norm query embedding under cosine metric")
        })
    } else {
        Ok(embedding.to_vec())
    }
}

/// Search strategy of a built generation.
#[derive(Debug)]
pub enum SearchStrategy {
    /// Brute-force scan.
    Exact(FlatIndex),
    /// HNSW candidates plus exact rescoring.
    Approximate(HnswIndex),
}

/// One immutable, queryable generation of the index.
///
/// # Example
///
/// ```rust
/// use nearline::{IndexConfig, Generation, NewRecord, VectorStore, IndexStructure};
///
/// let store = VectorStore::new(2);
/// store.insert(NewRecord::new("a", vec![1.0, 0.0])).unwrap();
/// let snapshot = store.snapshot().unwrap();
///
/// let index = IndexStructure::build(&snapshot, &IndexConfig::default(), Generation(1)).unwrap();
/// let hits = index.search(&[1.0, 0.0], 1, None, None).unwrap();
/// assert_eq!(hits[0].id.as_str(), "a");
/// ```
#[derive(Debug)]
pub struct IndexStructure {
    generation: Generation,
    snapshot_version: StoreVersion,
    built_at: Timestamp,
    config: IndexConfig,
    dimension: usize,
    /// Live records of the snapshot, ascending by id.
    records: Vec<Arc<VectorRecord>>,
    strategy: SearchStrategy,
}

impl IndexStructure {
    /// Builds a generation over every record of `snapshot`.
    ///
    /// # Errors
    ///
    /// - `Validation` if the config is invalid
    /// - `BuildFailure` if a snapshot record does not match the snapshot
    ///   dimension
    #[instrument(
        skip(snapshot, config),
        fields(records = snapshot.len(), version = %snapshot.version())
    )]
    pub fn build(
        snapshot: &Snapshot,
        config: &IndexConfig,
        generation: Generation,
    ) -> Result<Self> {
        config.validate()?;
        let dimension = snapshot.dimension();

        let mut records: Vec<Arc<VectorRecord>> = snapshot.records().to_vec();
        if let Some(bad) = records.iter().find(|r| r.embedding.len() != dimension) {
            return Err(NearlineError::build_failure(format!(
                "record {} has dimension {}, expected {}",
                bad.id,
                bad.embedding.len(),
                dimension
            )));
        }
        records.sort_by(|a, b| a.id.cmp(&b.id));

        let strategy = Self::build_strategy(config, dimension, &records);
        debug!(generation = %generation, exact = config.kind.is_exact(), "Index structure built");

        Ok(Self {
            generation,
            snapshot_version: snapshot.version(),
            built_at: Timestamp::now(),
            config: *config,
            dimension,
            records,
            strategy,
        })
    }

    /// The empty generation 0 a manager starts with.
    pub fn empty(dimension: usize, config: &IndexConfig) -> Self {
        Self {
            generation: Generation::INITIAL,
            snapshot_version: StoreVersion::default(),
            built_at: Timestamp::now(),
            config: *config,
            dimension,
            records: Vec::new(),
            strategy: Self::build_strategy(config, dimension, &[]),
        }
    }

    fn build_strategy(
        config: &IndexConfig,
        dimension: usize,
        records: &[Arc<VectorRecord>],
    ) -> SearchStrategy {
        match &config.kind {
            IndexKind::Exact => {
                SearchStrategy::Exact(FlatIndex::build(config.metric, dimension, records))
            }
            IndexKind::Approximate(hnsw) => SearchStrategy::Approximate(HnswIndex::build(
                config.metric,
                dimension,
                hnsw,
                records,
            )),
        }
    }

    /// Top-`k` records for `embedding`, best first, ties by ascending id.
    ///
    /// `k == 0` and an empty structure yield an empty result; a query of
    /// the wrong length is still rejected on an empty structure. The filter is
    /// a post-filter: in approximate mode it may leave fewer than `k`
    /// results even when more records match.
    ///
    /// # Errors
    ///
    /// - `Validation(DimensionMismatch)` for a query of the wrong length
    /// - `InvalidQuery` for non-finite values or a zero-norm cosine query
    /// - `Timeout` once `timeout` elapses
    pub fn search(
        &self,
        embedding: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
        timeout: Option<Duration>,
    ) -> Result<Vec<SearchResult>> {
        let deadline = Deadline::new(timeout);
        if k == 0 {
            return Ok(Vec::new());
        }
        let query = prepare_query(self.config.metric, self.dimension, embedding)?;
        self.search_prepared(&query, k, filter, &deadline)
    }

    /// Search with a query already validated and prepared for the metric.
    pub(crate) fn search_prepared(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
        deadline: &Deadline,
    ) -> Result<Vec<SearchResult>> {
        if k == 0 || self.records.is_empty() {
            return Ok(Vec::new());
        }
        let hits = match &self.strategy {
            SearchStrategy::Exact(flat) => flat.search(query, k, filter, &self.records, deadline)?,
            SearchStrategy::Approximate(graph) => {
                graph.search(query, k, filter, &self.records, deadline)?
            }
        };
        Ok(self.materialize(hits))
    }

    fn materialize(&self, hits: Vec<Scored>) -> Vec<SearchResult> {
        hits.into_iter()
            .map(|hit| {
                let record = &self.records[hit.slot];
                SearchResult {
                    id: record.id.clone(),
                    score: hit.key,
                    metadata: record.metadata.clone(),
                }
            })
            .collect()
    }

    /// Generation number.
    #[inline]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Store version of the snapshot this generation was built from.
    #[inline]
    pub fn snapshot_version(&self) -> StoreVersion {
        self.snapshot_version
    }

    /// When the build finished.
    #[inline]
    pub fn built_at(&self) -> Timestamp {
        self.built_at
    }

    /// Metric and strategy.
    #[inline]
    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Metric used for ranking.
    #[inline]
    pub fn metric(&self) -> Metric {
        self.config.metric
    }

    /// Embedding dimension.
    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Records indexed by this generation, ascending by id.
    pub fn records(&self) -> &[Arc<VectorRecord>] {
        &self.records
    }

    /// Number of indexed records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The exact or approximate strategy.
    pub fn strategy(&self) -> &SearchStrategy {
        &self.strategy
    }
}
