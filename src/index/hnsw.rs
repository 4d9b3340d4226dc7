//! Approximate index: HNSW candidate generation plus exact rescoring.
//!
//! Wraps `hnsw_rs::Hnsw<f32, DistL2>` with:
//! - A metric-specific embedding so one L2 graph serves every metric
//! - A [`FlatIndex`] of prepared rows for exact rescoring of candidates
//! - Candidate-set sizing from [`HnswConfig::candidates`]
//!
//! # Graph Embeddings
//!
//! | Metric      | Graph point                          | Graph query   |
//! |-------------|--------------------------------------|---------------|
//! | Cosine      | x / ‖x‖                              | q / ‖q‖       |
//! | Euclidean   | x                                    | q             |
//! | DotProduct  | (x, √(M² − ‖x‖²)), M = max ‖x‖       | (q, 0)        |
//!
//! L2 order on unit vectors is cosine order, and the extra coordinate
//! turns maximum inner product into nearest neighbour (‖q̃ − x̃‖² =
//! ‖q‖² + M² − 2·q·x).
//!
//! # Thread Safety
//!
//! The graph is fully built before the index is published and is only
//! searched afterwards; `hnsw_rs` guards its layers internally, so
//! concurrent searches need no extra locking.

use std::fmt;
use std::sync::Arc;

use anndists::dist::DistL2;
use hnsw_rs::prelude::*;
use tracing::debug;

use crate::config::{HnswConfig, Metric};
use crate::error::Result;
use crate::query::MetadataFilter;
use crate::store::VectorRecord;

use super::exact::FlatIndex;
use super::metric::{norm, rank_key};
use super::topk::{Scored, TopK};
use super::Deadline;

/// HNSW index backed by `hnsw_rs`.
pub struct HnswIndex {
    /// The underlying graph. Uses `'static` lifetime because all data is
    /// heap-owned (not memory-mapped).
    hnsw: Hnsw<'static, f32, DistL2>,

    /// Prepared rows for exact rescoring.
    rows: FlatIndex,

    metric: Metric,

    config: HnswConfig,

    /// Number of points inserted into the graph.
    len: usize,
}

impl fmt::Debug for HnswIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HnswIndex")
            .field("metric", &self.metric)
            .field("config", &self.config)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

impl HnswIndex {
    /// Builds the graph over `records` (sorted by id; slot = graph id).
    pub(crate) fn build(
        metric: Metric,
        dimension: usize,
        config: &HnswConfig,
        records: &[Arc<VectorRecord>],
    ) -> Self {
        let rows = FlatIndex::build(metric, dimension, records);

        let hnsw = Hnsw::new(
            config.max_nb_connection,
            config.max_elements.max(records.len()).max(1),
            config.max_layer,
            config.ef_construction,
            DistL2,
        );

        if !records.is_empty() {
            let points = graph_points(metric, &rows, records.len());
            let batch: Vec<(&Vec<f32>, usize)> =
                points.iter().enumerate().map(|(slot, p)| (p, slot)).collect();

            // Parallel bulk insert (uses rayon internally)
            hnsw.parallel_insert(&batch);
            debug!(points = records.len(), "HNSW graph built");
        }

        Self {
            hnsw,
            rows,
            metric,
            config: *config,
            len: records.len(),
        }
    }

    /// Draws `max(k, candidates)` candidates from the graph, rescores them
    /// exactly, post-filters and keeps the best `k`.
    ///
    /// Filtering happens after candidate generation, so a selective filter
    /// can leave fewer than `k` results even when more matches exist.
    pub(crate) fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
        records: &[Arc<VectorRecord>],
        deadline: &Deadline,
    ) -> Result<Vec<Scored>> {
        if self.len == 0 || k == 0 {
            return Ok(Vec::new());
        }

        let pool = k.max(self.config.candidates).min(self.len);
        let ef = self.config.ef_search.max(pool);
        let graph_query = graph_query(self.metric, query);

        deadline.check()?;
        let neighbours = self.hnsw.search(&graph_query, pool, ef);
        deadline.check()?;

        let mut top = TopK::new(k);
        for n in neighbours {
            let slot = n.d_id;
            if slot >= records.len() {
                continue;
            }
            if let Some(filter) = filter {
                if !filter.matches(&records[slot].metadata) {
                    continue;
                }
            }
            top.push(rank_key(self.metric, query, self.rows.prepared_row(slot)), slot);
        }
        Ok(top.into_sorted())
    }

    /// Number of points in the graph.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the graph has no points.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Tuning parameters the graph was built with.
    pub fn config(&self) -> &HnswConfig {
        &self.config
    }
}

/// Converts prepared rows into graph points for the metric.
fn graph_points(metric: Metric, rows: &FlatIndex, len: usize) -> Vec<Vec<f32>> {
    let prepared = (0..len).map(|slot| rows.prepared_row(slot));
    match metric {
        Metric::Cosine | Metric::Euclidean => prepared.map(<[f32]>::to_vec).collect(),
        Metric::DotProduct => {
            let max_norm = (0..len)
                .map(|slot| norm(rows.prepared_row(slot)))
                .fold(0.0f64, f64::max);
            prepared
                .map(|row| {
                    let n = norm(row);
                    let extra = (max_norm * max_norm - n * n).max(0.0).sqrt();
                    let mut point = Vec::with_capacity(row.len() + 1);
                    point.extend_from_slice(row);
                    point.push(extra as f32);
                    point
                })
                .collect()
        }
    }
}

/// Converts a prepared query into the graph's query space.
fn graph_query(metric: Metric, query: &[f32]) -> Vec<f32> {
    match metric {
        Metric::Cosine | Metric::Euclidean => query.to_vec(),
        Metric::DotProduct => {
            let mut q = Vec::with_capacity(query.len() + 1);
            q.extend_from_slice(query);
            q.push(0.0);
            q
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Metadata;
    use crate::types::{RecordId, StoreVersion};

    fn test_config() -> HnswConfig {
        HnswConfig {
            max_nb_connection: 16,
            ef_construction: 100,
            ef_search: 50,
            max_layer: 8,
            max_elements: 1000,
            candidates: 64,
        }
    }

    /// Generates a deterministic embedding from a seed.
    /// Vectors with close seeds produce similar embeddings.
    fn make_embedding(seed: u64, dim: usize) -> Vec<f32> {
        (0..dim)
            .map(|i| (seed as f32 * 0.1 + i as f32 * 0.01).sin())
            .collect()
    }

    fn records(n: u64, dim: usize) -> Vec<Arc<VectorRecord>> {
        let mut out: Vec<Arc<VectorRecord>> = (0..n)
            .map(|i| {
                Arc::new(VectorRecord {
                    id: RecordId::new(format!("r{:03}", i)),
                    embedding: make_embedding(i, dim),
                    metadata: Metadata::new(),
                    deleted: false,
                    version: StoreVersion(i + 1),
                })
            })
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    #[test]
    fn test_empty_graph_returns_nothing() {
        let index = HnswIndex::build(Metric::Cosine, 4, &test_config(), &[]);
        assert!(index.is_empty());
        let hits = index
            .search(&[1.0, 0.0, 0.0, 0.0], 5, None, &[], &Deadline::none())
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_small_graph_matches_exact_order() {
        let dim = 8;
        let recs = records(20, dim);
        let index = HnswIndex::build(Metric::Euclidean, dim, &test_config(), &recs);
        assert_eq!(index.len(), 20);

        let query = make_embedding(10, dim);
        let hits = index
            .search(&query, 5, None, &recs, &Deadline::none())
            .unwrap();
        assert_eq!(hits.len(), 5);
        assert_eq!(recs[hits[0].slot].id.as_str(), "r010");
        for w in hits.windows(2) {
            assert!(w[0].key >= w[1].key, "Results not sorted by score");
        }

        // Candidate pool covers the whole graph, so the order is exact
        let mut expected: Vec<(f32, usize)> = recs
            .iter()
            .enumerate()
            .map(|(slot, r)| (rank_key(Metric::Euclidean, &query, &r.embedding), slot))
            .collect();
        expected.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
        let expected_slots: Vec<usize> = expected.iter().take(5).map(|e| e.1).collect();
        let got_slots: Vec<usize> = hits.iter().map(|h| h.slot).collect();
        assert_eq!(got_slots, expected_slots);
    }

    #[test]
    fn test_dot_product_augmentation_finds_largest_inner_product() {
        let dim = 2;
        let points = [("a", [1.0f32, 0.0]), ("b", [5.0, 0.1]), ("c", [0.0, 3.0])];
        let recs: Vec<Arc<VectorRecord>> = points
            .into_iter()
            .map(|(id, e)| {
                Arc::new(VectorRecord {
                    id: id.into(),
                    embedding: e.to_vec(),
                    metadata: Metadata::new(),
                    deleted: false,
                    version: StoreVersion(1),
                })
            })
            .collect();
        let index = HnswIndex::build(Metric::DotProduct, dim, &test_config(), &recs);
        let hits = index
            .search(&[1.0, 0.0], 1, None, &recs, &Deadline::none())
            .unwrap();
        assert_eq!(recs[hits[0].slot].id.as_str(), "b");
        assert_eq!(hits[0].key, 5.0);
    }

    #[test]
    fn test_graph_points_dimension() {
        let recs = records(3, 4);
        let rows = FlatIndex::build(Metric::DotProduct, 4, &recs);
        let points = graph_points(Metric::DotProduct, &rows, 3);
        assert!(points.iter().all(|p| p.len() == 5));
        assert_eq!(graph_query(Metric::DotProduct, &[1.0; 4]).len(), 5);
        assert_eq!(graph_query(Metric::Cosine, &[1.0; 4]).len(), 4);
    }
}
