//! Brute-force exact index.
//!
//! Rows are stored contiguously in one `Vec<f32>` (row-major, prepared for
//! the metric) so a query is a single linear pass: O(n·d).

use std::sync::Arc;

use crate::config::Metric;
use crate::error::Result;
use crate::query::MetadataFilter;
use crate::store::VectorRecord;

use super::metric::{prepare_row, rank_key};
use super::topk::{Scored, TopK};
use super::Deadline;

/// Rows between two deadline checks.
const DEADLINE_STRIDE: usize = 1024;

/// Exact top-k over every record of a snapshot.
#[derive(Debug)]
pub struct FlatIndex {
    metric: Metric,
    dimension: usize,
    /// Prepared rows, `records.len() * dimension` values.
    rows: Vec<f32>,
}

impl FlatIndex {
    /// Lays out the rows of `records` (already sorted by id).
    pub(crate) fn build(metric: Metric, dimension: usize, records: &[Arc<VectorRecord>]) -> Self {
        let mut rows = Vec::with_capacity(records.len() * dimension);
        for record in records {
            rows.extend(prepare_row(metric, &record.embedding));
        }
        Self {
            metric,
            dimension,
            rows,
        }
    }

    fn row(&self, slot: usize) -> &[f32] {
        &self.rows[slot * self.dimension..(slot + 1) * self.dimension]
    }

    /// Scans every row; filtered-out rows never enter the top-k, so a
    /// filtered exact search still returns up to `k` matches.
    pub(crate) fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
        records: &[Arc<VectorRecord>],
        deadline: &Deadline,
    ) -> Result<Vec<Scored>> {
        let mut top = TopK::new(k);
        for slot in 0..records.len() {
            if slot % DEADLINE_STRIDE == 0 {
                deadline.check()?;
            }
            if let Some(filter) = filter {
                if !filter.matches(&records[slot].metadata) {
                    continue;
                }
            }
            top.push(rank_key(self.metric, query, self.row(slot)), slot);
        }
        Ok(top.into_sorted())
    }

    /// Prepared row for exact rescoring by other strategies.
    pub(crate) fn prepared_row(&self, slot: usize) -> &[f32] {
        self.row(slot)
    }
}
