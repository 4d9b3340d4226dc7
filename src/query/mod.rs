//! Query validation and dispatch.
//!
//! [`QueryEngine`] is the fail-fast layer in front of the
//! [`IndexManager`]: a query is fully validated before it touches the
//! index, normalized once, then answered by the generation that is active
//! when the query starts.

mod filter;
mod parse;

pub use filter::{CompareOp, MetadataFilter, MAX_FILTER_DEPTH};

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument};

use crate::error::{NearlineError, Result, ValidationError};
use crate::index::{prepare_query, Deadline, SearchResult};
use crate::manager::IndexManager;

/// A similarity query.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use nearline::{MetadataFilter, Query};
///
/// let query = Query::new(vec![1.0, 0.0], 5)
///     .with_filter(MetadataFilter::eq("category", "sales"))
///     .with_timeout(Duration::from_millis(50));
/// assert_eq!(query.k, 5);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    /// Query embedding; must match the index dimension.
    pub embedding: Vec<f32>,

    /// Number of neighbours requested (at least 1).
    pub k: usize,

    /// Optional metadata post-filter.
    pub filter: Option<MetadataFilter>,

    /// Optional budget; overrides the engine default.
    pub timeout: Option<Duration>,
}

impl Query {
    /// Creates an unfiltered query without a timeout.
    pub fn new(embedding: Vec<f32>, k: usize) -> Self {
        Self {
            embedding,
            k,
            filter: None,
            timeout: None,
        }
    }

    /// Sets the metadata filter.
    pub fn with_filter(mut self, filter: MetadataFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Sets the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Validates queries and answers them from the active generation.
#[derive(Debug)]
pub struct QueryEngine {
    manager: Arc<IndexManager>,
    max_k: usize,
    default_timeout: Option<Duration>,
}

impl QueryEngine {
    /// Creates an engine over `manager`.
    pub fn new(
        manager: Arc<IndexManager>,
        max_k: usize,
        default_timeout: Option<Duration>,
    ) -> Self {
        Self {
            manager,
            max_k,
            default_timeout,
        }
    }

    /// Runs a query.
    ///
    /// # Errors
    ///
    /// - `Validation(DimensionMismatch)` for a wrong-length embedding
    /// - `InvalidQuery` for `k == 0`, `k > max_k`, non-finite values, a
    ///   zero-norm cosine query or a malformed filter
    /// - `Timeout` if the budget runs out; shared state is untouched
    #[instrument(skip(self, query), fields(k = query.k, filtered = query.filter.is_some()))]
    pub fn search(&self, query: &Query) -> Result<Vec<SearchResult>> {
        let deadline = Deadline::new(query.timeout.or(self.default_timeout));
        self.validate(query)?;

        let generation = self.manager.load();
        let prepared =
            prepare_query(generation.metric(), generation.dimension(), &query.embedding)?;
        let results =
            generation.search_prepared(&prepared, query.k, query.filter.as_ref(), &deadline)?;

        debug!(
            generation = %generation.generation(),
            returned = results.len(),
            "Query answered"
        );
        Ok(results)
    }

    /// Checks everything that does not need the index.
    pub fn validate(&self, query: &Query) -> Result<()> {
        let dimension = self.manager.dimension();
        if query.embedding.len() != dimension {
            return Err(
                ValidationError::dimension_mismatch(dimension, query.embedding.len()).into(),
            );
        }
        if query.k == 0 {
            return Err(NearlineError::invalid_query("k must be at least 1"));
        }
        if query.k > self.max_k {
            return Err(NearlineError::invalid_query(format!(
                "k = {} exceeds the maximum of {}",
                query.k, self.max_k
            )));
        }
        if query.embedding.iter().any(|v| !v.is_finite()) {
            return Err(NearlineError::invalid_query(
                "query embedding contains non-finite values",
            ));
        }
        if let Some(filter) = &query.filter {
            filter.validate()?;
        }
        Ok(())
    }

    /// The manager this engine reads from.
    pub fn manager(&self) -> &Arc<IndexManager> {
        &self.manager
    }
}
