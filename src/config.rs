//! Configuration types for Nearline.
//!
//! The [`Config`] struct controls engine behavior including:
//! - Embedding dimension (384, 768, or custom)
//! - Similarity metric and exact/approximate index strategy
//! - Refresh cadence and staleness threshold
//! - Artifact location and what to do when it is corrupt
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use nearline::{Config, EmbeddingDimension, IndexConfig, IndexKind, HnswConfig, Metric};
//!
//! // Use defaults (768 dimensions, cosine, exact search)
//! let config = Config::default();
//!
//! // Approximate search over 384-dimensional embeddings
//! let config = Config {
//!     embedding_dimension: EmbeddingDimension::D384,
//!     index: IndexConfig {
//!         metric: Metric::Cosine,
//!         kind: IndexKind::Approximate(HnswConfig::default()),
//!     },
//!     default_timeout: Some(Duration::from_millis(250)),
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Largest supported embedding dimension.
pub const MAX_DIMENSION: usize = 4096;

/// Highest HNSW layer count supported by `hnsw_rs`.
pub const MAX_HNSW_LAYERS: usize = 16;

/// Engine configuration options.
///
/// All fields have sensible defaults. Use struct update syntax to override
/// specific settings:
///
/// ```rust
/// use nearline::Config;
///
/// let config = Config {
///     max_k: 50,
///     ..Default::default()
/// };
/// ```
#[derive(Clone, Debug)]
pub struct Config {
    /// Embedding vector dimension; every record and query must match it.
    pub embedding_dimension: EmbeddingDimension,

    /// Metric and exact/approximate strategy for built indexes.
    pub index: IndexConfig,

    /// When the background scheduler rebuilds the index.
    pub refresh: RefreshConfig,

    /// Index artifact loaded at startup and written by `save()`.
    ///
    /// `None` keeps the engine purely in memory.
    pub artifact_path: Option<PathBuf>,

    /// What `Engine::open` does when the artifact fails validation.
    pub startup_policy: StartupPolicy,

    /// Budget applied to queries that do not carry their own timeout.
    pub default_timeout: Option<Duration>,

    /// Upper bound on the `k` a query may request.
    ///
    /// Default: 1000
    pub max_k: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // 768 matches all-mpnet-base-v2
            embedding_dimension: EmbeddingDimension::D768,
            index: IndexConfig::default(),
            refresh: RefreshConfig::default(),
            artifact_path: None,
            startup_policy: StartupPolicy::StartEmpty,
            default_timeout: None,
            max_k: 1000,
        }
    }
}

impl Config {
    /// Creates a new Config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an in-memory Config for the given dimension and metric.
    ///
    /// # Example
    /// ```rust
    /// use nearline::{Config, EmbeddingDimension, Metric};
    ///
    /// let config = Config::in_memory(EmbeddingDimension::Custom(2), Metric::Cosine);
    /// assert_eq!(config.dimension(), 2);
    /// ```
    pub fn in_memory(dimension: EmbeddingDimension, metric: Metric) -> Self {
        Self {
            embedding_dimension: dimension,
            index: IndexConfig {
                metric,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Validates the configuration.
    ///
    /// Called automatically by `Engine::open()`.
    ///
    /// # Errors
    /// Returns `ValidationError` if:
    /// - Custom dimension is 0 or > 4096
    /// - `max_k` is 0
    /// - HNSW parameters are out of range
    /// - Refresh interval or staleness threshold is zero
    /// - `persist_on_publish` is set without an `artifact_path`
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let EmbeddingDimension::Custom(dim) = self.embedding_dimension {
            if dim == 0 {
                return Err(ValidationError::invalid_field(
                    "embedding_dimension",
                    "custom dimension must be greater than 0",
                ));
            }
            if dim > MAX_DIMENSION {
                return Err(ValidationError::invalid_field(
                    "embedding_dimension",
                    format!("custom dimension must not exceed {}", MAX_DIMENSION),
                ));
            }
        }

        if self.max_k == 0 {
            return Err(ValidationError::invalid_field(
                "max_k",
                "must be greater than 0",
            ));
        }

        self.index.validate()?;
        self.refresh.validate()?;

        if self.refresh.persist_on_publish && self.artifact_path.is_none() {
            return Err(ValidationError::invalid_field(
                "refresh.persist_on_publish",
                "requires artifact_path to be set",
            ));
        }

        if let Some(timeout) = self.default_timeout {
            if timeout.is_zero() {
                return Err(ValidationError::invalid_field(
                    "default_timeout",
                    "must be greater than zero",
                ));
            }
        }

        Ok(())
    }

    /// Returns the embedding dimension as a numeric value.
    pub fn dimension(&self) -> usize {
        self.embedding_dimension.size()
    }
}

/// Embedding vector dimensions.
///
/// Standard dimensions are provided for common models. Use `Custom` for
/// other embedding services.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmbeddingDimension {
    /// 384 dimensions (all-MiniLM-L6-v2).
    D384,

    /// 768 dimensions (all-mpnet-base-v2, BERT-base).
    #[default]
    D768,

    /// Custom dimension for other embedding models.
    ///
    /// Must be between 1 and 4096.
    Custom(usize),
}

impl EmbeddingDimension {
    /// Returns the numeric size of this dimension.
    ///
    /// # Example
    /// ```rust
    /// use nearline::EmbeddingDimension;
    ///
    /// assert_eq!(EmbeddingDimension::D384.size(), 384);
    /// assert_eq!(EmbeddingDimension::D768.size(), 768);
    /// assert_eq!(EmbeddingDimension::Custom(1536).size(), 1536);
    /// ```
    #[inline]
    pub const fn size(&self) -> usize {
        match self {
            Self::D384 => 384,
            Self::D768 => 768,
            Self::Custom(n) => *n,
        }
    }

    /// Maps a numeric size back onto the named variants where possible.
    pub const fn from_size(size: usize) -> Self {
        match size {
            384 => Self::D384,
            768 => Self::D768,
            n => Self::Custom(n),
        }
    }
}

/// Similarity metric used for ranking.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Metric {
    /// Cosine similarity in `[-1, 1]`; higher is closer.
    #[default]
    Cosine,

    /// Euclidean (L2) distance; the reported score is the negated distance.
    Euclidean,

    /// Raw inner product; higher is closer.
    DotProduct,
}

impl Metric {
    /// Returns true if embeddings are unit-normalized before comparison.
    #[inline]
    pub const fn normalizes(&self) -> bool {
        matches!(self, Self::Cosine)
    }

    /// Short lowercase name used in logs.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::Euclidean => "euclidean",
            Self::DotProduct => "dot",
        }
    }
}

/// Metric plus search strategy for built index structures.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Similarity metric.
    pub metric: Metric,

    /// Exact brute-force scan or approximate graph search.
    pub kind: IndexKind,
}

impl IndexConfig {
    /// Validates strategy-specific parameters.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match &self.kind {
            IndexKind::Exact => Ok(()),
            IndexKind::Approximate(hnsw) => hnsw.validate(),
        }
    }
}

/// Search strategy of an index structure.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum IndexKind {
    /// Brute-force scan; guarantees the true top-k.
    #[default]
    Exact,

    /// HNSW graph candidate generation followed by exact rescoring.
    ///
    /// Recall is tunable through [`HnswConfig`], not guaranteed.
    Approximate(HnswConfig),
}

impl IndexKind {
    /// Returns true for the exact strategy.
    pub fn is_exact(&self) -> bool {
        matches!(self, Self::Exact)
    }
}

/// HNSW tuning parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HnswConfig {
    /// Maximum links per node (M). Default: 16
    pub max_nb_connection: usize,

    /// Candidate list size while inserting. Default: 200
    pub ef_construction: usize,

    /// Candidate list size while searching. Default: 64
    pub ef_search: usize,

    /// Number of graph layers (at most 16). Default: 16
    pub max_layer: usize,

    /// Capacity hint for the graph; grown to the snapshot size when smaller.
    pub max_elements: usize,

    /// Size of the candidate set drawn from the graph before exact
    /// rescoring and filtering. Queries use `max(k, candidates)`.
    pub candidates: usize,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            max_nb_connection: 16,
            ef_construction: 200,
            ef_search: 64,
            max_layer: MAX_HNSW_LAYERS,
            max_elements: 10_000,
            candidates: 100,
        }
    }
}

impl HnswConfig {
    /// Validates HNSW parameter ranges.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_nb_connection == 0 || self.max_nb_connection > 256 {
            return Err(ValidationError::invalid_field(
                "hnsw.max_nb_connection",
                "must be between 1 and 256",
            ));
        }
        if self.ef_construction == 0 {
            return Err(ValidationError::invalid_field(
                "hnsw.ef_construction",
                "must be greater than 0",
            ));
        }
        if self.ef_search == 0 {
            return Err(ValidationError::invalid_field(
                "hnsw.ef_search",
                "must be greater than 0",
            ));
        }
        if self.max_layer == 0 || self.max_layer > MAX_HNSW_LAYERS {
            return Err(ValidationError::invalid_field(
                "hnsw.max_layer",
                format!("must be between 1 and {}", MAX_HNSW_LAYERS),
            ));
        }
        if self.candidates == 0 {
            return Err(ValidationError::invalid_field(
                "hnsw.candidates",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Background refresh triggers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefreshConfig {
    /// Rebuild on this cadence when the store has changed. `None` disables
    /// time-based refresh.
    pub interval: Option<Duration>,

    /// Rebuild once this many mutations accumulated since the active
    /// snapshot. `None` disables staleness-based refresh.
    pub staleness_threshold: Option<u64>,

    /// Write the artifact after every successful publish.
    pub persist_on_publish: bool,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval: None,
            staleness_threshold: Some(1000),
            persist_on_publish: false,
        }
    }
}

impl RefreshConfig {
    /// Validates trigger settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.interval.is_some_and(|i| i.is_zero()) {
            return Err(ValidationError::invalid_field(
                "refresh.interval",
                "must be greater than zero",
            ));
        }
        if self.staleness_threshold == Some(0) {
            return Err(ValidationError::invalid_field(
                "refresh.staleness_threshold",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Startup behavior when the artifact exists but fails validation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StartupPolicy {
    /// Return the `Corrupt` error from `Engine::open`.
    Fail,

    /// Start with an empty index and report degraded health.
    #[default]
    StartEmpty,
}
