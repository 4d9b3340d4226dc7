//! # Nearline
//!
//! Vector index query engine: serves nearest-neighbour queries from an
//! immutable index generation while new generations are rebuilt in the
//! background and swapped in atomically.
//!
//! ## Quick Start
//!
//! ```rust
//! use nearline::{Config, EmbeddingDimension, Engine, Metric, MetadataFilter, NewRecord};
//!
//! let config = Config::in_memory(EmbeddingDimension::Custom(2), Metric::Cosine);
//! let engine = Engine::open(config).unwrap();
//!
//! engine.insert(NewRecord::new("A", vec![1.0, 0.0]).with_metadata("category", "sales")).unwrap();
//! engine.insert(NewRecord::new("B", vec![0.0, 1.0]).with_metadata("category", "tech")).unwrap();
//! engine.insert(NewRecord::new("C", vec![0.9, 0.1]).with_metadata("category", "sales")).unwrap();
//!
//! // Build and publish a generation
//! engine.refresh_now().unwrap();
//!
//! let hits = engine.search(&[1.0, 0.0], 2, None, None).unwrap();
//! assert_eq!(hits[0].id.as_str(), "A");
//! assert_eq!(hits[1].id.as_str(), "C");
//!
//! let filter = MetadataFilter::parse(r#"category = "tech""#).unwrap();
//! let hits = engine.search(&[1.0, 0.0], 2, Some(filter), None).unwrap();
//! assert_eq!(hits[0].id.as_str(), "B");
//! ```
//!
//! ## Key Concepts
//!
//! ### Generation
//!
//! A **generation** is one immutable [`IndexStructure`] built from a
//! versioned [`Snapshot`] of the [`VectorStore`]. Queries always run
//! against exactly one generation; a newer one replaces it with a single
//! atomic pointer swap.
//!
//! ### Staleness Window
//!
//! Inserts, updates and deletes land in the store immediately but become
//! visible to queries only once a generation built after them is
//! published. Rebuilds are triggered explicitly, on an interval, or once
//! the store has drifted a configured number of versions.
//!
//! ### Strategies
//!
//! - **Exact**: brute-force scan, true top-k.
//! - **Approximate**: HNSW candidate generation plus exact rescoring;
//!   recall is tunable through [`HnswConfig`].
//!
//! ## Thread Safety
//!
//! [`Engine`] is `Send + Sync` and can be shared across threads using `Arc`.
//! Queries never block on ingestion or on a rebuild.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

// ============================================================================
// Module declarations
// ============================================================================

mod config;
mod engine;
mod error;
mod types;

pub mod storage;

// Core components
mod index;
mod manager;
mod query;
mod refresh;
mod service;
mod store;

// ============================================================================
// Public API re-exports
// ============================================================================

// Main interface
pub use engine::{Engine, EngineStatus, Health};

// Configuration
pub use config::{
    Config, EmbeddingDimension, HnswConfig, IndexConfig, IndexKind, Metric, RefreshConfig,
    StartupPolicy, MAX_DIMENSION, MAX_HNSW_LAYERS,
};

// Error handling
pub use error::{
    ErrorKind, NearlineError, NotFoundError, Result, StorageError, ValidationError,
};

// Core types
pub use types::{Generation, RecordId, StoreVersion, Timestamp};

// Components
pub use index::{FlatIndex, HnswIndex, IndexStructure, SearchResult, SearchStrategy};
pub use manager::{ActiveGeneration, IndexManager, IndexStatus, PublishEvent};
pub use query::{CompareOp, MetadataFilter, Query, QueryEngine, MAX_FILTER_DEPTH};
pub use refresh::{
    DefaultIndexBuilder, IndexBuilder, RefreshOutcome, RefreshScheduler, RefreshState,
    RefreshStatus, TriggerOutcome,
};
pub use service::SearchService;
pub use store::{Metadata, MetadataValue, NewRecord, Snapshot, VectorRecord, VectorStore};

// ============================================================================
// Prelude module for convenient imports
// ============================================================================

/// Convenient imports for common usage.
///
/// ```rust
/// use nearline::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{Config, EmbeddingDimension, IndexConfig, IndexKind, Metric};
    pub use crate::engine::Engine;
    pub use crate::error::{NearlineError, Result};
    pub use crate::query::{MetadataFilter, Query};
    pub use crate::store::{Metadata, MetadataValue, NewRecord};
    pub use crate::types::{Generation, RecordId};
}
