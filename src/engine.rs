//! Engine facade and lifecycle operations.
//!
//! [`Engine`] wires the components together and is the surface a
//! transport layer (HTTP, CLI, UI backend) talks to:
//!
//! ```text
//!            insert / update / soft_delete          search
//!                      │                              │
//!                      ▼                              ▼
//!               ┌─────────────┐               ┌──────────────┐
//!               │ VectorStore │               │ QueryEngine  │
//!               └─────────────┘               └──────────────┘
//!                      │ snapshot                     │ load
//!                      ▼                              ▼
//!             ┌──────────────────┐  publish   ┌──────────────┐
//!             │ RefreshScheduler │ ─────────► │ IndexManager │
//!             └──────────────────┘            └──────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```rust
//! use nearline::{Config, EmbeddingDimension, Engine, Metric, NewRecord};
//!
//! let config = Config::in_memory(EmbeddingDimension::Custom(2), Metric::Cosine);
//! let engine = Engine::open(config).unwrap();
//! engine.insert(NewRecord::new("a", vec![1.0, 0.0])).unwrap();
//! engine.refresh_now().unwrap();
//!
//! let hits = engine.search(&[1.0, 0.0], 1, None, None).unwrap();
//! assert_eq!(hits[0].id.as_str(), "a");
//! engine.close().unwrap();
//! ```
//!
//! # Thread Safety
//!
//! `Engine` is `Send + Sync` and is meant to be shared behind an `Arc`.
//! Queries never wait for ingestion or rebuilds.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::config::{Config, StartupPolicy};
use crate::error::{NearlineError, Result, StorageError, ValidationError};
use crate::index::{IndexStructure, SearchResult};
use crate::manager::{IndexManager, PublishEvent};
use crate::query::{MetadataFilter, Query, QueryEngine};
use crate::refresh::{
    DefaultIndexBuilder, IndexBuilder, RefreshOutcome, RefreshScheduler, RefreshState,
    TriggerOutcome,
};
use crate::storage::{self, ArtifactBody};
use crate::store::{Metadata, MetadataValue, NewRecord, VectorRecord, VectorStore};
use crate::types::{Generation, RecordId, StoreVersion, Timestamp};

/// Serving health.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum Health {
    /// Serving normally.
    Healthy,
    /// Serving an empty index because the startup artifact was unusable.
    /// Cleared by the first successful publish.
    Degraded {
        /// Why the artifact was rejected.
        reason: String,
    },
}

impl Health {
    /// Returns true for [`Health::Healthy`].
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// Operational snapshot of the engine.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EngineStatus {
    /// Generation currently serving queries.
    pub active_generation: Generation,
    /// Store version the active generation was built from.
    pub snapshot_version: StoreVersion,
    /// When the active generation was published.
    pub last_refresh: Option<Timestamp>,
    /// Current store version.
    pub store_version: StoreVersion,
    /// Live records in the store.
    pub live_records: usize,
    /// Records indexed by the active generation.
    pub indexed_records: usize,
    /// Scheduler state.
    pub refresh_state: RefreshState,
    /// Published builds.
    pub builds_completed: u64,
    /// Failed builds.
    pub builds_failed: u64,
    /// Most recent build failure.
    pub last_build_error: Option<String>,
    /// Serving health.
    pub health: Health,
    /// Retired generations still held by queries.
    pub retired_in_flight: usize,
}

/// One element of a JSON import file.
#[derive(Debug, Deserialize)]
struct JsonRecord {
    id: String,
    embedding: Vec<f32>,
    #[serde(default)]
    metadata: serde_json::Map<String, serde_json::Value>,
}

/// The vector index engine.
pub struct Engine {
    config: Config,
    store: Arc<VectorStore>,
    manager: Arc<IndexManager>,
    queries: QueryEngine,
    scheduler: RefreshScheduler,
    /// Why the startup artifact was rejected, if it was.
    startup_error: Option<String>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("dimension", &self.config.dimension())
            .field("index", &self.config.index)
            .field("artifact_path", &self.config.artifact_path)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Opens an engine, loading the artifact at `config.artifact_path` if
    /// one exists.
    ///
    /// - No artifact: starts empty and healthy.
    /// - Valid artifact: its records populate the store and generation 1
    ///   is built and published before this returns.
    /// - Corrupt artifact: with [`StartupPolicy::Fail`] the error is
    ///   returned; with [`StartupPolicy::StartEmpty`] the engine starts
    ///   empty and reports [`Health::Degraded`].
    ///
    /// # Errors
    ///
    /// - `Validation` if the configuration is invalid
    /// - `Storage` (Corrupt kind) under `StartupPolicy::Fail`
    /// - `Io` if the artifact exists but cannot be read
    #[instrument(
        skip(config),
        fields(dimension = config.dimension(), metric = config.index.metric.as_str())
    )]
    pub fn open(config: Config) -> Result<Self> {
        Self::open_with_builder(config, Arc::new(DefaultIndexBuilder))
    }

    /// Like [`open`](Self::open) with a custom index builder for refreshes.
    pub fn open_with_builder(config: Config, builder: Arc<dyn IndexBuilder>) -> Result<Self> {
        config.validate()?;
        info!("Opening nearline engine");

        let dimension = config.dimension();
        let manager = Arc::new(IndexManager::new(dimension, &config.index));

        let (store, startup_error) = match &config.artifact_path {
            None => (VectorStore::new(dimension), None),
            Some(path) => match load_artifact(path, dimension) {
                Ok(None) => (VectorStore::new(dimension), None),
                Ok(Some(body)) => (restore(&config, body, &manager)?, None),
                Err(e) if e.is_corrupt() && config.startup_policy == StartupPolicy::StartEmpty => {
                    warn!(
                        error = %e,
                        path = %path.display(),
                        "Index artifact rejected; starting empty"
                    );
                    (VectorStore::new(dimension), Some(e.to_string()))
                }
                Err(e) => return Err(e),
            },
        };
        let store = Arc::new(store);

        let scheduler = RefreshScheduler::start(
            Arc::clone(&store),
            Arc::clone(&manager),
            builder,
            config.index,
            config.refresh.clone(),
            config.artifact_path.clone(),
        )?;
        let queries = QueryEngine::new(Arc::clone(&manager), config.max_k, config.default_timeout);

        info!(
            records = store.len()?,
            generation = %manager.load().generation(),
            "Engine opened"
        );

        Ok(Self {
            config,
            store,
            manager,
            queries,
            scheduler,
            startup_error,
        })
    }

    /// Stops the refresh worker.
    ///
    /// Consumes the engine. Unsaved data stays in memory only; call
    /// [`save`](Self::save) first to persist the active generation.
    #[instrument(skip(self))]
    pub fn close(self) -> Result<()> {
        info!("Closing engine");
        self.scheduler.shutdown()?;
        info!("Engine closed");
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Top-`k` records for `embedding` from the active generation.
    ///
    /// `timeout` overrides `Config::default_timeout`.
    ///
    /// # Errors
    ///
    /// `Validation(DimensionMismatch)`, `InvalidQuery` or `Timeout`; see
    /// [`QueryEngine::search`].
    pub fn search(
        &self,
        embedding: &[f32],
        k: usize,
        filter: Option<MetadataFilter>,
        timeout: Option<Duration>,
    ) -> Result<Vec<SearchResult>> {
        self.query(&Query {
            embedding: embedding.to_vec(),
            k,
            filter,
            timeout,
        })
    }

    /// Runs a prepared [`Query`].
    pub fn query(&self, query: &Query) -> Result<Vec<SearchResult>> {
        self.queries.search(query)
    }

    // =========================================================================
    // Ingestion
    // =========================================================================

    /// Inserts a record.
    ///
    /// # Errors
    ///
    /// `Validation(DimensionMismatch)`, `DuplicateId` for a live id, or
    /// another `Validation` error. A failed insert leaves the store
    /// unchanged.
    pub fn insert(&self, record: NewRecord) -> Result<StoreVersion> {
        let version = self.store.insert(record)?;
        self.after_mutation();
        Ok(version)
    }

    /// Inserts records atomically: either all are inserted or none.
    pub fn insert_batch(&self, records: Vec<NewRecord>) -> Result<StoreVersion> {
        let version = self.store.insert_batch(records)?;
        self.after_mutation();
        Ok(version)
    }

    /// Inserts a record under a freshly generated id and returns it.
    pub fn insert_auto(&self, embedding: Vec<f32>, metadata: Metadata) -> Result<RecordId> {
        let id = RecordId::generate();
        self.insert(NewRecord {
            id: id.clone(),
            embedding,
            metadata,
        })?;
        Ok(id)
    }

    /// Replaces the embedding and metadata of a live record.
    pub fn update(
        &self,
        id: &RecordId,
        embedding: Vec<f32>,
        metadata: Metadata,
    ) -> Result<StoreVersion> {
        let version = self.store.update(id, embedding, metadata)?;
        self.after_mutation();
        Ok(version)
    }

    /// Tombstones a record.
    ///
    /// Generations built before the delete may still return it until the
    /// next publish.
    pub fn soft_delete(&self, id: &RecordId) -> Result<StoreVersion> {
        let version = self.store.soft_delete(id)?;
        self.after_mutation();
        Ok(version)
    }

    /// The live record with the given id, as currently stored.
    pub fn get(&self, id: &RecordId) -> Result<Option<Arc<VectorRecord>>> {
        self.store.get(id)
    }

    /// Bulk-loads a JSON array of `{"id", "embedding", "metadata"}` objects.
    ///
    /// The whole file is validated before anything is inserted.
    ///
    /// # Errors
    ///
    /// - `Storage(Serialization)` if the file is not such an array
    /// - `Validation(InvalidField)` for a non-scalar metadata value
    /// - any insert error; nothing is inserted in that case
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub fn import_json(&self, path: impl AsRef<Path>) -> Result<usize> {
        let bytes = std::fs::read(path.as_ref())?;
        let parsed: Vec<JsonRecord> = serde_json::from_slice(&bytes)?;

        let mut records = Vec::with_capacity(parsed.len());
        for item in parsed {
            let mut metadata = Metadata::new();
            for (key, value) in &item.metadata {
                let value = MetadataValue::from_json(value).ok_or_else(|| {
                    ValidationError::invalid_field(
                        format!("metadata.{}", key),
                        "must be a scalar (null, bool, number or string)",
                    )
                })?;
                metadata.insert(key.clone(), value);
            }
            records.push(NewRecord {
                id: RecordId::from(item.id),
                embedding: item.embedding,
                metadata,
            });
        }

        let count = records.len();
        self.insert_batch(records)?;
        info!(count, "Imported records");
        Ok(count)
    }

    fn after_mutation(&self) {
        match self.scheduler.notify_mutation() {
            Ok(Some(outcome)) => debug!(?outcome, "Staleness refresh requested"),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Staleness check failed"),
        }
    }

    // =========================================================================
    // Refresh and persistence
    // =========================================================================

    /// Requests a background rebuild; coalesced if one is in flight.
    pub fn trigger_refresh(&self) -> Result<TriggerOutcome> {
        self.scheduler.trigger_refresh()
    }

    /// Rebuilds and publishes on the calling thread.
    pub fn refresh_now(&self) -> Result<RefreshOutcome> {
        self.scheduler.refresh_now()
    }

    /// Writes the active generation to `config.artifact_path`.
    ///
    /// # Errors
    ///
    /// `Config` if no artifact path is configured; otherwise see
    /// [`storage::save`].
    pub fn save(&self) -> Result<()> {
        let path = self
            .config
            .artifact_path
            .as_deref()
            .ok_or_else(|| NearlineError::config("no artifact_path configured"))?;
        storage::save(path, &self.manager.load())
    }

    /// Subscribes to publish events.
    pub fn subscribe(&self, capacity: usize) -> Result<Receiver<PublishEvent>> {
        self.manager.subscribe(capacity)
    }

    // =========================================================================
    // Observability
    // =========================================================================

    /// Generation, versions, refresh counters and health.
    pub fn status(&self) -> Result<EngineStatus> {
        let index = self.manager.status()?;
        let refresh = self.scheduler.status()?;

        let health = match &self.startup_error {
            Some(reason) if index.active_generation == Generation::INITIAL => Health::Degraded {
                reason: reason.clone(),
            },
            _ => Health::Healthy,
        };

        Ok(EngineStatus {
            active_generation: index.active_generation,
            snapshot_version: index.snapshot_version,
            last_refresh: index.last_refresh,
            store_version: self.store.version()?,
            live_records: self.store.len()?,
            indexed_records: index.record_count,
            refresh_state: refresh.state,
            builds_completed: refresh.builds_completed,
            builds_failed: refresh.builds_failed,
            last_build_error: refresh.last_build_error,
            health,
            retired_in_flight: self.manager.retired_in_flight()?,
        })
    }

    /// Configuration the engine was opened with.
    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    /// The underlying manager.
    pub fn manager(&self) -> &Arc<IndexManager> {
        &self.manager
    }
}

/// Loads the artifact and checks it against the configured dimension.
fn load_artifact(path: &Path, dimension: usize) -> Result<Option<ArtifactBody>> {
    let body = match storage::load(path)? {
        Some(body) => body,
        None => return Ok(None),
    };
    if body.dimension != dimension {
        return Err(StorageError::corrupted(format!(
            "artifact dimension {} does not match configured dimension {}",
            body.dimension, dimension
        ))
        .into());
    }
    Ok(Some(body))
}

/// Populates a store from an artifact and publishes its first generation.
fn restore(config: &Config, body: ArtifactBody, manager: &IndexManager) -> Result<VectorStore> {
    if body.index != config.index {
        warn!(
            artifact = ?body.index,
            configured = ?config.index,
            "Artifact index config differs from configuration; rebuilding with configuration"
        );
    }
    let records = body
        .records
        .into_iter()
        .map(|r| (r.id, r.embedding, r.metadata))
        .collect();
    let store = VectorStore::restore(body.dimension, records, body.snapshot_version);

    let index = IndexStructure::build(
        &store.snapshot()?,
        &config.index,
        manager.allocate_generation(),
    )?;
    manager.publish(index)?;
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EmbeddingDimension, Metric};

    fn engine() -> Engine {
        Engine::open(Config::in_memory(EmbeddingDimension::Custom(2), Metric::Cosine)).unwrap()
    }

    #[test]
    fn test_open_in_memory_is_healthy_and_empty() {
        let engine = engine();
        let status = engine.status().unwrap();
        assert_eq!(status.active_generation, Generation::INITIAL);
        assert!(status.health.is_healthy());
        assert_eq!(status.live_records, 0);
        assert!(engine.search(&[1.0, 0.0], 3, None, None).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = Config {
            max_k: 0,
            ..Config::in_memory(EmbeddingDimension::Custom(2), Metric::Cosine)
        };
        assert!(Engine::open(config).unwrap_err().is_validation());
    }

    #[test]
    fn test_insert_auto_generates_unique_ids() {
        let engine = engine();
        let a = engine.insert_auto(vec![1.0, 0.0], Metadata::new()).unwrap();
        let b = engine.insert_auto(vec![0.0, 1.0], Metadata::new()).unwrap();
        assert_ne!(a, b);
        assert!(engine.get(&a).unwrap().is_some());
    }

    #[test]
    fn test_save_without_path_is_config_error() {
        let engine = engine();
        let err = engine.save().unwrap_err();
        assert!(matches!(err, NearlineError::Config { .. }));
    }

    #[test]
    fn test_import_rejects_nested_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.json");
        std::fs::write(
            &path,
            r#"[{"id": "a", "embedding": [1.0, 0.0], "metadata": {"skills": ["K", "P"]}}]"#,
        )
        .unwrap();

        let engine = engine();
        let err = engine.import_json(&path).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(engine.store().len().unwrap(), 0);
    }
}
