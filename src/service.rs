//! Async seam for transport layers.
//!
//! HTTP handlers and other async callers talk to the engine through
//! [`SearchService`]. The engine itself is synchronous and CPU-bound, so
//! the implementation for `Arc<Engine>` moves each call onto tokio's
//! blocking pool instead of stalling the async executor.
//!
//! Transport layers map errors with [`NearlineError::kind`] and
//! [`ErrorKind::http_status`](crate::ErrorKind::http_status).
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use nearline::{Engine, SearchService};
//!
//! let service: Arc<Engine> = Arc::new(Engine::open(config)?);
//! let hits = service.search(query).await?;
//! ```

use std::sync::Arc;

use async_trait::async_trait;

use crate::engine::{Engine, EngineStatus};
use crate::error::{NearlineError, Result};
use crate::index::SearchResult;
use crate::query::Query;
use crate::refresh::TriggerOutcome;
use crate::store::{Metadata, NewRecord};
use crate::types::{RecordId, StoreVersion};

/// Async operations exposed to the service layer.
#[async_trait]
pub trait SearchService: Send + Sync {
    /// Answers a similarity query.
    async fn search(&self, query: Query) -> Result<Vec<SearchResult>>;

    /// Inserts a record.
    async fn insert(&self, record: NewRecord) -> Result<StoreVersion>;

    /// Replaces the embedding and metadata of an existing record.
    async fn update(
        &self,
        id: RecordId,
        embedding: Vec<f32>,
        metadata: Metadata,
    ) -> Result<StoreVersion>;

    /// Tombstones a record.
    async fn soft_delete(&self, id: RecordId) -> Result<StoreVersion>;

    /// Requests a background rebuild.
    async fn trigger_refresh(&self) -> Result<TriggerOutcome>;

    /// Operational status.
    async fn status(&self) -> Result<EngineStatus>;
}

/// Runs `f` against the engine on the blocking pool.
async fn blocking<T, F>(engine: &Arc<Engine>, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&Engine) -> Result<T> + Send + 'static,
{
    let engine = Arc::clone(engine);
    tokio::task::spawn_blocking(move || f(&engine))
        .await
        .map_err(|e| NearlineError::internal(format!("join blocking task: {}", e)))?
}

#[async_trait]
impl SearchService for Arc<Engine> {
    async fn search(&self, query: Query) -> Result<Vec<SearchResult>> {
        blocking(self, move |engine| engine.query(&query)).await
    }

    async fn insert(&self, record: NewRecord) -> Result<StoreVersion> {
        blocking(self, move |engine| engine.insert(record)).await
    }

    async fn update(
        &self,
        id: RecordId,
        embedding: Vec<f32>,
        metadata: Metadata,
    ) -> Result<StoreVersion> {
        blocking(self, move |engine| engine.update(&id, embedding, metadata)).await
    }

    async fn soft_delete(&self, id: RecordId) -> Result<StoreVersion> {
        blocking(self, move |engine| engine.soft_delete(&id)).await
    }

    async fn trigger_refresh(&self) -> Result<TriggerOutcome> {
        blocking(self, |engine| engine.trigger_refresh()).await
    }

    async fn status(&self) -> Result<EngineStatus> {
        blocking(self, |engine| engine.status()).await
    }
}
