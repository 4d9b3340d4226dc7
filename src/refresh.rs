//! Background index rebuilds.
//!
//! # State Machine
//!
//! ```text
//!          trigger (CAS)            build ok             publish ok
//!  IDLE ─────────────────► BUILDING ─────────► PUBLISHING ─────────► IDLE
//!   ▲                         │
//!   └──────── build failed ───┘   (active generation untouched)
//! ```
//!
//! Triggers are an explicit [`trigger_refresh`](RefreshScheduler::trigger_refresh),
//! an interval tick, or the store drifting `staleness_threshold` versions
//! past the active snapshot. The IDLE→BUILDING transition is a single
//! compare-and-swap, so a trigger that arrives while a build is in flight
//! is coalesced into it rather than queued.
//!
//! Builds run on a dedicated worker thread and never hold a lock that
//! queries need; a finished build is handed to the [`IndexManager`].

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{never, select, tick, unbounded, Receiver, Sender};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{IndexConfig, RefreshConfig};
use crate::error::{NearlineError, Result};
use crate::index::IndexStructure;
use crate::manager::IndexManager;
use crate::storage;
use crate::store::{Snapshot, VectorStore};
use crate::types::{Generation, StoreVersion};

/// Builds an index structure from a snapshot.
///
/// The scheduler calls this off the query path. Implementations may take
/// as long as they need; a returned error or a panic is contained and
/// counted as a failed build.
pub trait IndexBuilder: Send + Sync + 'static {
    /// Builds generation `generation` over `snapshot`.
    fn build(
        &self,
        snapshot: &Snapshot,
        config: &IndexConfig,
        generation: Generation,
    ) -> Result<IndexStructure>;
}

/// Builder that calls [`IndexStructure::build`].
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultIndexBuilder;

impl IndexBuilder for DefaultIndexBuilder {
    fn build(
        &self,
        snapshot: &Snapshot,
        config: &IndexConfig,
        generation: Generation,
    ) -> Result<IndexStructure> {
        IndexStructure::build(snapshot, config, generation)
    }
}

/// Scheduler state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum RefreshState {
    /// No build in flight.
    Idle = 0,
    /// A snapshot is being indexed.
    Building = 1,
    /// A finished build is being swapped in.
    Publishing = 2,
}

impl RefreshState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Building,
            2 => Self::Publishing,
            _ => Self::Idle,
        }
    }
}

impl fmt::Display for RefreshState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Building => "building",
            Self::Publishing => "publishing",
        })
    }
}

/// Result of [`RefreshScheduler::trigger_refresh`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// A new build was started.
    Started,
    /// A build was already in flight; this trigger was folded into it.
    Coalesced,
}

/// Result of [`RefreshScheduler::refresh_now`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new generation was built and published.
    Published {
        /// The published generation.
        generation: Generation,
        /// Store version it reflects.
        snapshot_version: StoreVersion,
    },
    /// Another build was in flight; nothing was started.
    Coalesced,
}

/// Build counters and the current state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RefreshStatus {
    /// Current state.
    pub state: RefreshState,
    /// Builds that were published.
    pub builds_completed: u64,
    /// Builds that failed or panicked.
    pub builds_failed: u64,
    /// Message of the most recent failure, cleared by the next success.
    pub last_build_error: Option<String>,
}

#[derive(Debug, Default)]
struct BuildStats {
    completed: u64,
    failed: u64,
    last_error: Option<String>,
}

enum Command {
    Build,
    Shutdown,
}

struct Shared {
    store: Arc<VectorStore>,
    manager: Arc<IndexManager>,
    builder: Arc<dyn IndexBuilder>,
    index_config: IndexConfig,
    refresh: RefreshConfig,
    artifact_path: Option<PathBuf>,
    state: AtomicU8,
    stats: Mutex<BuildStats>,
}

impl Shared {
    /// IDLE → BUILDING. Returns false if a build is already in flight.
    fn try_begin(&self) -> bool {
        self.state
            .compare_exchange(
                RefreshState::Idle as u8,
                RefreshState::Building as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn set_state(&self, state: RefreshState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn lock_stats(&self) -> Result<MutexGuard<'_, BuildStats>> {
        self.stats
            .lock()
            .map_err(|_| NearlineError::internal("Refresh stats lock poisoned"))
    }

    /// Runs a build the caller has already claimed with `try_begin`.
    fn run_claimed(&self) -> Result<RefreshOutcome> {
        let result = self.build_and_publish();
        if let Err(e) = &result {
            error!(error = %e, "Index rebuild failed; active generation kept");
        }

        // Counters are final before the state returns to IDLE
        match self.lock_stats() {
            Ok(mut stats) => match &result {
                Ok(_) => {
                    stats.completed += 1;
                    stats.last_error = None;
                }
                Err(e) => {
                    stats.failed += 1;
                    stats.last_error = Some(e.to_string());
                }
            },
            Err(e) => warn!(error = %e, "Build counters not updated"),
        }
        self.set_state(RefreshState::Idle);
        result
    }

    fn build_and_publish(&self) -> Result<RefreshOutcome> {
        let snapshot = self.store.snapshot()?;
        let generation = self.manager.allocate_generation();
        debug!(generation = %generation, records = snapshot.len(), "Building index");

        let built = panic::catch_unwind(AssertUnwindSafe(|| {
            self.builder.build(&snapshot, &self.index_config, generation)
        }))
        .map_err(|payload| {
            NearlineError::build_failure(format!("builder panicked: {}", panic_message(&*payload)))
        })?
        .map_err(|e| {
            if e.is_build_failure() {
                e
            } else {
                NearlineError::build_failure(e.to_string())
            }
        })?;

        self.set_state(RefreshState::Publishing);
        let snapshot_version = built.snapshot_version();
        let generation = built.generation();
        self.manager.publish(built)?;

        // The published snapshot excludes these tombstones
        let compacted = self.store.compact(snapshot_version)?;
        if compacted > 0 {
            debug!(compacted, "Compacted tombstones after publish");
        }

        if self.refresh.persist_on_publish {
            if let Some(path) = &self.artifact_path {
                if let Err(e) = storage::save(path, &self.manager.load()) {
                    warn!(
                        error = %e,
                        path = %path.display(),
                        "Failed to persist published generation"
                    );
                }
            }
        }

        Ok(RefreshOutcome::Published {
            generation,
            snapshot_version,
        })
    }

    /// Mutations since the active generation's snapshot.
    fn drift(&self) -> Result<u64> {
        let current = self.store.version()?;
        let active = self.manager.load().snapshot_version();
        Ok(current.delta_since(active))
    }

    fn is_stale(&self) -> Result<bool> {
        Ok(match self.refresh.staleness_threshold {
            Some(threshold) => self.drift()? >= threshold,
            None => false,
        })
    }

    fn on_tick(&self) {
        let changed = match self.drift() {
            Ok(drift) => drift > 0,
            Err(e) => {
                warn!(error = %e, "Skipping refresh tick");
                return;
            }
        };
        if changed && self.try_begin() {
            debug!("Interval refresh");
            let _ = self.run_claimed();
        }
    }
}

/// Schedules index rebuilds on a background worker.
pub struct RefreshScheduler {
    shared: Arc<Shared>,
    commands: Sender<Command>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for RefreshScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshScheduler")
            .field("state", &self.state())
            .field("refresh", &self.shared.refresh)
            .finish_non_exhaustive()
    }
}

impl RefreshScheduler {
    /// Starts the worker thread.
    ///
    /// # Errors
    ///
    /// `Io` if the worker thread cannot be spawned.
    pub fn start(
        store: Arc<VectorStore>,
        manager: Arc<IndexManager>,
        builder: Arc<dyn IndexBuilder>,
        index_config: IndexConfig,
        refresh: RefreshConfig,
        artifact_path: Option<PathBuf>,
    ) -> Result<Self> {
        let shared = Arc::new(Shared {
            store,
            manager,
            builder,
            index_config,
            refresh,
            artifact_path,
            state: AtomicU8::new(RefreshState::Idle as u8),
            stats: Mutex::new(BuildStats::default()),
        });

        let (tx, rx) = unbounded();
        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("nearline-refresh".into())
            .spawn(move || worker_loop(worker_shared, rx))?;

        info!(
            interval = ?shared.refresh.interval,
            staleness_threshold = ?shared.refresh.staleness_threshold,
            "Refresh scheduler started"
        );

        Ok(Self {
            shared,
            commands: tx,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Requests a background rebuild.
    ///
    /// Returns `Coalesced` without queueing anything if a build is in
    /// flight.
    ///
    /// # Errors
    ///
    /// `Internal` if the scheduler has been shut down.
    pub fn trigger_refresh(&self) -> Result<TriggerOutcome> {
        if !self.shared.try_begin() {
            warn!(state = %self.state(), "Refresh already in flight; trigger coalesced");
            return Ok(TriggerOutcome::Coalesced);
        }
        if self.commands.send(Command::Build).is_err() {
            self.shared.set_state(RefreshState::Idle);
            return Err(NearlineError::internal("refresh scheduler is shut down"));
        }
        debug!("Refresh triggered");
        Ok(TriggerOutcome::Started)
    }

    /// Builds and publishes on the calling thread.
    ///
    /// # Errors
    ///
    /// `BuildFailure` if the build fails; the active generation is kept.
    #[instrument(skip(self))]
    pub fn refresh_now(&self) -> Result<RefreshOutcome> {
        if !self.shared.try_begin() {
            return Ok(RefreshOutcome::Coalesced);
        }
        self.shared.run_claimed()
    }

    /// Checks staleness after a store mutation and triggers a rebuild once
    /// the threshold is reached.
    pub fn notify_mutation(&self) -> Result<Option<TriggerOutcome>> {
        if self.state() != RefreshState::Idle || !self.shared.is_stale()? {
            return Ok(None);
        }
        debug!("Staleness threshold reached");
        self.trigger_refresh().map(Some)
    }

    /// Current state.
    pub fn state(&self) -> RefreshState {
        RefreshState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// State plus build counters.
    pub fn status(&self) -> Result<RefreshStatus> {
        let stats = self.shared.lock_stats()?;
        Ok(RefreshStatus {
            state: self.state(),
            builds_completed: stats.completed,
            builds_failed: stats.failed,
            last_build_error: stats.last_error.clone(),
        })
    }

    /// Stops the worker and waits for an in-flight build to finish.
    pub fn shutdown(&self) -> Result<()> {
        let handle = self
            .worker
            .lock()
            .map_err(|_| NearlineError::internal("Refresh worker lock poisoned"))?
            .take();
        if let Some(handle) = handle {
            let _ = self.commands.send(Command::Shutdown);
            handle
                .join()
                .map_err(|_| NearlineError::internal("Refresh worker panicked"))?;
            info!("Refresh scheduler stopped");
        }
        Ok(())
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "Refresh scheduler shutdown failed");
        }
    }
}

fn worker_loop(shared: Arc<Shared>, commands: Receiver<Command>) {
    let ticker = match shared.refresh.interval {
        Some(interval) => tick(interval),
        None => never(),
    };
    loop {
        select! {
            recv(commands) -> cmd => match cmd {
                Ok(Command::Build) => {
                    let _ = shared.run_claimed();
                }
                Ok(Command::Shutdown) | Err(_) => break,
            },
            recv(ticker) -> _ => shared.on_tick(),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
