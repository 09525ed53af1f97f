//! Checkpoint persistence
//!
//! A checkpoint is an immutable snapshot of a run's [`State`] taken at a step
//! boundary, keyed by `(run_id, step)` and ordered by a per-run sequence.
//! Resuming always continues from the highest sequence.
//!
//! Backends:
//! - Memory (tests, degraded on-demand runs)
//! - SQLite via sqlx (durable default)
//! - YAML files, one per checkpoint
//! - Unavailable, standing in for a backend that failed to open

mod file;
mod memory;
mod sqlite;

pub use file::FileCheckpointStore;
pub use memory::MemoryCheckpointStore;
pub use sqlite::SqliteCheckpointStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::config::CheckpointConfig;
use crate::state::{Run, RunStatus, State};
use crate::trigger::Mode;
use crate::{Error, Result};

/// Snapshot of a run at a step boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: String,
    pub step: String,
    /// Strictly increasing per run
    pub sequence: u64,
    pub state: State,
    pub created_at: DateTime<Utc>,
}

/// Latest checkpoint of a run, for listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub mode: Mode,
    pub status: RunStatus,
    pub step: String,
    pub sequence: u64,
    pub updated_at: DateTime<Utc>,
}

impl From<&Checkpoint> for RunSummary {
    fn from(cp: &Checkpoint) -> Self {
        Self {
            run_id: cp.run_id.clone(),
            mode: cp.state.run.mode,
            status: cp.state.run.status,
            step: cp.step.clone(),
            sequence: cp.sequence,
            updated_at: cp.created_at,
        }
    }
}

/// Durable keyed persistence of run state
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Persist `state` under `(run_id, step)`. Saving an existing step key
    /// replaces it with the next sequence number.
    async fn save(&self, run_id: &str, step: &str, state: &State) -> Result<Checkpoint>;

    /// Highest-sequence checkpoint of the run
    async fn load_latest(&self, run_id: &str) -> Result<Option<Checkpoint>>;

    /// All checkpoints of the run, ascending by sequence
    async fn list(&self, run_id: &str) -> Result<Vec<Checkpoint>>;

    /// One summary per run, most recently updated first
    async fn runs(&self) -> Result<Vec<RunSummary>>;

    /// State to continue `run` from: its latest snapshot, or a fresh state
    async fn resume(&self, run: Run) -> Result<State> {
        Ok(match self.load_latest(&run.id).await? {
            Some(checkpoint) => checkpoint.state,
            None => State::new(run),
        })
    }
}

/// Per-run write locks. Saves for one run are serialized; different runs
/// never contend. An entry lives only while some save holds or awaits it.
#[derive(Debug, Default)]
pub struct RunLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl RunLocks {
    pub async fn lock(&self, run_id: &str) -> RunLockGuard<'_> {
        let lock = self
            .locks
            .entry(run_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        RunLockGuard {
            locks: self,
            run_id: run_id.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }
}

/// Held for the duration of a save
pub struct RunLockGuard<'a> {
    locks: &'a RunLocks,
    run_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for RunLockGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        // Only the map still points at the mutex: nobody holds or awaits it
        self.locks
            .locks
            .remove_if(&self.run_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Stand-in for a backend that could not be opened. Every call fails with
/// `CheckpointUnavailable`, so durable modes fail per run while on-demand
/// runs carry on in memory.
#[derive(Debug, Clone)]
pub struct UnavailableCheckpointStore {
    reason: String,
}

impl UnavailableCheckpointStore {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn fail<T>(&self) -> Result<T> {
        Err(Error::CheckpointUnavailable(self.reason.clone()))
    }
}

#[async_trait]
impl CheckpointStore for UnavailableCheckpointStore {
    fn name(&self) -> &str {
        "unavailable"
    }

    async fn save(&self, _run_id: &str, _step: &str, _state: &State) -> Result<Checkpoint> {
        self.fail()
    }

    async fn load_latest(&self, _run_id: &str) -> Result<Option<Checkpoint>> {
        self.fail()
    }

    async fn list(&self, _run_id: &str) -> Result<Vec<Checkpoint>> {
        self.fail()
    }

    async fn runs(&self) -> Result<Vec<RunSummary>> {
        self.fail()
    }
}

/// Wrap a backend failure
pub(crate) fn unavailable(context: &str, err: impl std::fmt::Display) -> Error {
    Error::CheckpointUnavailable(format!("{}: {}", context, err))
}

/// Checkpoint backend kind for config
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Sqlite,
    File,
    Memory,
}

impl std::str::FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(BackendKind::Sqlite),
            "file" | "yaml" => Ok(BackendKind::File),
            "memory" => Ok(BackendKind::Memory),
            _ => Err(Error::Config(format!("Unknown checkpoint backend: {}", s))),
        }
    }
}

/// Create a checkpoint store based on configuration
pub async fn create_store(config: &CheckpointConfig) -> Result<Arc<dyn CheckpointStore>> {
    let kind: BackendKind = config.backend.parse()?;

    match kind {
        BackendKind::Sqlite => Ok(Arc::new(
            SqliteCheckpointStore::connect(&config.database_url).await?,
        )),
        BackendKind::File => Ok(Arc::new(FileCheckpointStore::new(config.directory.clone()))),
        BackendKind::Memory => Ok(Arc::new(MemoryCheckpointStore::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_backend_kind() {
        assert_eq!("sqlite".parse::<BackendKind>().unwrap(), BackendKind::Sqlite);
        assert_eq!("YAML".parse::<BackendKind>().unwrap(), BackendKind::File);
        assert!("postgres".parse::<BackendKind>().is_err());
    }

    #[tokio::test]
    async fn test_run_locks_are_per_run() {
        let locks = Arc::new(RunLocks::default());
        let _held = locks.lock("run-a").await;

        // A different run is not blocked
        let other = tokio::time::timeout(Duration::from_millis(100), locks.lock("run-b")).await;
        assert!(other.is_ok());

        // The same run is
        let same = tokio::time::timeout(Duration::from_millis(50), locks.lock("run-a")).await;
        assert!(same.is_err());
    }

    #[tokio::test]
    async fn test_run_locks_released_entries_are_dropped() {
        let locks = RunLocks::default();
        for run in ["run-a", "run-b", "run-c"] {
            let _guard = locks.lock(run).await;
            assert!(locks.locks.contains_key(run));
        }
        assert!(locks.locks.is_empty());

        // A waiter keeps the entry alive past the holder's release
        let first = locks.lock("run-a").await;
        let mut waiter = std::pin::pin!(locks.lock("run-a"));
        assert!(tokio::time::timeout(Duration::from_millis(20), waiter.as_mut())
            .await
            .is_err());
        drop(first);
        let second = waiter.await;
        assert_eq!(locks.locks.len(), 1);
        drop(second);
        assert!(locks.locks.is_empty());
    }

    #[tokio::test]
    async fn test_create_memory_store() {
        let config = CheckpointConfig {
            backend: "memory".to_string(),
            ..Default::default()
        };
        let store = create_store(&config).await.unwrap();
        assert_eq!(store.name(), "memory");
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_call() {
        let store = UnavailableCheckpointStore::new("connect: unable to open database file");
        let state = State::new(Run::new(
            Mode::OnDemand,
            crate::trigger::TriggerRequest::new("on-demand", serde_json::json!({})),
        ));

        let err = store.save("run-1", "start", &state).await.unwrap_err();
        assert!(matches!(err, Error::CheckpointUnavailable(ref r) if r.contains("unable to open")));
        assert!(store.load_latest("run-1").await.is_err());
        assert!(store.list("run-1").await.is_err());
        assert!(store.runs().await.is_err());
    }
}
