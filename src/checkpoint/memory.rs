//! In-process checkpoint store

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{CheckpointStore, RunLocks, RunSummary};
use crate::checkpoint::Checkpoint;
use crate::state::State;
use crate::{Error, Result};

#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    runs: RwLock<HashMap<String, Vec<Checkpoint>>>,
    locks: RunLocks,
    offline: AtomicBool,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails with `CheckpointUnavailable`
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::CheckpointUnavailable(
                "memory store is offline".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn save(&self, run_id: &str, step: &str, state: &State) -> Result<Checkpoint> {
        self.ensure_online()?;
        let _guard = self.locks.lock(run_id).await;

        let mut runs = self.runs.write();
        let checkpoints = runs.entry(run_id.to_string()).or_default();
        let sequence = checkpoints.iter().map(|c| c.sequence).max().unwrap_or(0) + 1;
        checkpoints.retain(|c| c.step != step);

        let checkpoint = Checkpoint {
            run_id: run_id.to_string(),
            step: step.to_string(),
            sequence,
            state: state.clone(),
            created_at: Utc::now(),
        };
        checkpoints.push(checkpoint.clone());
        Ok(checkpoint)
    }

    async fn load_latest(&self, run_id: &str) -> Result<Option<Checkpoint>> {
        self.ensure_online()?;
        Ok(self
            .runs
            .read()
            .get(run_id)
            .and_then(|cps| cps.iter().max_by_key(|c| c.sequence))
            .cloned())
    }

    async fn list(&self, run_id: &str) -> Result<Vec<Checkpoint>> {
        self.ensure_online()?;
        let mut checkpoints = self.runs.read().get(run_id).cloned().unwrap_or_default();
        checkpoints.sort_by_key(|c| c.sequence);
        Ok(checkpoints)
    }

    async fn runs(&self) -> Result<Vec<RunSummary>> {
        self.ensure_online()?;
        let mut summaries: Vec<RunSummary> = self
            .runs
            .read()
            .values()
            .filter_map(|cps| cps.iter().max_by_key(|c| c.sequence))
            .map(RunSummary::from)
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }
}
