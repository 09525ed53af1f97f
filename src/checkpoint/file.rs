//! YAML file checkpoint store
//!
//! Layout: `<dir>/<run_id>/<step>.yaml`, one file per step key, plus a
//! `sequence` file holding the run's last sequence number. Checkpoints are
//! written to a temporary name and renamed into place.

use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};

use super::{unavailable, Checkpoint, CheckpointStore, RunLocks, RunSummary};
use crate::state::State;
use crate::Result;

const SEQUENCE_FILE: &str = "sequence";

pub struct FileCheckpointStore {
    base_dir: PathBuf,
    locks: RunLocks,
}

impl FileCheckpointStore {
    pub fn new(base_dir: PathBuf) -> Self {
        Self {
            base_dir,
            locks: RunLocks::default(),
        }
    }

    fn run_dir(&self, run_id: &str) -> PathBuf {
        self.base_dir.join(file_key(run_id))
    }

    fn step_path(&self, run_id: &str, step: &str) -> PathBuf {
        self.run_dir(run_id).join(format!("{}.yaml", file_key(step)))
    }

    async fn read_dir(&self, dir: &Path) -> Result<Vec<Checkpoint>> {
        if !tokio::fs::try_exists(dir)
            .await
            .map_err(|e| unavailable("stat checkpoint dir", e))?
        {
            return Ok(Vec::new());
        }

        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| unavailable("read checkpoint dir", e))?;
        let mut checkpoints = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| unavailable("read checkpoint dir", e))?
        {
            let path = entry.path();
            if path.extension().map(|e| e == "yaml").unwrap_or(false) {
                let content = tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|e| unavailable("read checkpoint", e))?;
                let checkpoint: Checkpoint = serde_yaml::from_str(&content)
                    .map_err(|e| unavailable(&format!("parse {}", path.display()), e))?;
                checkpoints.push(checkpoint);
            }
        }
        checkpoints.sort_by_key(|c| c.sequence);
        Ok(checkpoints)
    }

    /// Next sequence for the run in `dir`. Directories written before the
    /// sequence file existed are scanned once.
    async fn next_sequence(&self, dir: &Path) -> Result<u64> {
        match tokio::fs::read_to_string(dir.join(SEQUENCE_FILE)).await {
            Ok(raw) => raw
                .trim()
                .parse::<u64>()
                .map(|last| last + 1)
                .map_err(|e| unavailable("parse sequence", e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let existing = self.read_dir(dir).await?;
                Ok(existing.iter().map(|c| c.sequence).max().unwrap_or(0) + 1)
            }
            Err(e) => Err(unavailable("read sequence", e)),
        }
    }
}

/// Step labels may carry `:` or `#`; keep file names portable
fn file_key(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn save(&self, run_id: &str, step: &str, state: &State) -> Result<Checkpoint> {
        let _guard = self.locks.lock(run_id).await;

        let dir = self.run_dir(run_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| unavailable("create checkpoint dir", e))?;

        // Claimed before the checkpoint lands; a crash leaves a gap, never a repeat
        let sequence = self.next_sequence(&dir).await?;
        tokio::fs::write(dir.join(SEQUENCE_FILE), sequence.to_string())
            .await
            .map_err(|e| unavailable("write sequence", e))?;

        let checkpoint = Checkpoint {
            run_id: run_id.to_string(),
            step: step.to_string(),
            sequence,
            state: state.clone(),
            created_at: Utc::now(),
        };
        let content =
            serde_yaml::to_string(&checkpoint).map_err(|e| unavailable("serialize state", e))?;

        let path = self.step_path(run_id, step);
        let tmp = path.with_extension("yaml.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| unavailable("write checkpoint", e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| unavailable("write checkpoint", e))?;

        Ok(checkpoint)
    }

    async fn load_latest(&self, run_id: &str) -> Result<Option<Checkpoint>> {
        Ok(self.read_dir(&self.run_dir(run_id)).await?.pop())
    }

    async fn list(&self, run_id: &str) -> Result<Vec<Checkpoint>> {
        self.read_dir(&self.run_dir(run_id)).await
    }

    async fn runs(&self) -> Result<Vec<RunSummary>> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut summaries = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.base_dir)
            .await
            .map_err(|e| unavailable("read checkpoint dir", e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| unavailable("read checkpoint dir", e))?
        {
            if entry.path().is_dir() {
                if let Some(latest) = self.read_dir(&entry.path()).await?.pop() {
                    summaries.push(RunSummary::from(&latest));
                }
            }
        }

        // Sort by update time (newest first)
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }
}
