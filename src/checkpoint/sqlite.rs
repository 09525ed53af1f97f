//! SQLite-based checkpoint persistence using sqlx

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

use super::{unavailable, Checkpoint, CheckpointStore, RunLocks, RunSummary};
use crate::state::State;
use crate::Result;

/// Persistent record of a checkpoint
#[derive(Debug, Clone, sqlx::FromRow)]
struct CheckpointRecord {
    run_id: String,
    step: String,
    sequence: i64,
    state: String, // JSON
    created_at: String,
}

impl CheckpointRecord {
    fn into_checkpoint(self) -> Result<Checkpoint> {
        let state: State = serde_json::from_str(&self.state)
            .map_err(|e| unavailable("corrupt checkpoint state", e))?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| unavailable("corrupt checkpoint timestamp", e))?
            .with_timezone(&Utc);
        Ok(Checkpoint {
            run_id: self.run_id,
            step: self.step,
            sequence: self.sequence.max(0) as u64,
            state,
            created_at,
        })
    }
}

/// SQLite implementation of [`CheckpointStore`]
pub struct SqliteCheckpointStore {
    pool: SqlitePool,
    locks: RunLocks,
}

impl SqliteCheckpointStore {
    /// Connect to `database_url`, creating the database and schema if needed
    pub async fn connect(database_url: &str) -> Result<Self> {
        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");
        if !in_memory {
            ensure_parent_dir(database_url)?;
        }

        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| unavailable("invalid database url", e))?
            .create_if_missing(true);

        // An in-memory database lives and dies with its single connection
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| unavailable("connect", e))?;

        let store = Self {
            pool,
            locks: RunLocks::default(),
        };
        store.initialize_schema().await?;
        debug!("Opened checkpoint database {}", database_url);
        Ok(store)
    }

    /// Initialize database schema
    async fn initialize_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                run_id TEXT NOT NULL,
                step TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                state TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (run_id, step)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| unavailable("create schema", e))?;

        sqlx::query(
            r#"CREATE UNIQUE INDEX IF NOT EXISTS idx_checkpoints_sequence ON checkpoints(run_id, sequence)"#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| unavailable("create schema", e))?;

        Ok(())
    }
}

fn ensure_parent_dir(database_url: &str) -> Result<()> {
    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:");
    let path = path.split('?').next().unwrap_or(path);
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| unavailable("create database dir", e))?;
        }
    }
    Ok(())
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn save(&self, run_id: &str, step: &str, state: &State) -> Result<Checkpoint> {
        let state_json =
            serde_json::to_string(state).map_err(|e| unavailable("serialize state", e))?;
        let created_at = Utc::now();

        let _guard = self.locks.lock(run_id).await;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| unavailable("begin", e))?;

        let (max,): (i64,) =
            sqlx::query_as("SELECT COALESCE(MAX(sequence), 0) FROM checkpoints WHERE run_id = ?")
                .bind(run_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| unavailable("read sequence", e))?;
        let sequence = max + 1;

        // Upsert checkpoint record
        sqlx::query(
            r#"
            INSERT INTO checkpoints (run_id, step, sequence, state, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(run_id, step) DO UPDATE SET
                sequence = excluded.sequence,
                state = excluded.state,
                created_at = excluded.created_at
            "#,
        )
        .bind(run_id)
        .bind(step)
        .bind(sequence)
        .bind(&state_json)
        .bind(created_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|e| unavailable("write checkpoint", e))?;

        tx.commit().await.map_err(|e| unavailable("commit", e))?;

        Ok(Checkpoint {
            run_id: run_id.to_string(),
            step: step.to_string(),
            sequence: sequence as u64,
            state: state.clone(),
            created_at,
        })
    }

    async fn load_latest(&self, run_id: &str) -> Result<Option<Checkpoint>> {
        let record = sqlx::query_as::<_, CheckpointRecord>(
            "SELECT * FROM checkpoints WHERE run_id = ? ORDER BY sequence DESC LIMIT 1",
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| unavailable("load checkpoint", e))?;

        record.map(CheckpointRecord::into_checkpoint).transpose()
    }

    async fn list(&self, run_id: &str) -> Result<Vec<Checkpoint>> {
        sqlx::query_as::<_, CheckpointRecord>(
            "SELECT * FROM checkpoints WHERE run_id = ? ORDER BY sequence ASC",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| unavailable("list checkpoints", e))?
        .into_iter()
        .map(CheckpointRecord::into_checkpoint)
        .collect()
    }

    async fn runs(&self) -> Result<Vec<RunSummary>> {
        let records = sqlx::query_as::<_, CheckpointRecord>(
            r#"
            SELECT c.* FROM checkpoints c
            JOIN (SELECT run_id, MAX(sequence) AS latest FROM checkpoints GROUP BY run_id) m
              ON c.run_id = m.run_id AND c.sequence = m.latest
            ORDER BY c.created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| unavailable("list runs", e))?;

        records
            .into_iter()
            .map(|r| r.into_checkpoint().map(|cp| RunSummary::from(&cp)))
            .collect()
    }
}
