//! Amber: multi-mode codebase agent orchestration
//!
//! The orchestration core of a codebase agent that answers questions,
//! triages issues, opens pull requests, runs scheduled health checks and
//! reacts to webhook events:
//! - **Supervisor**: classifies a trigger into a mode and drives one run
//! - **Mode workflows**: on-demand, background, scheduled and webhook graphs
//! - **Checkpoints**: every step boundary is persisted so runs can resume
//!
//! The reasoning model and the tool layer are capabilities behind traits
//! ([`Harness`] and [`ToolExecutor`]); the core never depends on a concrete
//! prompt or tool body.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │               Supervisor                │
//! │  classify(trigger) → mode → execute     │
//! └────────────────────┬────────────────────┘
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │       Mode workflow (step graph)        │
//! │  on-demand | background | scheduled |   │
//! │  webhook, played by WorkflowRunner      │
//! └──────────┬───────────────────┬──────────┘
//!            ▼                   ▼
//! ┌────────────────────┐ ┌──────────────────┐
//! │ Harness + Tools    │ │ Checkpoint store │
//! │ (reason, invoke)   │ │ one per boundary │
//! └────────────────────┘ └──────────────────┘
//! ```

pub mod checkpoint;
pub mod config;
pub mod harness;
pub mod response;
pub mod state;
pub mod supervisor;
pub mod tools;
pub mod trigger;
pub mod workflow;

use std::time::Duration;

// Re-exports for convenience
pub use checkpoint::{Checkpoint, CheckpointStore};
pub use config::{Config, SupervisorConfig};
pub use harness::{Action, Harness, HarnessKind};
pub use response::{Response, ResponseStatus};
pub use state::{Run, RunStatus, State};
pub use supervisor::Supervisor;
pub use tools::{ToolError, ToolExecutor, ToolRegistry};
pub use trigger::{Mode, TriggerRequest};
pub use workflow::{Workflow, WorkflowRunner};

/// Crate-level error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unroutable trigger: {0}")]
    UnroutableTrigger(String),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Checkpoint store unavailable: {0}")]
    CheckpointUnavailable(String),

    #[error("Run {run_id} timed out after {elapsed:?}")]
    RunTimeout { run_id: String, elapsed: Duration },

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Invalid run transition: {from} -> {to}")]
    InvalidTransition { from: RunStatus, to: RunStatus },

    #[error("Harness error: {0}")]
    Harness(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Workflow error: {0}")]
    Workflow(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
