//! Reasoning capability abstraction
//!
//! Supports:
//! - HTTP (a JSON reasoning endpoint fronting the model)
//! - Scripted (per-step scripts for replays and tests)
//!
//! A harness sees the run state and the tools it may call, and answers with
//! the next [`Action`]: call some tools, or give an answer.

mod http;
mod scripted;

pub use http::HttpHarness;
pub use scripted::ScriptedHarness;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::state::{Finding, ProposedChange, Recommendation, RiskAssessment, State};
use crate::tools::{ToolCall, ToolSpec};
use crate::{Config, Error, Result};

/// One reasoning turn
pub struct ReasoningRequest<'a> {
    /// Workflow step asking
    pub step: &'a str,
    /// What the step wants from this turn
    pub instruction: String,
    pub state: &'a State,
    /// Tools the harness may request; empty means answer directly
    pub tools: Vec<&'a ToolSpec>,
}

/// Structured answer of a reasoning turn
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub recommendations: Vec<Recommendation>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub proposed_change: Option<ProposedChange>,
    #[serde(default)]
    pub risk: Option<RiskAssessment>,
    /// Labels to apply (triage)
    #[serde(default)]
    pub labels: Vec<String>,
}

impl Answer {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }
}

/// What the harness wants next
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    CallTools {
        calls: Vec<ToolCall>,
        #[serde(default)]
        thought: String,
    },
    Answer(Answer),
}

/// Harness kind enum for config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HarnessKind {
    Http,
    Scripted,
}

impl std::fmt::Display for HarnessKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HarnessKind::Http => write!(f, "http"),
            HarnessKind::Scripted => write!(f, "scripted"),
        }
    }
}

impl std::str::FromStr for HarnessKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "http" | "api" => Ok(HarnessKind::Http),
            "scripted" | "script" => Ok(HarnessKind::Scripted),
            _ => Err(Error::Config(format!("Unknown harness kind: {}", s))),
        }
    }
}

/// Core harness trait
#[async_trait]
pub trait Harness: Send + Sync {
    /// Name of this harness
    fn name(&self) -> &str;

    /// What kind of harness this is
    fn kind(&self) -> HarnessKind;

    /// Produce the next action for a reasoning turn
    async fn next_action(&self, request: ReasoningRequest<'_>) -> Result<Action>;
}

/// Create a harness based on configuration
pub fn create_harness(config: &Config) -> Result<Arc<dyn Harness>> {
    let kind: HarnessKind = config.harness.kind.parse()?;

    match kind {
        HarnessKind::Http => Ok(Arc::new(HttpHarness::new(&config.harness)?)),
        HarnessKind::Scripted => {
            let path = config.harness.script.as_deref().ok_or_else(|| {
                Error::Config("harness.script is required for the scripted harness".to_string())
            })?;
            Ok(Arc::new(ScriptedHarness::load(path)?))
        }
    }
}
