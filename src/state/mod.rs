//! Run state
//!
//! The working memory of one run. A [`State`] embeds its [`Run`] and is
//! snapshotted whole at every step boundary, so everything here is plain
//! serializable data:
//! - Ordered, append-only message history
//! - Findings and recommendations (append-only, superseded not removed)
//! - Tool invocation log and action markers for at-most-once side effects

mod findings;

pub use findings::{
    CheckStatus, ConstitutionCheck, Effort, FileChange, Finding, Priority, ProposedChange,
    Recommendation, RecommendedAction, Report, ReportSection, RiskAssessment,
    RollbackComplexity, Severity,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::trigger::{Mode, ParsedEvent, TriggerRequest};
use crate::workflow::gate::GateDecision;
use crate::{Error, Result};

/// Run lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created, no step executed yet
    Pending,
    /// Executing steps
    Running,
    /// Stopped at a step boundary, resumable
    Suspended,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        use RunStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Failed)
                | (Running, Suspended)
                | (Running, Completed)
                | (Running, Failed)
                | (Suspended, Running)
                | (Suspended, Failed)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Suspended => "suspended",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        };
        f.pad(s)
    }
}

/// One execution of the agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub mode: Mode,
    /// Full trigger input
    pub request: TriggerRequest,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Run {
    pub fn new(mode: Mode, request: TriggerRequest) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            mode,
            request,
            status: RunStatus::Pending,
            created_at: now,
            updated_at: now,
            error: None,
        }
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow
    pub fn transition(&mut self, next: RunStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Mark failed from any non-terminal status
    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        self.transition(RunStatus::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Conversation history entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Step that produced the message
    pub step: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

/// Outcome of one tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Ok { output: Value },
    Error { error: String },
}

/// Log entry for a tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool: String,
    pub arguments: Value,
    pub step: String,
    pub outcome: ToolOutcome,
    pub attempts: u32,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// About to invoke; the outcome is unknown if the run stops here
    Intent,
    Done,
    Failed,
}

/// Marker for a side-effecting action, keyed by a stable action key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionMarker {
    pub key: String,
    pub tool: String,
    pub status: ActionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// A completed step boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    /// Checkpoint key of the boundary, `name` or `name#k` for repeats
    pub label: String,
    /// Length of the message history at the boundary
    #[serde(default)]
    pub messages: usize,
    pub completed_at: DateTime<Utc>,
}

/// Working memory of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub run: Run,
    /// Next step to execute; `None` once the workflow finished
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub steps: Vec<StepRecord>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub recommendations: Vec<Recommendation>,
    #[serde(default)]
    pub risk_assessment: Option<RiskAssessment>,
    #[serde(default)]
    pub constitution_checks: Vec<ConstitutionCheck>,
    #[serde(default)]
    pub tool_invocations: Vec<ToolInvocation>,
    #[serde(default)]
    pub actions: Vec<ActionMarker>,
    /// Reasoning-driven tool calls spent so far
    #[serde(default)]
    pub tool_calls_used: usize,
    /// Step outputs shared with later steps
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
    /// Work items planned by the workflow (scheduled checks)
    #[serde(default)]
    pub plan: Vec<String>,
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub proposed_change: Option<ProposedChange>,
    #[serde(default)]
    pub gate: Option<GateDecision>,
    #[serde(default)]
    pub event: Option<ParsedEvent>,
    #[serde(default)]
    pub report: Option<Report>,
    #[serde(default)]
    pub human_review_required: bool,
    /// Answer is best-effort (budget exhausted)
    #[serde(default)]
    pub partial: bool,
    /// Whether checkpoints of this run were persisted
    #[serde(default = "default_resumable")]
    pub resumable: bool,
    #[serde(default)]
    pub errors: Vec<String>,
}

fn default_resumable() -> bool {
    true
}

impl State {
    pub fn new(run: Run) -> Self {
        Self {
            run,
            cursor: None,
            steps: Vec::new(),
            messages: Vec::new(),
            findings: Vec::new(),
            recommendations: Vec::new(),
            risk_assessment: None,
            constitution_checks: Vec::new(),
            tool_invocations: Vec::new(),
            actions: Vec::new(),
            tool_calls_used: 0,
            context: BTreeMap::new(),
            plan: Vec::new(),
            answer: None,
            confidence: None,
            proposed_change: None,
            gate: None,
            event: None,
            report: None,
            human_review_required: false,
            partial: false,
            resumable: true,
            errors: Vec::new(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run.id
    }

    pub fn mode(&self) -> Mode {
        self.run.mode
    }

    pub fn request(&self) -> &TriggerRequest {
        &self.run.request
    }

    pub fn push_message(&mut self, role: Role, content: impl Into<String>, step: &str) {
        self.messages.push(Message {
            role,
            content: content.into(),
            step: step.to_string(),
            tool_call_id: None,
        });
    }

    pub fn push_tool_message(&mut self, call_id: &str, content: impl Into<String>, step: &str) {
        self.messages.push(Message {
            role: Role::Tool,
            content: content.into(),
            step: step.to_string(),
            tool_call_id: Some(call_id.to_string()),
        });
    }

    /// Number of reasoning turns already taken in `step`
    pub fn reasoning_turns(&self, step: &str) -> usize {
        self.messages
            .iter()
            .filter(|m| m.role == Role::Assistant && m.step == step)
            .count()
    }

    /// Reasoning turns taken in `step` since the last step boundary, i.e.
    /// within the current execution of the step
    pub fn turns_since_boundary(&self, step: &str) -> usize {
        let start = self.steps.last().map(|s| s.messages).unwrap_or(0);
        self.messages
            .iter()
            .skip(start)
            .filter(|m| m.role == Role::Assistant && m.step == step)
            .count()
    }

    /// Record a finding, assigning its id. A current finding with the same
    /// subject and category is superseded, never removed.
    pub fn add_finding(&mut self, mut finding: Finding) -> String {
        let id = format!("F-{}", self.findings.len() + 1);
        finding.supersedes = self
            .current_findings()
            .into_iter()
            .rev()
            .find(|f| f.subject == finding.subject && f.category == finding.category)
            .map(|f| f.id.clone());
        finding.id = id.clone();
        self.findings.push(finding);
        id
    }

    /// Findings not superseded by a later one
    pub fn current_findings(&self) -> Vec<&Finding> {
        self.findings
            .iter()
            .filter(|f| {
                !self
                    .findings
                    .iter()
                    .any(|other| other.supersedes.as_deref() == Some(f.id.as_str()))
            })
            .collect()
    }

    /// Record a recommendation, assigning its id and clamping confidence
    pub fn add_recommendation(&mut self, mut recommendation: Recommendation) -> String {
        let id = format!("R-{}", self.recommendations.len() + 1);
        recommendation.id = id.clone();
        recommendation.confidence = recommendation.confidence.clamp(0.0, 1.0);
        self.recommendations.push(recommendation);
        id
    }

    pub fn action(&self, key: &str) -> Option<&ActionMarker> {
        self.actions.iter().find(|a| a.key == key)
    }

    /// Insert or update the marker for `key`
    pub fn mark_action(
        &mut self,
        key: &str,
        tool: &str,
        status: ActionStatus,
        result: Option<Value>,
        error: Option<String>,
    ) {
        let marker = ActionMarker {
            key: key.to_string(),
            tool: tool.to_string(),
            status,
            result,
            error,
            recorded_at: Utc::now(),
        };
        match self.actions.iter_mut().find(|a| a.key == key) {
            Some(existing) => *existing = marker,
            None => self.actions.push(marker),
        }
    }

    /// Keys of actions that completed
    pub fn actions_taken(&self) -> Vec<String> {
        self.actions
            .iter()
            .filter(|a| a.status == ActionStatus::Done)
            .map(|a| a.key.clone())
            .collect()
    }

    /// Record a finished step and return its checkpoint label
    pub fn complete_step(&mut self, name: &str) -> String {
        let repeats = self.steps.iter().filter(|s| s.name == name).count();
        let label = if repeats == 0 {
            name.to_string()
        } else {
            format!("{}#{}", name, repeats + 1)
        };
        self.steps.push(StepRecord {
            name: name.to_string(),
            label: label.clone(),
            messages: self.messages.len(),
            completed_at: Utc::now(),
        });
        label
    }

    pub fn record_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }
}
