//! Result entities accumulated by a run

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Info
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.pad(s)
    }
}

/// An observation about the codebase. Immutable once recorded; a newer
/// finding on the same subject and category supersedes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Assigned by [`crate::State::add_finding`]
    #[serde(default)]
    pub id: String,
    /// File, issue or pull request the finding is about
    pub subject: String,
    pub category: String,
    #[serde(default)]
    pub severity: Severity,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
    /// Step or tool that produced it
    #[serde(default)]
    pub source: String,
    /// Id of the finding this one replaces
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<String>,
}

impl Finding {
    pub fn new(subject: impl Into<String>, category: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            subject: subject.into(),
            category: category.into(),
            severity: Severity::default(),
            title: title.into(),
            description: String::new(),
            recommendation: None,
            source: String::new(),
            supersedes: None,
        }
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }
}

/// What a recommendation asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    OpenPullRequest,
    MergePullRequest,
    PostComment,
    ApplyLabels,
    Investigate,
    NoAction,
}

impl Default for RecommendedAction {
    fn default() -> Self {
        RecommendedAction::Investigate
    }
}

impl RecommendedAction {
    /// Whether following the recommendation changes repository contents
    pub fn mutates_repository(&self) -> bool {
        matches!(
            self,
            RecommendedAction::OpenPullRequest | RecommendedAction::MergePullRequest
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    P0,
    P1,
    P2,
    P3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effort {
    Low,
    Medium,
    High,
}

/// A proposed action derived from findings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    #[serde(default)]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub action: RecommendedAction,
    /// Clamped to [0, 1] when recorded
    #[serde(default)]
    pub confidence: f64,
    /// Finding ids this rests on
    #[serde(default)]
    pub derived_from: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effort: Option<Effort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_owner: Option<String>,
}

impl Recommendation {
    pub fn new(title: impl Into<String>, action: RecommendedAction, confidence: f64) -> Self {
        Self {
            id: String::new(),
            title: title.into(),
            description: String::new(),
            action,
            confidence,
            derived_from: Vec::new(),
            priority: None,
            effort: None,
            suggested_owner: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackComplexity {
    Trivial,
    Simple,
    Moderate,
    Complex,
}

/// Confidence and review requirement for a proposed change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub confidence: f64,
    #[serde(default)]
    pub requires_human_review: bool,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blast_radius: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_complexity: Option<RollbackComplexity>,
    #[serde(default)]
    pub details: String,
    /// Why the assessment asks for review, if it does
    #[serde(default)]
    pub reasons: Vec<String>,
}

impl RiskAssessment {
    pub fn new(confidence: f64) -> Self {
        Self {
            confidence: confidence.clamp(0.0, 1.0),
            requires_human_review: false,
            severity: Severity::Low,
            blast_radius: None,
            rollback_complexity: None,
            details: String::new(),
            reasons: Vec::new(),
        }
    }
}

/// Outcome of one constitution rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pass,
    Fail,
    Warning,
}

impl CheckStatus {
    /// Warnings are advisory; only `Fail` blocks the gate.
    pub fn passes(&self) -> bool {
        !matches!(self, CheckStatus::Fail)
    }
}

/// A project-rule compliance result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstitutionCheck {
    /// Principle number, e.g. `III`
    pub rule: String,
    /// Principle name
    #[serde(default)]
    pub principle: String,
    pub status: CheckStatus,
    #[serde(default)]
    pub detail: String,
    #[serde(default)]
    pub file_references: Vec<String>,
}

impl ConstitutionCheck {
    pub fn new(rule: &str, principle: &str, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            rule: rule.to_string(),
            principle: principle.to_string(),
            status,
            detail: detail.into(),
            file_references: Vec::new(),
        }
    }
}

/// One file of a proposed change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    #[serde(default)]
    pub content: String,
}

/// Code change a background or webhook run wants to ship
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProposedChange {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub branch: String,
    pub commit_message: String,
    #[serde(default)]
    pub files: Vec<FileChange>,
}

/// One executed health check inside a report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportSection {
    pub check: String,
    #[serde(default)]
    pub notes: String,
    /// Finding ids raised by this check
    #[serde(default)]
    pub findings: Vec<String>,
    /// Suggested follow-ups; never executed
    #[serde(default)]
    pub follow_ups: Vec<String>,
}

/// Scheduled health report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub cadence: String,
    pub date: NaiveDate,
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub sections: Vec<ReportSection>,
}

impl Report {
    /// Render as markdown
    pub fn to_markdown(&self) -> String {
        let mut out = format!("# {}\n\n{}\n", self.title, self.summary);
        for section in &self.sections {
            out.push_str(&format!("\n## {}\n\n", section.check));
            if !section.notes.is_empty() {
                out.push_str(&section.notes);
                out.push('\n');
            }
            for follow_up in &section.follow_ups {
                out.push_str(&format!("- {}\n", follow_up));
            }
        }
        out
    }
}
