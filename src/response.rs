//! Caller-facing result of a run

use serde::{Deserialize, Serialize};

use crate::state::{
    ConstitutionCheck, Finding, Recommendation, Report, RiskAssessment, RunStatus, State,
};
use crate::trigger::Mode;
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Completed,
    /// Completed with a best-effort answer
    Partial,
    Failed,
    /// Stopped at a step boundary; resume with the run id
    Suspended,
}

/// Result returned to the caller of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub run_id: String,
    pub mode: Mode,
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    pub findings: Vec<Finding>,
    pub recommendations: Vec<Recommendation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_assessment: Option<RiskAssessment>,
    pub constitution_checks: Vec<ConstitutionCheck>,
    pub human_review_required: bool,
    /// Keys of side effects that completed
    pub actions_taken: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<Report>,
    /// Whether the run is backed by checkpoints. False when an on-demand
    /// run lost its store and continued in memory.
    pub resumable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    /// Project `state` (and the error that stopped it, if any) into a response
    pub fn from_state(state: &State, error: Option<&Error>) -> Self {
        let error = error
            .map(|e| e.to_string())
            .or_else(|| state.run.error.clone());

        let status = match state.run.status {
            RunStatus::Completed if state.partial => ResponseStatus::Partial,
            RunStatus::Completed => ResponseStatus::Completed,
            RunStatus::Suspended if error.is_some() => ResponseStatus::Failed,
            RunStatus::Suspended => ResponseStatus::Suspended,
            RunStatus::Pending | RunStatus::Running | RunStatus::Failed => ResponseStatus::Failed,
        };

        Self {
            run_id: state.run_id().to_string(),
            mode: state.mode(),
            status,
            answer: state.answer.clone(),
            findings: state.current_findings().into_iter().cloned().collect(),
            recommendations: state.recommendations.clone(),
            risk_assessment: state.risk_assessment.clone(),
            constitution_checks: state.constitution_checks.clone(),
            human_review_required: state.human_review_required,
            actions_taken: state.actions_taken(),
            report: state.report.clone(),
            resumable: state.resumable,
            error,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self.status,
            ResponseStatus::Completed | ResponseStatus::Partial
        )
    }
}
