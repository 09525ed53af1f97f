//! Auto-action gate
//!
//! Decides whether a proposed repository change may be applied without a
//! human. The gate is a pure function of configuration and run state.

use serde::{Deserialize, Serialize};

use crate::config::SupervisorConfig;
use crate::state::State;

/// Outcome of the gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GateDecision {
    /// Apply the change automatically
    AutoAction,
    /// Hand the change to a human, with the reasons
    HumanReview { reasons: Vec<String> },
}

impl GateDecision {
    pub fn is_auto(&self) -> bool {
        matches!(self, GateDecision::AutoAction)
    }

    pub fn reasons(&self) -> &[String] {
        match self {
            GateDecision::AutoAction => &[],
            GateDecision::HumanReview { reasons } => reasons,
        }
    }
}

/// Evaluate the gate. Auto-action requires every one of: auto-merge enabled,
/// no opt-out on the trigger, a risk confidence at or above the threshold,
/// every constitution check passing and a proposed change to apply.
pub fn evaluate_gate(config: &SupervisorConfig, state: &State) -> GateDecision {
    let mut reasons = Vec::new();

    if !config.auto_merge_enabled {
        reasons.push("auto-merge is disabled".to_string());
    }
    if state.request().auto_merge_opt_out() {
        reasons.push("trigger opted out of auto-merge".to_string());
    }

    match &state.risk_assessment {
        None => reasons.push("no risk assessment".to_string()),
        Some(risk) => {
            if risk.confidence < config.auto_merge_min_confidence {
                reasons.push(format!(
                    "confidence {:.2} is below threshold {:.2}",
                    risk.confidence, config.auto_merge_min_confidence
                ));
            }
            if risk.requires_human_review {
                reasons.push("risk assessment requires human review".to_string());
            }
        }
    }

    if state.proposed_change.is_none() {
        reasons.push("no proposed change".to_string());
    } else if state.constitution_checks.is_empty() {
        reasons.push("no constitution checks recorded".to_string());
    }

    for check in state.constitution_checks.iter().filter(|c| !c.status.passes()) {
        reasons.push(format!(
            "constitution check {} ({}) failed: {}",
            check.rule, check.principle, check.detail
        ));
    }

    if reasons.is_empty() {
        GateDecision::AutoAction
    } else {
        GateDecision::HumanReview { reasons }
    }
}
