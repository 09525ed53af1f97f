//! Mode workflows
//!
//! Each mode is a small graph of named steps played by the
//! [`WorkflowRunner`]. A step reads and updates the run [`State`] and names
//! the step that follows; the runner owns everything between steps:
//!
//! - **Checkpoints**: one per completed step, keyed by the step label
//! - **Cancellation**: observed at step boundaries only
//! - **Deadline**: the run timeout covers the whole execution
//!
//! ```text
//! on-demand   gather_context ⟲ → synthesize
//! background  fetch_context → analyze → propose → constitution_check
//!             → assess_risk → gate → auto_action | request_review
//! scheduled   plan_checks → run_checks ⟲ → aggregate_report
//! webhook     parse_event → triage_issue → apply_triage
//!                         | review_pull_request → respond
//!                         | assess_push
//! ```

mod background;
pub mod consult;
pub mod gate;
mod on_demand;
mod runner;
mod scheduled;
mod webhook;

pub use background::BackgroundWorkflow;
pub use gate::{evaluate_gate, GateDecision};
pub use on_demand::OnDemandWorkflow;
pub use runner::{Checkpointer, RunOutcome, WorkflowRunner};
pub use scheduled::ScheduledWorkflow;
pub use webhook::WebhookWorkflow;

use async_trait::async_trait;

use crate::config::SupervisorConfig;
use crate::harness::Harness;
use crate::state::State;
use crate::tools::ToolRegistry;
use crate::trigger::Mode;
use crate::Result;

/// Where a step sends the run next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Next(&'static str),
    Finish,
}

/// Capabilities a step may use
pub struct StepEnv<'a> {
    pub config: &'a SupervisorConfig,
    pub harness: &'a dyn Harness,
    pub tools: &'a ToolRegistry,
    pub checkpointer: &'a Checkpointer,
}

/// A mode's step graph
#[async_trait]
pub trait Workflow: Send + Sync {
    fn mode(&self) -> Mode;

    /// First step of a fresh run
    fn entry(&self) -> &'static str;

    /// Every step name the workflow knows
    fn steps(&self) -> &'static [&'static str];

    /// Execute `step` against `state`
    async fn step(&self, step: &str, state: &mut State, env: &StepEnv<'_>) -> Result<Transition>;
}

/// The workflow that serves `mode`
pub fn workflow_for(mode: Mode) -> Box<dyn Workflow> {
    match mode {
        Mode::OnDemand => Box::new(OnDemandWorkflow),
        Mode::Background => Box::new(BackgroundWorkflow),
        Mode::Scheduled => Box::new(ScheduledWorkflow),
        Mode::Webhook => Box::new(WebhookWorkflow),
    }
}

/// Error for a step name the workflow does not define
pub(crate) fn unknown_step(mode: Mode, step: &str) -> crate::Error {
    crate::Error::Workflow(format!("{} workflow has no step '{}'", mode, step))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_mode_has_a_workflow() {
        for mode in Mode::ALL {
            let workflow = workflow_for(mode);
            assert_eq!(workflow.mode(), mode);
            assert!(workflow.steps().contains(&workflow.entry()));
        }
    }
}
