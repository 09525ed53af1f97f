//! Supervisor: routes triggers to mode workflows and owns run lifecycles
//!
//! ```text
//! trigger ─ classify ─▶ mode ─▶ Run(pending → running)
//!                                 │  checkpoint "start"
//!                                 ▼
//!                         WorkflowRunner (steps, checkpoints)
//!                                 │
//!                                 ▼
//!                  finalize ─▶ Response (completed | partial | failed | suspended)
//! ```
//!
//! Only an unroutable trigger comes back as an `Err` from `execute`. On
//! resume, an unknown run id or an unreadable checkpoint store is an `Err`
//! too, as there is no state to report on. Everything that happens inside a
//! run is reported in the [`Response`].

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::checkpoint::{Checkpoint, CheckpointStore, RunSummary};
use crate::config::SupervisorConfig;
use crate::harness::Harness;
use crate::response::Response;
use crate::state::{Run, RunStatus, State};
use crate::tools::ToolRegistry;
use crate::trigger::{Cadence, Mode, TriggerRequest, WebhookEvent};
use crate::workflow::{
    workflow_for, Checkpointer, RunOutcome, StepEnv, Workflow, WorkflowRunner,
};
use crate::{Error, Result};

/// Route a trigger to exactly one mode. Webhook and scheduled triggers must
/// also name an event or cadence the workflow can serve.
pub fn classify(request: &TriggerRequest) -> Result<Mode> {
    let raw = request
        .mode
        .as_deref()
        .ok_or_else(|| Error::UnroutableTrigger("trigger has no mode".to_string()))?;
    let mode: Mode = raw.parse()?;

    match mode {
        Mode::Webhook => {
            WebhookEvent::from_payload(&request.trigger)?;
        }
        Mode::Scheduled => {
            Cadence::from_payload(&request.trigger)?;
        }
        Mode::OnDemand | Mode::Background => {}
    }
    Ok(mode)
}

pub struct Supervisor {
    config: SupervisorConfig,
    harness: Arc<dyn Harness>,
    tools: Arc<ToolRegistry>,
    store: Arc<dyn CheckpointStore>,
}

impl Supervisor {
    pub fn new(
        config: SupervisorConfig,
        harness: Arc<dyn Harness>,
        tools: Arc<ToolRegistry>,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            config,
            harness,
            tools,
            store,
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    pub fn classify(&self, request: &TriggerRequest) -> Result<Mode> {
        classify(request)
    }

    /// Classify and run a trigger to completion
    pub async fn execute(&self, request: TriggerRequest) -> Result<Response> {
        self.execute_with_cancel(request, CancellationToken::new()).await
    }

    /// Like [`Supervisor::execute`]; cancelling the token suspends the run at
    /// the next step boundary.
    pub async fn execute_with_cancel(
        &self,
        request: TriggerRequest,
        cancel: CancellationToken,
    ) -> Result<Response> {
        let mode = self.classify(&request).map_err(|e| {
            warn!("Rejected trigger: {}", e);
            e
        })?;

        let mut state = State::new(Run::new(mode, request));
        info!("Run {} started in {} mode", state.run_id(), mode);
        state.run.transition(RunStatus::Running)?;

        let workflow = workflow_for(mode);
        state.cursor = Some(workflow.entry().to_string());

        let checkpointer = Checkpointer::new(self.store.clone(), mode.requires_durability());
        if let Err(e) = checkpointer.save(&mut state, "start").await {
            error!("Run {} could not start: {}", state.run_id(), e);
            state.record_error(e.to_string());
            state.run.fail(e.to_string())?;
            return Ok(Response::from_state(&state, Some(&e)));
        }

        Ok(self.drive(workflow.as_ref(), state, &checkpointer, cancel).await)
    }

    /// Continue a run from its latest checkpoint
    pub async fn resume(&self, run_id: &str) -> Result<Response> {
        self.resume_with_cancel(run_id, CancellationToken::new()).await
    }

    pub async fn resume_with_cancel(
        &self,
        run_id: &str,
        cancel: CancellationToken,
    ) -> Result<Response> {
        let checkpoint = self
            .store
            .load_latest(run_id)
            .await?
            .ok_or_else(|| Error::RunNotFound(run_id.to_string()))?;
        let Checkpoint {
            step,
            sequence,
            mut state,
            ..
        } = checkpoint;

        if state.run.status.is_terminal() {
            info!("Run {} already {}", run_id, state.run.status);
            return Ok(Response::from_state(&state, None));
        }

        info!(
            "Resuming run {} ({} mode) from checkpoint {} #{}",
            run_id,
            state.mode(),
            step,
            sequence
        );
        if state.run.status != RunStatus::Running {
            state.run.transition(RunStatus::Running)?;
        }
        state.run.error = None;

        let mode = state.mode();
        let workflow = workflow_for(mode);
        let checkpointer = Checkpointer::new(self.store.clone(), mode.requires_durability());
        Ok(self.drive(workflow.as_ref(), state, &checkpointer, cancel).await)
    }

    async fn drive(
        &self,
        workflow: &dyn Workflow,
        state: State,
        checkpointer: &Checkpointer,
        cancel: CancellationToken,
    ) -> Response {
        let env = StepEnv {
            config: &self.config,
            harness: self.harness.as_ref(),
            tools: &self.tools,
            checkpointer,
        };
        let outcome = WorkflowRunner::new(env, cancel).run(workflow, state).await;
        self.finalize(outcome, checkpointer).await
    }

    /// Complete a finished run and project it into a response. A durable run
    /// whose final checkpoint cannot be written is reported failed.
    pub async fn finalize(&self, outcome: RunOutcome, checkpointer: &Checkpointer) -> Response {
        let RunOutcome { mut state, error } = outcome;

        let finished = error.is_none()
            && state.run.status == RunStatus::Running
            && state.cursor.is_none();
        if finished {
            let mut done = state.clone();
            let saved = match done.run.transition(RunStatus::Completed) {
                Ok(()) => checkpointer.save(&mut done, "finalize").await,
                Err(e) => Err(e),
            };
            match saved {
                Ok(()) => {
                    info!(
                        "Run {} completed ({} finding(s), {} action(s))",
                        done.run_id(),
                        done.current_findings().len(),
                        done.actions_taken().len()
                    );
                    state = done;
                }
                Err(e) => {
                    error!("Run {} could not be finalized: {}", state.run_id(), e);
                    state.record_error(e.to_string());
                    if let Err(t) = state.run.fail(e.to_string()) {
                        warn!("Run {}: {}", state.run_id(), t);
                    }
                    return Response::from_state(&state, Some(&e));
                }
            }
        }

        Response::from_state(&state, error.as_ref())
    }

    /// Latest checkpoint of every run
    pub async fn runs(&self) -> Result<Vec<RunSummary>> {
        self.store.runs().await
    }

    /// All checkpoints of one run
    pub async fn checkpoints(&self, run_id: &str) -> Result<Vec<Checkpoint>> {
        self.store.list(run_id).await
    }
}
