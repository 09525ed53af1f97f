//! Workflow runner
//!
//! Plays a [`Workflow`] step by step, handling:
//! - Checkpoints at every step boundary
//! - Cancellation (suspend at the next boundary)
//! - The run deadline
//! - Degraded persistence for modes that do not require durability

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{StepEnv, Transition, Workflow};
use crate::checkpoint::CheckpointStore;
use crate::state::{RunStatus, State};
use crate::{Error, Result};

/// Saves run state under a durability policy.
///
/// A durable checkpointer surfaces every store failure. A non-durable one
/// logs the failure, marks the state non-resumable and stops writing.
pub struct Checkpointer {
    store: Arc<dyn CheckpointStore>,
    durable: bool,
}

impl Checkpointer {
    pub fn new(store: Arc<dyn CheckpointStore>, durable: bool) -> Self {
        Self { store, durable }
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    /// Persist `state` under `label`
    pub async fn save(&self, state: &mut State, label: &str) -> Result<()> {
        if !self.durable && !state.resumable {
            return Ok(());
        }

        match self.store.save(state.run_id(), label, state).await {
            Ok(checkpoint) => {
                debug!(
                    "Checkpoint {} #{} for run {}",
                    label,
                    checkpoint.sequence,
                    state.run_id()
                );
                Ok(())
            }
            Err(e) if !self.durable => {
                warn!(
                    "Checkpoint store {} unavailable for run {}, continuing in memory: {}",
                    self.store.name(),
                    state.run_id(),
                    e
                );
                state.resumable = false;
                state.record_error(e.to_string());
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Result of playing a workflow
#[derive(Debug)]
pub struct RunOutcome {
    pub state: State,
    /// Error that stopped the run, if any
    pub error: Option<Error>,
}

/// Drives one run through its workflow
pub struct WorkflowRunner<'a> {
    env: StepEnv<'a>,
    cancel: CancellationToken,
    timeout: Duration,
}

impl<'a> WorkflowRunner<'a> {
    pub fn new(env: StepEnv<'a>, cancel: CancellationToken) -> Self {
        let timeout = env.config.run_timeout;
        Self {
            env,
            cancel,
            timeout,
        }
    }

    /// Play `workflow` from `state.cursor` until it finishes, fails,
    /// times out or is cancelled. `state.run` must be running.
    pub async fn run(&self, workflow: &dyn Workflow, mut state: State) -> RunOutcome {
        let deadline = Instant::now() + self.timeout;

        while let Some(step) = state.cursor.clone() {
            if self.cancel.is_cancelled() {
                return self.suspend(state, &step).await;
            }

            info!("Run {}: step {}", state.run_id(), step);
            let snapshot = state.clone();
            let result =
                tokio::time::timeout_at(deadline, workflow.step(&step, &mut state, &self.env))
                    .await;

            match result {
                Err(_) => return self.time_out(snapshot, state, &step).await,
                Ok(Err(e)) => return self.fail(state, &step, e).await,
                Ok(Ok(transition)) => {
                    let label = state.complete_step(&step);
                    state.cursor = match transition {
                        Transition::Next(next) => Some(next.to_string()),
                        Transition::Finish => None,
                    };
                    if let Err(e) = self.env.checkpointer.save(&mut state, &label).await {
                        return self.fail(state, &step, e).await;
                    }
                }
            }
        }

        RunOutcome { state, error: None }
    }

    async fn suspend(&self, mut state: State, step: &str) -> RunOutcome {
        info!("Run {} cancelled, suspending before {}", state.run_id(), step);
        if let Err(e) = state.run.transition(RunStatus::Suspended) {
            return self.fail(state, step, e).await;
        }
        if let Err(e) = self.env.checkpointer.save(&mut state, "suspend").await {
            return self.fail(state, step, e).await;
        }
        RunOutcome { state, error: None }
    }

    /// The in-flight step is discarded; its action markers are kept so a
    /// resumed run never repeats a side effect that may have happened.
    async fn time_out(&self, snapshot: State, in_flight: State, step: &str) -> RunOutcome {
        let mut state = snapshot;
        state.actions = in_flight.actions;

        let err = Error::RunTimeout {
            run_id: state.run_id().to_string(),
            elapsed: self.timeout,
        };
        error!("{} (during {})", err, step);
        state.record_error(err.to_string());

        match state.run.transition(RunStatus::Suspended) {
            Ok(()) => state.run.error = Some(err.to_string()),
            Err(e) => warn!("Run {}: {}", state.run_id(), e),
        }
        if let Err(e) = self.env.checkpointer.save(&mut state, "timeout").await {
            warn!("Could not checkpoint timed out run {}: {}", state.run_id(), e);
        }

        RunOutcome {
            state,
            error: Some(err),
        }
    }

    async fn fail(&self, mut state: State, step: &str, err: Error) -> RunOutcome {
        error!("Run {} failed at step {}: {}", state.run_id(), step, err);
        state.record_error(err.to_string());
        if !state.run.status.is_terminal() {
            if let Err(e) = state.run.fail(err.to_string()) {
                warn!("Run {}: {}", state.run_id(), e);
            }
        }
        if let Err(e) = self.env.checkpointer.save(&mut state, "failed").await {
            warn!("Could not checkpoint failed run {}: {}", state.run_id(), e);
        }

        RunOutcome {
            state,
            error: Some(err),
        }
    }
}
