//! On-demand question answering
//!
//! `gather_context` takes one reasoning turn per step execution and loops on
//! itself, so every tool round trip is its own checkpoint. When the budget is
//! spent, `synthesize` produces a best-effort answer from what was gathered.

use async_trait::async_trait;

use super::consult::{self, Turn};
use super::{unknown_step, StepEnv, Transition, Workflow};
use crate::state::{Role, State, ToolOutcome};
use crate::trigger::Mode;
use crate::{Error, Result};

const GATHER: &str = "gather_context";
const SYNTHESIZE: &str = "synthesize";

pub struct OnDemandWorkflow;

#[async_trait]
impl Workflow for OnDemandWorkflow {
    fn mode(&self) -> Mode {
        Mode::OnDemand
    }

    fn entry(&self) -> &'static str {
        GATHER
    }

    fn steps(&self) -> &'static [&'static str] {
        &[GATHER, SYNTHESIZE]
    }

    async fn step(&self, step: &str, state: &mut State, env: &StepEnv<'_>) -> Result<Transition> {
        match step {
            GATHER => gather_context(state, env).await,
            SYNTHESIZE => synthesize(state, env).await,
            other => Err(unknown_step(Mode::OnDemand, other)),
        }
    }
}

async fn gather_context(state: &mut State, env: &StepEnv<'_>) -> Result<Transition> {
    let query = state
        .request()
        .query()
        .map(str::to_string)
        .ok_or_else(|| Error::Workflow("on-demand trigger has no query".to_string()))?;

    if !state.messages.iter().any(|m| m.role == Role::User) {
        state.push_message(Role::User, query.clone(), GATHER);
    }

    let instruction = format!(
        "Answer the question about the codebase: {}\nUse the tools to gather evidence first.",
        query
    );
    match consult::reason(state, env, GATHER, &instruction, true).await? {
        Turn::Answered(answer) => {
            consult::record_answer(state, &answer, GATHER, true);
            state.answer = Some(answer.content);
            Ok(Transition::Next(SYNTHESIZE))
        }
        Turn::Called => Ok(Transition::Next(GATHER)),
        Turn::Exhausted => Ok(Transition::Next(SYNTHESIZE)),
    }
}

async fn synthesize(state: &mut State, env: &StepEnv<'_>) -> Result<Transition> {
    if state.answer.is_some() {
        return Ok(Transition::Finish);
    }

    let instruction = "The tool budget is spent. Answer as well as possible from the \
                       context gathered so far and say what remains unverified.";
    match consult::ask(state, env, SYNTHESIZE, instruction).await {
        Ok(Some(answer)) => {
            consult::record_answer(state, &answer, SYNTHESIZE, true);
            state.answer = Some(answer.content);
        }
        Ok(None) => state.answer = Some(fallback_answer(state)),
        Err(e) => {
            state.record_error(e.to_string());
            state.answer = Some(fallback_answer(state));
        }
    }
    state.partial = true;
    Ok(Transition::Finish)
}

/// Answer assembled from tool results alone
fn fallback_answer(state: &State) -> String {
    let ok: Vec<&str> = state
        .tool_invocations
        .iter()
        .filter(|inv| matches!(inv.outcome, ToolOutcome::Ok { .. }))
        .map(|inv| inv.tool.as_str())
        .collect();
    if ok.is_empty() {
        "No answer could be produced: no context was gathered.".to_string()
    } else {
        format!(
            "Partial answer: gathered {} tool result(s) ({}) but could not synthesize an answer.",
            ok.len(),
            ok.join(", ")
        )
    }
}
