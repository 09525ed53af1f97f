//! Reasoning and tool plumbing shared by the mode workflows
//!
//! - [`reason`]: one reasoning turn, running any read-only tools it asks for
//! - [`consult`]: turns until an answer or the tool budget runs out
//! - [`invoke_recorded`]: a logged tool call whose failure becomes a finding
//! - [`perform_once`]: an at-most-once side effect guarded by action markers

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::StepEnv;
use crate::harness::{Action, Answer, ReasoningRequest};
use crate::state::{
    ActionStatus, Finding, Role, Severity, State, ToolInvocation, ToolOutcome,
};
use crate::tools::{ToolCall, ToolError, ToolPolicy};
use crate::Result;

/// Result of one reasoning turn
#[derive(Debug, Clone, PartialEq)]
pub enum Turn {
    Answered(Answer),
    /// Tools were called; another turn is needed
    Called,
    /// The tool budget or turn limit is spent
    Exhausted,
}

fn budget_left(state: &State, env: &StepEnv<'_>) -> usize {
    env.config.max_tool_calls.saturating_sub(state.tool_calls_used)
}

/// Run one reasoning turn for `step`. With `with_tools`, the harness is
/// offered the read-only tools while budget remains.
pub async fn reason(
    state: &mut State,
    env: &StepEnv<'_>,
    step: &str,
    instruction: &str,
    with_tools: bool,
) -> Result<Turn> {
    if state.turns_since_boundary(step) > env.config.max_tool_calls {
        warn!("Run {}: turn limit reached in {}", state.run_id(), step);
        state.partial = true;
        return Ok(Turn::Exhausted);
    }

    let tools = if with_tools && budget_left(state, env) > 0 {
        env.tools.available(ToolPolicy::ReadOnly)
    } else {
        Vec::new()
    };
    let offered = !tools.is_empty();

    let action = env
        .harness
        .next_action(ReasoningRequest {
            step,
            instruction: instruction.to_string(),
            state,
            tools,
        })
        .await?;

    match action {
        Action::Answer(answer) => {
            state.push_message(Role::Assistant, answer.content.clone(), step);
            Ok(Turn::Answered(answer))
        }
        Action::CallTools { calls, thought } => {
            let names: Vec<&str> = calls.iter().map(|c| c.name.as_str()).collect();
            let note = if thought.is_empty() {
                format!("Calling {}", names.join(", "))
            } else {
                thought
            };
            state.push_message(Role::Assistant, note, step);

            if calls.is_empty() {
                warn!("Run {}: empty tool request in {}", state.run_id(), step);
                state.partial = true;
                return Ok(Turn::Exhausted);
            }

            if !offered {
                warn!(
                    "Run {}: tools requested in {} without budget or offer",
                    state.run_id(),
                    step
                );
                state.partial = true;
                return Ok(Turn::Exhausted);
            }

            for call in &calls {
                if budget_left(state, env) == 0 {
                    info!(
                        "Run {}: tool budget of {} spent",
                        state.run_id(),
                        env.config.max_tool_calls
                    );
                    state.partial = true;
                    return Ok(Turn::Exhausted);
                }
                state.tool_calls_used += 1;
                invoke_recorded(state, env, step, call, ToolPolicy::ReadOnly).await;
            }
            Ok(Turn::Called)
        }
    }
}

/// Reason with tools until an answer. `None` when the budget ran out first.
pub async fn consult(
    state: &mut State,
    env: &StepEnv<'_>,
    step: &str,
    instruction: &str,
) -> Result<Option<Answer>> {
    loop {
        match reason(state, env, step, instruction, true).await? {
            Turn::Answered(answer) => return Ok(Some(answer)),
            Turn::Called => continue,
            Turn::Exhausted => return Ok(None),
        }
    }
}

/// A single tool-less turn. `None` if the harness asked for tools anyway.
pub async fn ask(
    state: &mut State,
    env: &StepEnv<'_>,
    step: &str,
    instruction: &str,
) -> Result<Option<Answer>> {
    match reason(state, env, step, instruction, false).await? {
        Turn::Answered(answer) => Ok(Some(answer)),
        Turn::Called | Turn::Exhausted => Ok(None),
    }
}

/// Invoke a tool and log the invocation. A failure is recorded as a
/// finding and `None` is returned; it never aborts the step.
pub async fn invoke_recorded(
    state: &mut State,
    env: &StepEnv<'_>,
    step: &str,
    call: &ToolCall,
    policy: ToolPolicy,
) -> Option<Value> {
    let call_id = if call.id.is_empty() {
        format!("{}-{}", step, state.tool_invocations.len() + 1)
    } else {
        call.id.clone()
    };

    let report = env
        .tools
        .invoke(&call.name, call.arguments.clone(), policy)
        .await;
    debug!(
        "Tool {} finished after {} attempt(s) in {:?}",
        call.name, report.attempts, report.duration
    );

    let outcome = match &report.output {
        Ok(output) => ToolOutcome::Ok {
            output: output.clone(),
        },
        Err(e) => ToolOutcome::Error {
            error: e.to_string(),
        },
    };
    state.tool_invocations.push(ToolInvocation {
        tool: call.name.clone(),
        arguments: call.arguments.clone(),
        step: step.to_string(),
        outcome,
        attempts: report.attempts,
        duration_ms: report.duration.as_millis() as u64,
    });

    match report.output {
        Ok(output) => {
            state.push_tool_message(&call_id, output.to_string(), step);
            Some(output)
        }
        Err(e) => {
            warn!("Run {}: {}", state.run_id(), e);
            state.push_tool_message(&call_id, json!({"error": e.to_string()}).to_string(), step);
            record_tool_failure(state, step, &e);
            None
        }
    }
}

fn record_tool_failure(state: &mut State, step: &str, err: &ToolError) {
    let severity = match err {
        ToolError::Forbidden { .. } => Severity::High,
        _ => Severity::Medium,
    };
    state.add_finding(
        Finding::new(err.tool(), "tool_error", format!("Tool {} failed", err.tool()))
            .severity(severity)
            .description(err.to_string())
            .source(step),
    );
}

/// Perform a side-effecting call at most once per run, keyed by `key`.
///
/// An intent marker is checkpointed before the call and a done marker
/// after. A marker left at intent means the outcome is unknown; the call is
/// not repeated and the run is flagged for human review.
pub async fn perform_once(
    state: &mut State,
    env: &StepEnv<'_>,
    step: &str,
    key: &str,
    call: ToolCall,
) -> Result<Option<Value>> {
    if let Some(marker) = state.action(key) {
        match marker.status {
            ActionStatus::Done => {
                info!("Action {} already performed, skipping", key);
                return Ok(marker.result.clone());
            }
            ActionStatus::Failed => return Ok(None),
            ActionStatus::Intent => {
                warn!(
                    "Run {}: action {} was interrupted, outcome unknown",
                    state.run_id(),
                    key
                );
                let tool = marker.tool.clone();
                state.mark_action(
                    key,
                    &tool,
                    ActionStatus::Failed,
                    None,
                    Some("interrupted before completion; not retried".to_string()),
                );
                state.add_finding(
                    Finding::new(key, "unverified_action", format!("Outcome of {} unknown", tool))
                        .severity(Severity::High)
                        .description("The run stopped while this action was in flight.")
                        .source(step),
                );
                state.human_review_required = true;
                env.checkpointer.save(state, &format!("done:{}", key)).await?;
                return Ok(None);
            }
        }
    }

    info!("Run {}: performing {} via {}", state.run_id(), key, call.name);
    state.mark_action(key, &call.name, ActionStatus::Intent, None, None);
    env.checkpointer.save(state, &format!("intent:{}", key)).await?;

    let output = invoke_recorded(state, env, step, &call, ToolPolicy::Unrestricted).await;
    match &output {
        Some(result) => state.mark_action(
            key,
            &call.name,
            ActionStatus::Done,
            Some(result.clone()),
            None,
        ),
        None => {
            let error = state
                .tool_invocations
                .last()
                .and_then(|inv| match &inv.outcome {
                    ToolOutcome::Error { error } => Some(error.clone()),
                    ToolOutcome::Ok { .. } => None,
                });
            state.mark_action(key, &call.name, ActionStatus::Failed, None, error);
        }
    }
    env.checkpointer.save(state, &format!("done:{}", key)).await?;
    Ok(output)
}

/// Record an answer's findings (and optionally recommendations) as coming
/// from `step`. Returns the new finding ids.
pub fn record_answer(
    state: &mut State,
    answer: &Answer,
    step: &str,
    with_recommendations: bool,
) -> Vec<String> {
    let ids: Vec<String> = answer
        .findings
        .iter()
        .cloned()
        .map(|mut finding| {
            if finding.source.is_empty() {
                finding.source = step.to_string();
            }
            state.add_finding(finding)
        })
        .collect();

    if with_recommendations {
        for recommendation in &answer.recommendations {
            let mut recommendation = recommendation.clone();
            if recommendation.derived_from.is_empty() {
                recommendation.derived_from = ids.clone();
            }
            state.add_recommendation(recommendation);
        }
    }

    if let Some(confidence) = answer.confidence {
        state.confidence = Some(confidence.clamp(0.0, 1.0));
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{CheckpointStore, MemoryCheckpointStore};
    use crate::config::{SupervisorConfig, ToolsConfig};
    use crate::harness::ScriptedHarness;
    use crate::state::{Recommendation, RecommendedAction, Run};
    use crate::tools::{FixtureExecutor, ToolRegistry};
    use crate::trigger::{Mode, TriggerRequest};
    use crate::workflow::Checkpointer;
    use std::sync::Arc;

    struct Env {
        config: SupervisorConfig,
        harness: ScriptedHarness,
        tools: ToolRegistry,
        executor: Arc<FixtureExecutor>,
        store: Arc<MemoryCheckpointStore>,
        checkpointer: Checkpointer,
    }

    impl Env {
        fn new(harness: ScriptedHarness, max_tool_calls: usize) -> Self {
            let executor = Arc::new(FixtureExecutor::new());
            let store = Arc::new(MemoryCheckpointStore::new());
            Self {
                config: SupervisorConfig {
                    max_tool_calls,
                    ..Default::default()
                },
                harness,
                tools: ToolRegistry::new(executor.clone(), &ToolsConfig::default()).unwrap(),
                executor,
                store: store.clone(),
                checkpointer: Checkpointer::new(store, true),
            }
        }

        fn step_env(&self) -> StepEnv<'_> {
            StepEnv {
                config: &self.config,
                harness: &self.harness,
                tools: &self.tools,
                checkpointer: &self.checkpointer,
            }
        }
    }

    fn state() -> State {
        State::new(Run::new(Mode::OnDemand, TriggerRequest::default()))
    }

    fn grep_call() -> Action {
        Action::CallTools {
            calls: vec![ToolCall::new("grep_codebase", json!({"pattern": "auth"}))],
            thought: String::new(),
        }
    }

    #[tokio::test]
    async fn test_consult_runs_tools_then_answers() {
        let env = Env::new(
            ScriptedHarness::new().step(
                "explore",
                vec![grep_call(), Action::Answer(Answer::text("in auth.go"))],
            ),
            5,
        );
        env.executor
            .respond("grep_codebase", json!({"matches": [{"file": "auth.go", "line": 3}]}));
        let mut state = state();

        let answer = consult(&mut state, &env.step_env(), "explore", "find auth")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(answer.content, "in auth.go");
        assert_eq!(state.tool_calls_used, 1);
        assert_eq!(state.tool_invocations.len(), 1);
        assert_eq!(state.reasoning_turns("explore"), 2);
        assert!(state
            .messages
            .iter()
            .any(|m| m.role == Role::Tool && m.content.contains("auth.go")));
    }

    #[tokio::test]
    async fn test_budget_exhaustion_is_partial() {
        let env = Env::new(ScriptedHarness::new().step("explore", vec![grep_call()]), 2);
        env.executor.respond("grep_codebase", json!({"matches": []}));
        let mut state = state();

        let answer = consult(&mut state, &env.step_env(), "explore", "find auth")
            .await
            .unwrap();

        assert!(answer.is_none());
        assert!(state.partial);
        assert_eq!(env.executor.call_count("grep_codebase"), 2);
    }

    #[tokio::test]
    async fn test_turn_limit_resets_per_step_execution() {
        let env = Env::new(
            ScriptedHarness::new().step(
                "run_checks",
                vec![
                    grep_call(),
                    Action::Answer(Answer::text("first ok")),
                    Action::Answer(Answer::text("second ok")),
                ],
            ),
            1,
        );
        env.executor.respond("grep_codebase", json!({"matches": []}));
        let mut state = state();

        let first = consult(&mut state, &env.step_env(), "run_checks", "check one")
            .await
            .unwrap();
        state.complete_step("run_checks");
        let second = consult(&mut state, &env.step_env(), "run_checks", "check two")
            .await
            .unwrap();

        assert_eq!(first.unwrap().content, "first ok");
        assert_eq!(second.unwrap().content, "second ok");
        assert!(!state.partial);
    }

    #[tokio::test]
    async fn test_empty_tool_request_ends_reasoning() {
        let env = Env::new(
            ScriptedHarness::new().step(
                "explore",
                vec![Action::CallTools {
                    calls: Vec::new(),
                    thought: "hmm".to_string(),
                }],
            ),
            5,
        );
        let mut state = state();

        let answer = consult(&mut state, &env.step_env(), "explore", "find auth")
            .await
            .unwrap();

        assert!(answer.is_none());
        assert!(state.partial);
        assert_eq!(state.tool_calls_used, 0);
    }

    #[tokio::test]
    async fn test_tool_failure_becomes_finding() {
        let env = Env::new(ScriptedHarness::new(), 5);
        let mut state = state();

        let output = invoke_recorded(
            &mut state,
            &env.step_env(),
            "fetch_context",
            &ToolCall::new("read_file", json!({"path": "missing.go"})),
            ToolPolicy::ReadOnly,
        )
        .await;

        assert!(output.is_none());
        let finding = &state.findings[0];
        assert_eq!(finding.category, "tool_error");
        assert_eq!(finding.source, "fetch_context");
        assert!(matches!(
            state.tool_invocations[0].outcome,
            ToolOutcome::Error { .. }
        ));
    }

    #[tokio::test]
    async fn test_mutation_forbidden_under_read_only() {
        let env = Env::new(ScriptedHarness::new(), 5);
        let mut state = state();

        let output = invoke_recorded(
            &mut state,
            &env.step_env(),
            "explore",
            &ToolCall::new(
                "github_merge_pr",
                json!({"repo_full_name": "acme/app", "pr_number": 4}),
            ),
            ToolPolicy::ReadOnly,
        )
        .await;

        assert!(output.is_none());
        assert_eq!(state.findings[0].severity, Severity::High);
        assert_eq!(env.executor.call_count("github_merge_pr"), 0);
    }

    #[tokio::test]
    async fn test_perform_once_skips_done_action() {
        let env = Env::new(ScriptedHarness::new(), 5);
        env.executor
            .respond("github_create_issue_comment", json!({"id": 77}));
        let mut state = state();
        let call = ToolCall::new(
            "github_create_issue_comment",
            json!({"repo_full_name": "acme/app", "issue_number": 3, "body": "hi"}),
        );

        let first = perform_once(&mut state, &env.step_env(), "respond", "comment", call.clone())
            .await
            .unwrap();
        let second = perform_once(&mut state, &env.step_env(), "respond", "comment", call)
            .await
            .unwrap();

        assert_eq!(first, Some(json!({"id": 77})));
        assert_eq!(second, first);
        assert_eq!(env.executor.call_count("github_create_issue_comment"), 1);
        assert_eq!(state.actions_taken(), vec!["comment".to_string()]);

        let labels: Vec<String> = env
            .store
            .list(state.run_id())
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.step)
            .collect();
        assert_eq!(labels, vec!["intent:comment".to_string(), "done:comment".to_string()]);
    }

    #[tokio::test]
    async fn test_interrupted_action_is_not_repeated() {
        let env = Env::new(ScriptedHarness::new(), 5);
        let mut state = state();
        state.mark_action("merge_pr", "github_merge_pr", ActionStatus::Intent, None, None);

        let output = perform_once(
            &mut state,
            &env.step_env(),
            "auto_action",
            "merge_pr",
            ToolCall::new(
                "github_merge_pr",
                json!({"repo_full_name": "acme/app", "pr_number": 4}),
            ),
        )
        .await
        .unwrap();

        assert!(output.is_none());
        assert!(state.human_review_required);
        assert_eq!(env.executor.call_count("github_merge_pr"), 0);
        assert_eq!(state.findings[0].category, "unverified_action");
    }

    #[test]
    fn test_record_answer_links_recommendations() {
        let mut state = state();
        let answer = Answer {
            findings: vec![Finding::new("auth.go", "bug", "Nil check missing")],
            recommendations: vec![Recommendation::new(
                "Add nil check",
                RecommendedAction::OpenPullRequest,
                1.4,
            )],
            confidence: Some(0.7),
            ..Default::default()
        };

        let ids = record_answer(&mut state, &answer, "analyze", true);

        assert_eq!(ids, vec!["F-1".to_string()]);
        assert_eq!(state.findings[0].source, "analyze");
        assert_eq!(state.recommendations[0].derived_from, ids);
        assert_eq!(state.recommendations[0].confidence, 1.0);
        assert_eq!(state.confidence, Some(0.7));
    }
}
