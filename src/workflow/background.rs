//! Background maintenance: issue to pull request
//!
//! ```text
//! fetch_context → analyze → propose → constitution_check → assess_risk
//!   → gate → auto_action | request_review
//! ```
//!
//! Nothing reaches the repository except through `auto_action` (after the
//! gate approved) or the review comment, both as at-most-once actions.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use super::consult::{self, perform_once};
use super::gate::{evaluate_gate, GateDecision};
use super::{unknown_step, StepEnv, Transition, Workflow};
use crate::state::{
    CheckStatus, ConstitutionCheck, Finding, ProposedChange, RiskAssessment, Severity, State,
};
use crate::tools::constitution::{checks_from_output, language_for};
use crate::tools::{ToolCall, ToolPolicy};
use crate::trigger::Mode;
use crate::{Error, Result};

const FETCH: &str = "fetch_context";
const ANALYZE: &str = "analyze";
const PROPOSE: &str = "propose";
const CHECK: &str = "constitution_check";
const ASSESS: &str = "assess_risk";
const GATE: &str = "gate";
const AUTO_ACTION: &str = "auto_action";
const REQUEST_REVIEW: &str = "request_review";

/// Labels that mark issues as candidates for autonomous work
const WORK_QUEUE_LABELS: [&str; 3] = ["amber:auto-fix", "good-first-issue", "technical-debt"];

pub struct BackgroundWorkflow;

#[async_trait]
impl Workflow for BackgroundWorkflow {
    fn mode(&self) -> Mode {
        Mode::Background
    }

    fn entry(&self) -> &'static str {
        FETCH
    }

    fn steps(&self) -> &'static [&'static str] {
        &[
            FETCH,
            ANALYZE,
            PROPOSE,
            CHECK,
            ASSESS,
            GATE,
            AUTO_ACTION,
            REQUEST_REVIEW,
        ]
    }

    async fn step(&self, step: &str, state: &mut State, env: &StepEnv<'_>) -> Result<Transition> {
        match step {
            FETCH => fetch_context(state, env).await,
            ANALYZE => {
                analyze(state, env, ANALYZE).await?;
                Ok(Transition::Next(PROPOSE))
            }
            PROPOSE => {
                if propose(state, env, PROPOSE).await? {
                    Ok(Transition::Next(CHECK))
                } else {
                    Ok(Transition::Finish)
                }
            }
            CHECK => {
                check_proposed_change(state, env, CHECK).await;
                Ok(Transition::Next(ASSESS))
            }
            ASSESS => assess_risk(state, env).await,
            GATE => Ok(gate(state, env)),
            AUTO_ACTION => auto_action(state, env).await,
            REQUEST_REVIEW => request_review(state, env).await,
            other => Err(unknown_step(Mode::Background, other)),
        }
    }
}

fn repo(state: &State) -> Result<String> {
    state
        .request()
        .repo_full_name()
        .ok_or_else(|| Error::Workflow(format!("{} trigger has no repository", state.mode())))
}

fn issue_number(state: &State) -> Option<u64> {
    state.request().issue_number().or_else(|| {
        state
            .context
            .get("issue")
            .and_then(|issue| issue.get("number"))
            .and_then(Value::as_u64)
    })
}

async fn fetch_context(state: &mut State, env: &StepEnv<'_>) -> Result<Transition> {
    let repo = repo(state)?;

    if let Some(number) = state.request().issue_number() {
        let call = ToolCall::new(
            "github_get_issue",
            json!({"repo_full_name": repo, "issue_number": number}),
        );
        if let Some(issue) =
            consult::invoke_recorded(state, env, FETCH, &call, ToolPolicy::ReadOnly).await
        {
            state.context.insert("issue".to_string(), issue);
        }
        return Ok(Transition::Next(ANALYZE));
    }

    let mut queue = Vec::new();
    for label in WORK_QUEUE_LABELS {
        let call = ToolCall::new(
            "github_list_issues",
            json!({"repo_full_name": repo, "state": "open", "labels": [label], "max_results": 10}),
        );
        if let Some(output) =
            consult::invoke_recorded(state, env, FETCH, &call, ToolPolicy::ReadOnly).await
        {
            for issue in output
                .get("issues")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
            {
                let number = issue.get("number").and_then(Value::as_u64);
                let seen = queue
                    .iter()
                    .any(|q: &Value| q.get("number").and_then(Value::as_u64) == number);
                if !seen {
                    queue.push(issue.clone());
                }
            }
        }
    }

    match queue.first().cloned() {
        Some(issue) => {
            info!(
                "Run {}: {} work item(s) queued",
                state.run_id(),
                queue.len()
            );
            state.context.insert("issue".to_string(), issue);
            state
                .context
                .insert("work_queue".to_string(), Value::Array(queue));
            Ok(Transition::Next(ANALYZE))
        }
        None => {
            state.answer = Some(format!("No work items found in {}", repo));
            Ok(Transition::Finish)
        }
    }
}

fn issue_summary(state: &State) -> String {
    match state.context.get("issue") {
        Some(issue) => format!(
            "#{} {}\n\n{}",
            issue.get("number").and_then(Value::as_u64).unwrap_or_default(),
            issue.get("title").and_then(Value::as_str).unwrap_or_default(),
            issue.get("body").and_then(Value::as_str).unwrap_or_default()
        ),
        None => state
            .event
            .as_ref()
            .map(|e| {
                format!(
                    "{}\n\n{}",
                    e.title.as_deref().unwrap_or_default(),
                    e.body.as_deref().unwrap_or_default()
                )
            })
            .unwrap_or_default(),
    }
}

/// Investigate the work item with read-only tools and record findings
async fn analyze(state: &mut State, env: &StepEnv<'_>, step: &str) -> Result<()> {
    let instruction = format!(
        "Analyze this work item. Locate the affected code and record findings.\n\n{}",
        issue_summary(state)
    );
    match consult::consult(state, env, step, &instruction).await? {
        Some(answer) => {
            consult::record_answer(state, &answer, step, false);
            state
                .context
                .insert(step.to_string(), Value::String(answer.content));
        }
        None => {
            state.add_finding(
                Finding::new(step, "incomplete", "Analysis stopped at the tool budget")
                    .severity(Severity::Low)
                    .source(step),
            );
        }
    }
    Ok(())
}

/// Ask for a concrete change. Returns whether one was proposed.
async fn propose(state: &mut State, env: &StepEnv<'_>, step: &str) -> Result<bool> {
    let instruction = "Propose a minimal change for the findings so far: title, branch, \
                       conventional commit message and full file contents. Include \
                       recommendations and your confidence.";
    let Some(answer) = consult::ask(state, env, step, instruction).await? else {
        return Ok(false);
    };

    consult::record_answer(state, &answer, step, true);
    match answer.proposed_change {
        Some(mut change) => {
            if change.branch.is_empty() {
                change.branch = match issue_number(state) {
                    Some(number) => format!("amber/issue-{}", number),
                    None => format!("amber/{}", &state.run_id()[..8]),
                };
            }
            state.proposed_change = Some(change);
            Ok(true)
        }
        None => {
            state.answer = Some(answer.content);
            Ok(false)
        }
    }
}

/// Check a commit message or title with the commit format rule
pub(super) async fn check_message(
    state: &mut State,
    env: &StepEnv<'_>,
    step: &str,
    message: &str,
    subject: &str,
) {
    let call = ToolCall::new("check_commit_format", json!({"commit_message": message}));
    record_checks(state, env, step, &call, subject).await;
}

/// Check one file with every checker that applies to its language
pub(super) async fn check_file(
    state: &mut State,
    env: &StepEnv<'_>,
    step: &str,
    path: &str,
    code: &str,
) {
    let language = match language_for(path) {
        Some(language) => language,
        None => return,
    };

    let mut calls = Vec::new();
    match language {
        "go" => calls.push(ToolCall::new(
            "check_go_error_handling",
            json!({"code": code, "file_path": path}),
        )),
        "typescript" => calls.push(ToolCall::new(
            "check_typescript_type_safety",
            json!({"code": code, "file_path": path}),
        )),
        _ => {}
    }
    calls.push(ToolCall::new(
        "check_structured_logging",
        json!({"code": code, "file_path": path, "language": language}),
    ));

    for call in calls {
        record_checks(state, env, step, &call, path).await;
    }
}

/// A checker that cannot run counts as a failed check
async fn record_checks(
    state: &mut State,
    env: &StepEnv<'_>,
    step: &str,
    call: &ToolCall,
    subject: &str,
) {
    match consult::invoke_recorded(state, env, step, call, ToolPolicy::ReadOnly).await {
        Some(output) => state.constitution_checks.extend(checks_from_output(&output)),
        None => {
            let mut check = ConstitutionCheck::new(
                &call.name,
                "Unverified",
                CheckStatus::Fail,
                format!("{} could not run", call.name),
            );
            check.file_references.push(subject.to_string());
            state.constitution_checks.push(check);
        }
    }
}

async fn check_proposed_change(state: &mut State, env: &StepEnv<'_>, step: &str) {
    let Some(change) = state.proposed_change.clone() else {
        return;
    };
    let ProposedChange {
        commit_message,
        files,
        ..
    } = change;

    check_message(state, env, step, &commit_message, "commit").await;
    for file in files {
        check_file(state, env, step, &file.path, &file.content).await;
    }
}

async fn assess_risk(state: &mut State, env: &StepEnv<'_>) -> Result<Transition> {
    let failing = state
        .constitution_checks
        .iter()
        .filter(|c| !c.status.passes())
        .count();
    let instruction = format!(
        "Assess the risk of the proposed change: confidence in [0, 1], severity, \
         blast radius and rollback complexity. {} constitution check(s) failed.",
        failing
    );

    let answer = consult::ask(state, env, ASSESS, &instruction).await?;
    let mut risk = match answer {
        Some(answer) => answer
            .risk
            .or_else(|| answer.confidence.map(RiskAssessment::new))
            .unwrap_or_else(|| RiskAssessment::new(0.0)),
        None => RiskAssessment::new(0.0),
    };
    risk.confidence = risk.confidence.clamp(0.0, 1.0);
    if failing > 0 {
        risk.requires_human_review = true;
        risk.reasons
            .push(format!("{} constitution check(s) failed", failing));
    }

    state.confidence = Some(risk.confidence);
    state.risk_assessment = Some(risk);
    Ok(Transition::Next(GATE))
}

fn gate(state: &mut State, env: &StepEnv<'_>) -> Transition {
    let decision = evaluate_gate(env.config, state);
    info!("Run {}: gate decided {:?}", state.run_id(), decision);
    let next = match &decision {
        GateDecision::AutoAction => AUTO_ACTION,
        GateDecision::HumanReview { .. } => {
            state.human_review_required = true;
            REQUEST_REVIEW
        }
    };
    state.gate = Some(decision);
    Transition::Next(next)
}

async fn auto_action(state: &mut State, env: &StepEnv<'_>) -> Result<Transition> {
    let repo = repo(state)?;
    let change = state
        .proposed_change
        .clone()
        .ok_or_else(|| Error::Workflow("auto_action without a proposed change".to_string()))?;

    let body = match issue_number(state) {
        Some(number) => format!("{}\n\nCloses #{}", change.description, number),
        None => change.description.clone(),
    };
    let files: Vec<Value> = change
        .files
        .iter()
        .map(|f| json!({"path": f.path, "content": f.content}))
        .collect();
    let create = ToolCall::new(
        "github_create_pr",
        json!({
            "repo_full_name": repo,
            "title": change.title,
            "body": body,
            "head": change.branch,
            "base": "main",
            "commit_message": change.commit_message,
            "files": files,
        }),
    );

    let pr_number = perform_once(state, env, AUTO_ACTION, "create_pr", create)
        .await?
        .and_then(|pr| pr.get("number").and_then(Value::as_u64));
    let Some(pr_number) = pr_number else {
        state.human_review_required = true;
        return Ok(Transition::Next(REQUEST_REVIEW));
    };

    let merge = ToolCall::new(
        "github_merge_pr",
        json!({"repo_full_name": repo, "pr_number": pr_number, "merge_method": "squash"}),
    );
    let merged = perform_once(state, env, AUTO_ACTION, "merge_pr", merge)
        .await?
        .and_then(|m| m.get("merged").and_then(Value::as_bool))
        .unwrap_or(false);

    if merged {
        state.answer = Some(format!("Opened and merged pull request #{}", pr_number));
    } else {
        state.human_review_required = true;
        state.answer = Some(format!(
            "Opened pull request #{}; merge did not complete",
            pr_number
        ));
    }
    Ok(Transition::Finish)
}

/// Markdown body for the review request comment
fn review_comment(state: &State) -> String {
    let mut body = String::from("## Amber needs a human review\n\n");
    if let Some(change) = &state.proposed_change {
        body.push_str(&format!("Proposed change: **{}**\n\n", change.title));
    }
    if let Some(decision) = &state.gate {
        if !decision.reasons().is_empty() {
            body.push_str("### Why\n\n");
            for reason in decision.reasons() {
                body.push_str(&format!("- {}\n", reason));
            }
            body.push('\n');
        }
    }
    let findings = state.current_findings();
    if !findings.is_empty() {
        body.push_str("### Findings\n\n");
        for finding in findings {
            body.push_str(&format!(
                "- [{}] {}: {}\n",
                finding.severity, finding.subject, finding.title
            ));
        }
        body.push('\n');
    }
    if !state.recommendations.is_empty() {
        body.push_str("### Recommendations\n\n");
        for rec in &state.recommendations {
            body.push_str(&format!("- {} (confidence {:.2})\n", rec.title, rec.confidence));
        }
    }
    body
}

async fn request_review(state: &mut State, env: &StepEnv<'_>) -> Result<Transition> {
    state.human_review_required = true;
    let repo = repo(state)?;

    match issue_number(state) {
        Some(number) => {
            let call = ToolCall::new(
                "github_create_issue_comment",
                json!({"repo_full_name": repo, "issue_number": number, "body": review_comment(state)}),
            );
            perform_once(state, env, REQUEST_REVIEW, "review_comment", call).await?;
            state.answer = Some(format!("Requested human review on #{}", number));
        }
        None => {
            state.answer = Some("Human review required; no issue to comment on".to_string());
        }
    }
    Ok(Transition::Finish)
}
