//! Webhook reactions
//!
//! - issue opened: triage, then labels and a triage comment
//! - pull request opened: constitution review, comment only when needed
//! - push to main: impact assessment, no repository writes

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use super::background::{check_file, check_message};
use super::consult::{self, perform_once};
use super::gate::GateDecision;
use super::{unknown_step, StepEnv, Transition, Workflow};
use crate::state::{CheckStatus, Severity, State};
use crate::tools::{ToolCall, ToolPolicy};
use crate::trigger::{Mode, ParsedEvent, WebhookEvent};
use crate::{Error, Result};

const PARSE: &str = "parse_event";
const TRIAGE: &str = "triage_issue";
const APPLY_TRIAGE: &str = "apply_triage";
const REVIEW: &str = "review_pull_request";
const RESPOND: &str = "respond";
const ASSESS_PUSH: &str = "assess_push";

pub struct WebhookWorkflow;

#[async_trait]
impl Workflow for WebhookWorkflow {
    fn mode(&self) -> Mode {
        Mode::Webhook
    }

    fn entry(&self) -> &'static str {
        PARSE
    }

    fn steps(&self) -> &'static [&'static str] {
        &[PARSE, TRIAGE, APPLY_TRIAGE, REVIEW, RESPOND, ASSESS_PUSH]
    }

    async fn step(&self, step: &str, state: &mut State, env: &StepEnv<'_>) -> Result<Transition> {
        match step {
            PARSE => parse_event(state),
            TRIAGE => triage_issue(state, env).await,
            APPLY_TRIAGE => apply_triage(state, env).await,
            REVIEW => review_pull_request(state, env).await,
            RESPOND => respond(state, env).await,
            ASSESS_PUSH => assess_push(state, env).await,
            other => Err(unknown_step(Mode::Webhook, other)),
        }
    }
}

fn parse_event(state: &mut State) -> Result<Transition> {
    let trigger = &state.request().trigger;
    let kind = WebhookEvent::from_payload(trigger)?;
    let mut event = ParsedEvent::from_payload(trigger);
    if event.repo.is_empty() {
        event.repo = state.request().repo_full_name().unwrap_or_default();
    }
    info!(
        "Run {}: webhook {:?} on {}",
        state.run_id(),
        kind,
        event.repo
    );
    state.event = Some(event);

    Ok(Transition::Next(match kind {
        WebhookEvent::IssueOpened => TRIAGE,
        WebhookEvent::PullRequestOpened => REVIEW,
        WebhookEvent::PushToMain => ASSESS_PUSH,
    }))
}

fn event(state: &State) -> Result<ParsedEvent> {
    state
        .event
        .clone()
        .ok_or_else(|| Error::Workflow("webhook step before parse_event".to_string()))
}

/// Repository and item number a write targets
fn target(event: &ParsedEvent) -> Option<(String, u64)> {
    match (event.repo.is_empty(), event.number) {
        (false, Some(number)) => Some((event.repo.clone(), number)),
        _ => None,
    }
}

async fn triage_issue(state: &mut State, env: &StepEnv<'_>) -> Result<Transition> {
    let event = event(state)?;
    let instruction = format!(
        "Triage this new issue: affected component, severity, type and labels to apply.\n\n{}\n\n{}",
        event.title.as_deref().unwrap_or_default(),
        event.body.as_deref().unwrap_or_default()
    );

    match consult::consult(state, env, TRIAGE, &instruction).await? {
        Some(answer) => {
            consult::record_answer(state, &answer, TRIAGE, true);
            state
                .context
                .insert("labels".to_string(), json!(answer.labels));
            state
                .context
                .insert("triage".to_string(), Value::String(answer.content));
        }
        None => {
            state.context.insert(
                "triage".to_string(),
                Value::String("Triage incomplete: tool budget exhausted.".to_string()),
            );
        }
    }
    Ok(Transition::Next(APPLY_TRIAGE))
}

async fn apply_triage(state: &mut State, env: &StepEnv<'_>) -> Result<Transition> {
    let event = event(state)?;
    let Some((repo, number)) = target(&event) else {
        state.answer = state
            .context
            .get("triage")
            .and_then(Value::as_str)
            .map(str::to_string);
        return Ok(Transition::Finish);
    };

    let labels: Vec<String> = state
        .context
        .get("labels")
        .and_then(|l| serde_json::from_value(l.clone()).ok())
        .unwrap_or_default();
    if !labels.is_empty() {
        let call = ToolCall::new(
            "github_update_issue_labels",
            json!({"repo_full_name": repo, "issue_number": number, "labels": labels}),
        );
        perform_once(state, env, APPLY_TRIAGE, "apply_labels", call).await?;
    }

    let triage = state
        .context
        .get("triage")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let mut body = format!("## Triage\n\n{}\n", triage);
    if !labels.is_empty() {
        body.push_str(&format!("\nLabels: {}\n", labels.join(", ")));
    }
    let call = ToolCall::new(
        "github_create_issue_comment",
        json!({"repo_full_name": repo, "issue_number": number, "body": body}),
    );
    perform_once(state, env, APPLY_TRIAGE, "triage_comment", call).await?;

    state.answer = Some(triage);
    Ok(Transition::Finish)
}

async fn review_pull_request(state: &mut State, env: &StepEnv<'_>) -> Result<Transition> {
    let event = event(state)?;

    if let Some(title) = &event.title {
        check_message(state, env, REVIEW, title, "title").await;
    }
    for commit in &event.commits {
        check_message(state, env, REVIEW, commit, "commit").await;
    }
    for (path, content) in &event.files {
        check_file(state, env, REVIEW, path, content).await;
    }

    let instruction = format!(
        "Review pull request #{}: {}\n\n{}\nRecord findings for problems worth a comment.",
        event.number.unwrap_or_default(),
        event.title.as_deref().unwrap_or_default(),
        event.body.as_deref().unwrap_or_default()
    );
    if let Some(answer) = consult::consult(state, env, REVIEW, &instruction).await? {
        consult::record_answer(state, &answer, REVIEW, true);
        state
            .context
            .insert("review".to_string(), Value::String(answer.content));
    }
    Ok(Transition::Next(RESPOND))
}

/// Comment on the pull request only when a check or the review found
/// something. A failing check forces human review.
async fn respond(state: &mut State, env: &StepEnv<'_>) -> Result<Transition> {
    let event = event(state)?;

    let flagged: Vec<String> = state
        .constitution_checks
        .iter()
        .filter(|c| c.status != CheckStatus::Pass)
        .map(|c| {
            let refs = if c.file_references.is_empty() {
                String::new()
            } else {
                format!(" ({})", c.file_references.join(", "))
            };
            format!("**{:?}** {} {}: {}{}", c.status, c.rule, c.principle, c.detail, refs)
        })
        .collect();
    let concerns: Vec<String> = state
        .current_findings()
        .into_iter()
        .filter(|f| f.source == REVIEW && f.severity >= Severity::Medium)
        .map(|f| format!("[{}] {}: {}", f.severity, f.subject, f.title))
        .collect();

    let failures: Vec<String> = state
        .constitution_checks
        .iter()
        .filter(|c| !c.status.passes())
        .map(|c| format!("constitution check {} failed: {}", c.rule, c.detail))
        .collect();
    if !failures.is_empty() {
        state.human_review_required = true;
        state.gate = Some(GateDecision::HumanReview { reasons: failures });
    }

    if flagged.is_empty() && concerns.is_empty() {
        state.answer = Some("No issues found".to_string());
        return Ok(Transition::Finish);
    }

    let mut body = String::from("## Amber review\n\n");
    for line in flagged.iter().chain(concerns.iter()) {
        body.push_str(&format!("- {}\n", line));
    }
    if let Some(review) = state.context.get("review").and_then(Value::as_str) {
        body.push_str(&format!("\n{}\n", review));
    }

    if let Some((repo, number)) = target(&event) {
        let call = ToolCall::new(
            "github_create_issue_comment",
            json!({"repo_full_name": repo, "issue_number": number, "body": body}),
        );
        perform_once(state, env, RESPOND, "review_comment", call).await?;
    }
    state.answer = Some(body);
    Ok(Transition::Finish)
}

async fn assess_push(state: &mut State, env: &StepEnv<'_>) -> Result<Transition> {
    let event = event(state)?;

    let log = ToolCall::new("git_log", json!({"max_count": 20}));
    consult::invoke_recorded(state, env, ASSESS_PUSH, &log, ToolPolicy::ReadOnly).await;

    let instruction = format!(
        "Assess the impact of this push to main ({} commit(s)):\n{}",
        event.commits.len(),
        event.commits.join("\n")
    );
    match consult::consult(state, env, ASSESS_PUSH, &instruction).await? {
        Some(answer) => {
            consult::record_answer(state, &answer, ASSESS_PUSH, true);
            state.answer = Some(answer.content);
        }
        None => state.answer = Some("Push assessment incomplete.".to_string()),
    }
    Ok(Transition::Finish)
}
