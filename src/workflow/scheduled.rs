//! Scheduled health checks
//!
//! Report-only: every tool reachable from here is read-only and
//! recommendations are turned into report follow-ups, never into actions.

use async_trait::async_trait;
use serde_json::Value;

use super::consult;
use super::{unknown_step, StepEnv, Transition, Workflow};
use crate::state::{Report, ReportSection, Severity, State};
use crate::trigger::{Cadence, Mode};
use crate::{Error, Result};

const PLAN: &str = "plan_checks";
const RUN: &str = "run_checks";
const AGGREGATE: &str = "aggregate_report";

/// Check battery for a cadence, in execution order
pub fn battery(cadence: Cadence) -> &'static [&'static str] {
    match cadence {
        Cadence::Nightly => &["dependency_freshness", "security_advisories", "ci_status"],
        Cadence::Weekly => &["issue_backlog", "stale_issues", "test_coverage"],
        Cadence::Monthly => &["architecture_review", "tech_debt", "constitution_audit"],
    }
}

fn check_instruction(check: &str) -> &'static str {
    match check {
        "dependency_freshness" => "List outdated dependencies and how far behind they are.",
        "security_advisories" => "Look for dependencies or code affected by known advisories.",
        "ci_status" => "Summarize recent CI health from the commit history.",
        "issue_backlog" => "Summarize the open issue backlog by label and age.",
        "stale_issues" => "Find issues with no activity in the last 30 days.",
        "test_coverage" => "Find packages or modules without tests.",
        "architecture_review" => "Review module boundaries and dependency direction.",
        "tech_debt" => "Identify the largest sources of technical debt.",
        "constitution_audit" => "Audit recent changes against the project constitution.",
        _ => "Run the named health check.",
    }
}

pub struct ScheduledWorkflow;

#[async_trait]
impl Workflow for ScheduledWorkflow {
    fn mode(&self) -> Mode {
        Mode::Scheduled
    }

    fn entry(&self) -> &'static str {
        PLAN
    }

    fn steps(&self) -> &'static [&'static str] {
        &[PLAN, RUN, AGGREGATE]
    }

    async fn step(&self, step: &str, state: &mut State, env: &StepEnv<'_>) -> Result<Transition> {
        match step {
            PLAN => plan_checks(state),
            RUN => run_checks(state, env).await,
            AGGREGATE => aggregate_report(state),
            other => Err(unknown_step(Mode::Scheduled, other)),
        }
    }
}

fn cadence(state: &State) -> Result<Cadence> {
    Cadence::from_payload(&state.request().trigger)
}

fn plan_checks(state: &mut State) -> Result<Transition> {
    let cadence = cadence(state)?;
    state.plan = battery(cadence).iter().map(|c| c.to_string()).collect();
    state.context.insert(
        "cadence".to_string(),
        Value::String(cadence.as_str().to_string()),
    );

    let date = state.run.created_at.date_naive();
    state.report = Some(Report {
        cadence: cadence.as_str().to_string(),
        date,
        title: format!("{} Health Check - {}", cadence.title(), date.format("%Y-%m-%d")),
        summary: String::new(),
        sections: Vec::new(),
    });
    Ok(Transition::Next(RUN))
}

/// One check per execution; loops until the plan is done
async fn run_checks(state: &mut State, env: &StepEnv<'_>) -> Result<Transition> {
    let done = state.steps.iter().filter(|s| s.name == RUN).count();
    let check = state
        .plan
        .get(done)
        .cloned()
        .ok_or_else(|| Error::Workflow("run_checks past the end of the plan".to_string()))?;

    let instruction = format!("Health check `{}`: {}", check, check_instruction(&check));
    let mut section = ReportSection {
        check: check.clone(),
        ..Default::default()
    };
    match consult::consult(state, env, RUN, &instruction).await? {
        Some(answer) => {
            section.findings = consult::record_answer(state, &answer, &check, false);
            section.notes = answer.content;
            section.follow_ups = answer
                .recommendations
                .iter()
                .map(|r| r.title.clone())
                .collect();
        }
        None => section.notes = "Check incomplete: tool budget exhausted.".to_string(),
    }

    if let Some(report) = state.report.as_mut() {
        report.sections.push(section);
    }

    if done + 1 < state.plan.len() {
        Ok(Transition::Next(RUN))
    } else {
        Ok(Transition::Next(AGGREGATE))
    }
}

fn aggregate_report(state: &mut State) -> Result<Transition> {
    let findings = state.current_findings();
    let count = |severity: Severity| findings.iter().filter(|f| f.severity == severity).count();
    let summary = format!(
        "{} check(s) run, {} finding(s): {} critical, {} high.",
        state.plan.len(),
        findings.len(),
        count(Severity::Critical),
        count(Severity::High)
    );
    let attention = count(Severity::Critical) + count(Severity::High) > 0;

    let report = state
        .report
        .as_mut()
        .ok_or_else(|| Error::Workflow("aggregate_report without a planned report".to_string()))?;
    report.summary = summary;
    let markdown = report.to_markdown();

    state.human_review_required = attention;
    state.answer = Some(markdown);
    Ok(Transition::Finish)
}
