//! Shared builders for integration tests
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use amber::checkpoint::CheckpointStore;
use amber::config::{SupervisorConfig, ToolsConfig};
use amber::harness::{Action, Answer, ScriptedHarness};
use amber::state::{
    FileChange, Finding, ProposedChange, Recommendation, RecommendedAction, RiskAssessment,
    Severity,
};
use amber::tools::{FixtureExecutor, ToolCall, ToolRegistry};
use amber::{Response, Supervisor, TriggerRequest};
use serde_json::{json, Value};

pub fn fast_tools() -> ToolsConfig {
    ToolsConfig {
        backoff: Duration::from_millis(1),
        ..Default::default()
    }
}

pub fn auto_merge() -> SupervisorConfig {
    SupervisorConfig {
        auto_merge_enabled: true,
        ..Default::default()
    }
}

pub fn supervisor(
    config: SupervisorConfig,
    harness: ScriptedHarness,
    executor: Arc<FixtureExecutor>,
    store: Arc<dyn CheckpointStore>,
) -> Supervisor {
    let tools = ToolRegistry::new(executor, &fast_tools()).expect("catalog compiles");
    Supervisor::new(config, Arc::new(harness), Arc::new(tools), store)
}

pub fn answer(content: &str) -> Action {
    Action::Answer(Answer::text(content))
}

pub fn call(name: &str, arguments: Value) -> Action {
    Action::CallTools {
        calls: vec![ToolCall::new(name, arguments)],
        thought: String::new(),
    }
}

pub fn background_request() -> TriggerRequest {
    TriggerRequest::new("background", json!({"repo": "acme/app", "issue_number": 42}))
}

/// Fixtures for the issue-to-PR flow of issue #42
pub fn background_fixtures() -> Arc<FixtureExecutor> {
    let executor = FixtureExecutor::new();
    executor.respond(
        "github_get_issue",
        json!({"number": 42, "title": "Typo in README", "body": "'teh' should be 'the'"}),
    );
    executor.respond(
        "grep_codebase",
        json!({"matches": [{"file": "README.md", "line": 3, "text": "teh project"}]}),
    );
    executor.respond(
        "github_create_pr",
        json!({"number": 7, "url": "https://github.com/acme/app/pull/7"}),
    );
    executor.respond("github_merge_pr", json!({"merged": true}));
    executor.respond("github_create_issue_comment", json!({"id": 1001}));
    Arc::new(executor)
}

pub fn readme_fix() -> Vec<FileChange> {
    vec![FileChange {
        path: "README.md".to_string(),
        content: "# the project\n".to_string(),
    }]
}

pub fn panicking_go_file() -> Vec<FileChange> {
    vec![FileChange {
        path: "cmd/server/main.go".to_string(),
        content: "package main\n\nfunc main() {\n\tpanic(\"boom\")\n}\n".to_string(),
    }]
}

/// Scripts for analyze, propose and assess_risk
pub fn background_harness(files: Vec<FileChange>, confidence: f64) -> ScriptedHarness {
    let analysis = Answer {
        content: "README.md line 3 misspells 'the'".to_string(),
        findings: vec![Finding::new("README.md", "typo", "Misspelled word")
            .severity(Severity::Low)],
        ..Default::default()
    };
    let proposal = Answer {
        content: "Fix the typo".to_string(),
        recommendations: vec![Recommendation::new(
            "Fix typo in README",
            RecommendedAction::OpenPullRequest,
            confidence,
        )],
        confidence: Some(confidence),
        proposed_change: Some(ProposedChange {
            title: "Fix typo in README".to_string(),
            description: "Corrects 'teh' to 'the'.".to_string(),
            branch: String::new(),
            commit_message: "docs: fix typo in readme".to_string(),
            files,
        }),
        ..Default::default()
    };
    let risk = Answer {
        risk: Some(RiskAssessment::new(confidence)),
        ..Default::default()
    };

    ScriptedHarness::new()
        .step(
            "analyze",
            vec![
                call("grep_codebase", json!({"pattern": "teh"})),
                Action::Answer(analysis),
            ],
        )
        .step("propose", vec![Action::Answer(proposal)])
        .step("assess_risk", vec![Action::Answer(risk)])
}

/// Response with the run id blanked, for comparing two runs
pub fn without_run_id(response: &Response) -> Response {
    Response {
        run_id: String::new(),
        ..response.clone()
    }
}
