//! Suspension, resumption and at-most-once side effects

mod common;

use std::sync::Arc;
use std::time::Duration;

use amber::checkpoint::{CheckpointStore, MemoryCheckpointStore};
use amber::config::SupervisorConfig;
use amber::harness::ScriptedHarness;
use amber::tools::FixtureExecutor;
use amber::{ResponseStatus, TriggerRequest};
use common::*;
use serde_json::json;
use tokio_util::sync::CancellationToken;

/// Cancel `token` as soon as `tool` is invoked
fn cancel_on(executor: &FixtureExecutor, tool: &'static str, token: &CancellationToken) {
    let token = token.clone();
    executor.on_invoke(move |name, _| {
        if name == tool {
            token.cancel();
        }
    });
}

#[tokio::test]
async fn test_resumed_run_matches_uninterrupted_run() {
    let baseline = supervisor(
        auto_merge(),
        background_harness(readme_fix(), 0.97),
        background_fixtures(),
        Arc::new(MemoryCheckpointStore::new()),
    )
    .execute(background_request())
    .await
    .unwrap();
    assert_eq!(baseline.status, ResponseStatus::Completed);

    let executor = background_fixtures();
    let token = CancellationToken::new();
    cancel_on(&executor, "github_get_issue", &token);
    let sup = supervisor(
        auto_merge(),
        background_harness(readme_fix(), 0.97),
        executor.clone(),
        Arc::new(MemoryCheckpointStore::new()),
    );

    let suspended = sup
        .execute_with_cancel(background_request(), token)
        .await
        .unwrap();
    assert_eq!(suspended.status, ResponseStatus::Suspended);
    assert!(suspended.resumable);
    assert!(suspended.actions_taken.is_empty());
    assert_eq!(executor.call_count("github_create_pr"), 0);

    let latest = sup
        .store()
        .load_latest(&suspended.run_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.step, "suspend");
    assert_eq!(latest.state.cursor.as_deref(), Some("analyze"));

    let resumed = sup.resume(&suspended.run_id).await.unwrap();
    assert_eq!(resumed.run_id, suspended.run_id);
    assert_eq!(without_run_id(&resumed), without_run_id(&baseline));
    assert_eq!(executor.call_count("github_get_issue"), 1);
    assert_eq!(executor.call_count("github_create_pr"), 1);
    assert_eq!(executor.call_count("github_merge_pr"), 1);
}

#[tokio::test]
async fn test_resume_never_repeats_completed_action() {
    // Record a full run, then resume a copy of it from the checkpoint
    // written right after the pull request was opened.
    let recorded = Arc::new(MemoryCheckpointStore::new());
    let first = supervisor(
        auto_merge(),
        background_harness(readme_fix(), 0.97),
        background_fixtures(),
        recorded.clone(),
    )
    .execute(background_request())
    .await
    .unwrap();

    let after_create = recorded
        .list(&first.run_id)
        .await
        .unwrap()
        .into_iter()
        .find(|c| c.step == "done:create_pr")
        .unwrap();
    assert_eq!(after_create.state.cursor.as_deref(), Some("auto_action"));

    let store = Arc::new(MemoryCheckpointStore::new());
    store
        .save(&first.run_id, &after_create.step, &after_create.state)
        .await
        .unwrap();

    let executor = FixtureExecutor::new();
    executor.respond("github_merge_pr", json!({"merged": true}));
    let executor = Arc::new(executor);
    let sup = supervisor(
        auto_merge(),
        background_harness(readme_fix(), 0.97),
        executor.clone(),
        store,
    );

    let resumed = sup.resume(&first.run_id).await.unwrap();

    assert_eq!(resumed.status, ResponseStatus::Completed);
    assert_eq!(resumed.actions_taken, vec!["create_pr", "merge_pr"]);
    assert_eq!(executor.call_count("github_create_pr"), 0);
    assert_eq!(executor.call_count("github_merge_pr"), 1);
}

#[tokio::test]
async fn test_interrupted_action_is_not_retried() {
    let recorded = Arc::new(MemoryCheckpointStore::new());
    let first = supervisor(
        auto_merge(),
        background_harness(readme_fix(), 0.97),
        background_fixtures(),
        recorded.clone(),
    )
    .execute(background_request())
    .await
    .unwrap();

    // The process died between the intent marker and the tool result
    let in_flight = recorded
        .list(&first.run_id)
        .await
        .unwrap()
        .into_iter()
        .find(|c| c.step == "intent:create_pr")
        .unwrap();
    let store = Arc::new(MemoryCheckpointStore::new());
    store
        .save(&first.run_id, &in_flight.step, &in_flight.state)
        .await
        .unwrap();

    let executor = background_fixtures();
    let sup = supervisor(
        auto_merge(),
        background_harness(readme_fix(), 0.97),
        executor.clone(),
        store,
    );
    let resumed = sup.resume(&first.run_id).await.unwrap();

    assert_eq!(executor.call_count("github_create_pr"), 0);
    assert_eq!(executor.call_count("github_merge_pr"), 0);
    assert!(resumed.human_review_required);
    assert!(resumed
        .findings
        .iter()
        .any(|f| f.category == "unverified_action" && f.subject == "create_pr"));
    assert_eq!(resumed.actions_taken, vec!["review_comment"]);
}

#[tokio::test]
async fn test_resume_of_completed_run_is_a_no_op() {
    let executor = background_fixtures();
    let sup = supervisor(
        auto_merge(),
        background_harness(readme_fix(), 0.97),
        executor.clone(),
        Arc::new(MemoryCheckpointStore::new()),
    );
    let done = sup.execute(background_request()).await.unwrap();
    let calls = executor.calls().len();

    let again = sup.resume(&done.run_id).await.unwrap();

    assert_eq!(again, done);
    assert_eq!(executor.calls().len(), calls);
}

#[tokio::test]
async fn test_on_demand_degrades_without_store() {
    let store = Arc::new(MemoryCheckpointStore::new());
    store.set_offline(true);
    let harness = ScriptedHarness::new().step("gather_context", vec![answer("In main.go")]);
    let sup = supervisor(
        SupervisorConfig::default(),
        harness,
        Arc::new(FixtureExecutor::new()),
        store,
    );

    let response = sup
        .execute(TriggerRequest::new("on-demand", json!({"query": "Where is main?"})))
        .await
        .unwrap();

    assert_eq!(response.status, ResponseStatus::Completed);
    assert_eq!(response.answer.as_deref(), Some("In main.go"));
    assert!(!response.resumable);
}

#[tokio::test]
async fn test_background_requires_store() {
    let store = Arc::new(MemoryCheckpointStore::new());
    store.set_offline(true);
    let executor = background_fixtures();
    let sup = supervisor(
        auto_merge(),
        background_harness(readme_fix(), 0.97),
        executor.clone(),
        store,
    );

    let response = sup.execute(background_request()).await.unwrap();

    assert_eq!(response.status, ResponseStatus::Failed);
    assert!(response
        .error
        .unwrap()
        .contains("Checkpoint store unavailable"));
    assert!(executor.calls().is_empty());
}

#[tokio::test]
async fn test_timeout_then_resume() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let executor = background_fixtures();
    executor.delay("github_get_issue", Duration::from_secs(5));
    let impatient = SupervisorConfig {
        auto_merge_enabled: true,
        run_timeout: Duration::from_millis(100),
        ..Default::default()
    };
    let sup = supervisor(
        impatient,
        background_harness(readme_fix(), 0.97),
        executor.clone(),
        store.clone(),
    );

    let timed_out = sup.execute(background_request()).await.unwrap();
    assert_eq!(timed_out.status, ResponseStatus::Failed);
    assert!(timed_out.error.as_deref().unwrap().contains("timed out"));
    assert!(timed_out.resumable);

    let latest = store.load_latest(&timed_out.run_id).await.unwrap().unwrap();
    assert_eq!(latest.step, "timeout");
    assert_eq!(latest.state.cursor.as_deref(), Some("fetch_context"));

    executor.delay("github_get_issue", Duration::ZERO);
    let sup = supervisor(
        auto_merge(),
        background_harness(readme_fix(), 0.97),
        executor.clone(),
        store,
    );
    let resumed = sup.resume(&timed_out.run_id).await.unwrap();

    assert_eq!(resumed.status, ResponseStatus::Completed);
    assert!(resumed.error.is_none());
    assert_eq!(resumed.actions_taken, vec!["create_pr", "merge_pr"]);
}

#[tokio::test]
async fn test_cancel_before_first_step() {
    let executor = background_fixtures();
    let sup = supervisor(
        auto_merge(),
        background_harness(readme_fix(), 0.97),
        executor.clone(),
        Arc::new(MemoryCheckpointStore::new()),
    );
    let token = CancellationToken::new();
    token.cancel();

    let response = sup
        .execute_with_cancel(background_request(), token)
        .await
        .unwrap();

    assert_eq!(response.status, ResponseStatus::Suspended);
    assert!(executor.calls().is_empty());
    let checkpoints = sup.checkpoints(&response.run_id).await.unwrap();
    let steps: Vec<&str> = checkpoints.iter().map(|c| c.step.as_str()).collect();
    assert_eq!(steps, vec!["start", "suspend"]);
}

#[tokio::test]
async fn test_resume_with_unreadable_store_is_an_error() {
    let store = Arc::new(MemoryCheckpointStore::new());
    store.set_offline(true);
    let sup = supervisor(
        auto_merge(),
        background_harness(readme_fix(), 0.97),
        background_fixtures(),
        store,
    );

    let err = sup.resume("any-run").await.unwrap_err();

    assert!(matches!(err, amber::Error::CheckpointUnavailable(_)));
}
