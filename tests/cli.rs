//! Command-line behavior

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Workspace with a file-backed config so nothing touches `~/.amber`
fn workspace() -> TempDir {
    let dir = TempDir::new().unwrap();
    let config = format!(
        "[checkpoint]\nbackend = \"file\"\ndirectory = '{}'\n\n[tools]\nbackoff = \"1ms\"\n",
        dir.path().join("checkpoints").display()
    );
    fs::write(dir.path().join("config.toml"), config).unwrap();
    dir
}

fn amber(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("amber").unwrap();
    cmd.current_dir(dir)
        .env_remove("RUST_LOG")
        .env_remove("AMBER_LOG")
        .env_remove("AMBER_CHECKPOINT_URL")
        .arg("--config")
        .arg(dir.join("config.toml"));
    cmd
}

fn write(dir: &Path, name: &str, content: &str) {
    fs::write(dir.join(name), content).unwrap();
}

#[test]
fn test_classify_webhook() {
    let dir = workspace();
    write(
        dir.path(),
        "request.json",
        r#"{"mode": "webhook", "trigger": {"event_type": "pull_request.opened"}}"#,
    );

    amber(dir.path())
        .args(["classify", "--request", "request.json"])
        .assert()
        .success()
        .stdout("webhook\n");
}

#[test]
fn test_classify_rejects_unknown_mode() {
    let dir = workspace();
    write(dir.path(), "request.json", r#"{"mode": "chaos", "trigger": {}}"#);

    amber(dir.path())
        .args(["classify", "--request", "request.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("UnroutableTrigger"));
}

#[test]
fn test_classify_from_stdin() {
    let dir = workspace();

    amber(dir.path())
        .args(["classify", "--request", "-"])
        .write_stdin(r#"{"mode": "scheduled", "trigger": {"cadence": "weekly"}}"#)
        .assert()
        .success()
        .stdout("scheduled\n");
}

#[test]
fn test_tools_lists_effects() {
    let dir = workspace();

    amber(dir.path())
        .arg("tools")
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"github_merge_pr\s+mutating").unwrap())
        .stdout(predicate::str::is_match(r"grep_codebase\s+read-only").unwrap());
}

#[test]
fn test_config_shows_loaded_file() {
    let dir = workspace();

    amber(dir.path())
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("backend = \"file\""))
        .stdout(predicate::str::contains("max_tool_calls = 25"));
}

#[test]
fn test_run_offline_then_list_checkpoints() {
    let dir = workspace();
    write(
        dir.path(),
        "request.json",
        r#"{"mode": "on-demand", "trigger": {"query": "Where is auth handled?"}}"#,
    );
    write(
        dir.path(),
        "script.yaml",
        r#"
gather_context:
  - type: call_tools
    calls:
      - name: grep_codebase
        arguments:
          pattern: auth
  - type: answer
    content: Authentication lives in auth/session.go
"#,
    );
    write(
        dir.path(),
        "fixtures.json",
        r#"{"grep_codebase": {"matches": [{"file": "auth/session.go", "line": 3}]}}"#,
    );

    amber(dir.path())
        .args([
            "run",
            "--request",
            "request.json",
            "--script",
            "script.yaml",
            "--tool-fixtures",
            "fixtures.json",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""status": "completed""#))
        .stdout(predicate::str::contains("auth/session.go"));

    amber(dir.path())
        .arg("checkpoints")
        .assert()
        .success()
        .stdout(predicate::str::contains("on-demand"))
        .stdout(predicate::str::contains("completed"))
        .stdout(predicate::str::contains("finalize"));
}

/// Workspace whose SQLite database sits under a regular file and cannot open
fn broken_store_workspace() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("blocker"), "not a directory").unwrap();
    let config = format!(
        "[checkpoint]\nbackend = \"sqlite\"\ndatabase_url = 'sqlite://{}'\n\n[tools]\nbackoff = \"1ms\"\n",
        dir.path().join("blocker/amber.db").display()
    );
    fs::write(dir.path().join("config.toml"), config).unwrap();
    dir
}

#[test]
fn test_on_demand_runs_without_store() {
    let dir = broken_store_workspace();
    write(
        dir.path(),
        "request.json",
        r#"{"mode": "on-demand", "trigger": {"query": "Where is main?"}}"#,
    );
    write(
        dir.path(),
        "script.yaml",
        "gather_context:\n  - type: answer\n    content: In main.go\n",
    );
    write(dir.path(), "fixtures.json", "{}");

    amber(dir.path())
        .args([
            "run",
            "--request",
            "request.json",
            "--script",
            "script.yaml",
            "--tool-fixtures",
            "fixtures.json",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""status": "completed""#))
        .stdout(predicate::str::contains(r#""resumable": false"#))
        .stdout(predicate::str::contains("In main.go"));
}

#[test]
fn test_background_fails_without_store() {
    let dir = broken_store_workspace();
    write(
        dir.path(),
        "request.json",
        r#"{"mode": "background", "trigger": {"repo": "acme/app", "issue_number": 42}}"#,
    );
    write(dir.path(), "script.yaml", "\"*\":\n  - type: answer\n    content: unused\n");
    write(dir.path(), "fixtures.json", "{}");

    amber(dir.path())
        .args([
            "run",
            "--request",
            "request.json",
            "--script",
            "script.yaml",
            "--tool-fixtures",
            "fixtures.json",
        ])
        .assert()
        .failure()
        .stdout(predicate::str::contains(r#""status": "failed""#))
        .stdout(predicate::str::contains("Checkpoint store unavailable"));
}

#[test]
fn test_failed_run_exits_non_zero() {
    let dir = workspace();
    write(
        dir.path(),
        "request.json",
        r#"{"mode": "on-demand", "trigger": {}}"#,
    );
    write(dir.path(), "script.yaml", "\"*\":\n  - type: answer\n    content: unused\n");
    write(dir.path(), "fixtures.json", "{}");

    amber(dir.path())
        .args([
            "run",
            "--request",
            "request.json",
            "--script",
            "script.yaml",
            "--tool-fixtures",
            "fixtures.json",
        ])
        .assert()
        .failure()
        .stdout(predicate::str::contains(r#""status": "failed""#));
}

#[test]
fn test_resume_unknown_run() {
    let dir = workspace();
    write(dir.path(), "script.yaml", "\"*\":\n  - type: answer\n    content: unused\n");
    write(dir.path(), "fixtures.json", "{}");

    amber(dir.path())
        .args([
            "resume",
            "no-such-run",
            "--script",
            "script.yaml",
            "--tool-fixtures",
            "fixtures.json",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("RunNotFound"));
}

#[test]
fn test_init_creates_amber_dir() {
    let dir = TempDir::new().unwrap();

    Command::cargo_bin("amber")
        .unwrap()
        .current_dir(dir.path())
        .env_remove("RUST_LOG")
        .arg("init")
        .assert()
        .success();

    assert!(dir.path().join(".amber/config.toml").exists());
    assert!(dir.path().join(".amber/checkpoints").is_dir());
}
