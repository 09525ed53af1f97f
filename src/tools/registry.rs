//! Contract enforcement for tool calls

use jsonschema::Validator;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::constitution::ConstitutionExecutor;
use super::{catalog, ToolError, ToolExecutor, ToolSpec};
use crate::config::ToolsConfig;
use crate::{Error, Result};

/// Which tools a caller may reach
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolPolicy {
    /// Read-only tools only (reasoning-driven calls, scheduled runs)
    ReadOnly,
    /// Any tool, including repository mutations
    Unrestricted,
}

/// Outcome of a registry call
#[derive(Debug, Clone)]
pub struct ToolReport {
    pub output: std::result::Result<Value, ToolError>,
    pub attempts: u32,
    pub duration: Duration,
}

struct RegisteredTool {
    spec: ToolSpec,
    input: Validator,
    output: Validator,
}

/// The tool catalog bound to an executor
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    executor: Arc<dyn ToolExecutor>,
    builtin: Option<ConstitutionExecutor>,
    timeout: Duration,
    max_attempts: u32,
    backoff: Duration,
}

impl ToolRegistry {
    /// Compile the catalog's schemas and bind them to `executor`
    pub fn new(executor: Arc<dyn ToolExecutor>, config: &ToolsConfig) -> Result<Self> {
        let tools = catalog()
            .into_iter()
            .map(|spec| {
                let input = jsonschema::validator_for(&spec.input_schema).map_err(|e| {
                    Error::Config(format!("invalid input schema for {}: {}", spec.name, e))
                })?;
                let output = jsonschema::validator_for(&spec.output_schema).map_err(|e| {
                    Error::Config(format!("invalid output schema for {}: {}", spec.name, e))
                })?;
                Ok(RegisteredTool {
                    spec,
                    input,
                    output,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let builtin = if config.builtin_constitution {
            Some(ConstitutionExecutor::new()?)
        } else {
            None
        };

        Ok(Self {
            tools,
            executor,
            builtin,
            timeout: config.timeout,
            max_attempts: config.max_attempts.max(1),
            backoff: config.backoff,
        })
    }

    pub fn spec(&self, name: &str) -> Option<&ToolSpec> {
        self.find(name).map(|t| &t.spec)
    }

    pub fn specs(&self) -> impl Iterator<Item = &ToolSpec> {
        self.tools.iter().map(|t| &t.spec)
    }

    /// Tools visible under `policy`
    pub fn available(&self, policy: ToolPolicy) -> Vec<&ToolSpec> {
        self.specs()
            .filter(|s| policy == ToolPolicy::Unrestricted || s.is_read_only())
            .collect()
    }

    fn find(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.iter().find(|t| t.spec.name == name)
    }

    /// Invoke a tool under `policy`. Never panics or propagates: every
    /// failure comes back inside the report.
    pub async fn invoke(&self, name: &str, args: Value, policy: ToolPolicy) -> ToolReport {
        let started = Instant::now();
        let (output, attempts) = self.invoke_inner(name, args, policy).await;
        ToolReport {
            output,
            attempts,
            duration: started.elapsed(),
        }
    }

    async fn invoke_inner(
        &self,
        name: &str,
        args: Value,
        policy: ToolPolicy,
    ) -> (std::result::Result<Value, ToolError>, u32) {
        let tool = match self.find(name) {
            Some(tool) => tool,
            None => return (Err(ToolError::UnknownTool(name.to_string())), 0),
        };

        if policy == ToolPolicy::ReadOnly && !tool.spec.is_read_only() {
            return (
                Err(ToolError::Forbidden {
                    tool: name.to_string(),
                    reason: "repository mutations are not allowed under a read-only policy"
                        .to_string(),
                }),
                0,
            );
        }

        if let Err(reason) = check(&tool.input, &args) {
            return (
                Err(ToolError::InvalidArguments {
                    tool: name.to_string(),
                    reason,
                }),
                0,
            );
        }

        // Mutating tools get exactly one attempt
        let max_attempts = if tool.spec.is_read_only() {
            self.max_attempts
        } else {
            1
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!("Invoking tool {} (attempt {}/{})", name, attempt, max_attempts);

            let result = self.attempt(tool, args.clone()).await;
            match result {
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.backoff * 2u32.saturating_pow(attempt - 1);
                    warn!(
                        "Tool {} failed on attempt {}: {}; retrying in {:?}",
                        name, attempt, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return (other, attempt),
            }
        }
    }

    async fn attempt(
        &self,
        tool: &RegisteredTool,
        args: Value,
    ) -> std::result::Result<Value, ToolError> {
        let name = tool.spec.name;
        let executor: &dyn ToolExecutor = match &self.builtin {
            Some(builtin) if ConstitutionExecutor::serves(name) => builtin,
            _ => self.executor.as_ref(),
        };

        let value = tokio::time::timeout(self.timeout, executor.invoke(name, args))
            .await
            .map_err(|_| ToolError::Timeout {
                tool: name.to_string(),
                elapsed: self.timeout,
            })??;

        // Tools report failure in-band as {"error": "..."}
        if let Some(message) = value.get("error").and_then(Value::as_str) {
            let retryable = value.get("retryable").and_then(Value::as_bool) == Some(true);
            return Err(ToolError::failed(name, message, retryable));
        }

        check(&tool.output, &value).map_err(|reason| ToolError::InvalidOutput {
            tool: name.to_string(),
            reason,
        })?;
        Ok(value)
    }
}

fn check(validator: &Validator, value: &Value) -> std::result::Result<(), String> {
    if validator.is_valid(value) {
        return Ok(());
    }
    let messages: Vec<String> = validator.iter_errors(value).map(|e| e.to_string()).collect();
    Err(messages.join("; "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::FixtureExecutor;
    use serde_json::json;

    fn config() -> ToolsConfig {
        ToolsConfig {
            timeout: Duration::from_millis(200),
            backoff: Duration::from_millis(1),
            ..Default::default()
        }
    }

    fn registry(fixtures: Arc<FixtureExecutor>) -> ToolRegistry {
        ToolRegistry::new(fixtures, &config()).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let registry = registry(Arc::new(FixtureExecutor::new()));
        let report = registry
            .invoke("rm_rf", json!({}), ToolPolicy::Unrestricted)
            .await;
        assert!(matches!(report.output, Err(ToolError::UnknownTool(_))));
        assert_eq!(report.attempts, 0);
    }

    #[tokio::test]
    async fn test_invalid_arguments_never_reach_executor() {
        let fixtures = Arc::new(FixtureExecutor::new());
        let registry = registry(fixtures.clone());
        let report = registry
            .invoke("read_file", json!({"start_line": 3}), ToolPolicy::ReadOnly)
            .await;
        assert!(matches!(
            report.output,
            Err(ToolError::InvalidArguments { .. })
        ));
        assert_eq!(fixtures.call_count("read_file"), 0);
    }

    #[tokio::test]
    async fn test_read_only_policy_forbids_mutations() {
        let fixtures = Arc::new(FixtureExecutor::new());
        fixtures.respond("github_create_pr", json!({"number": 1}));
        let registry = registry(fixtures.clone());
        let report = registry
            .invoke(
                "github_create_pr",
                json!({"repo_full_name": "a/b", "title": "t", "body": "b", "head": "h"}),
                ToolPolicy::ReadOnly,
            )
            .await;
        assert!(matches!(report.output, Err(ToolError::Forbidden { .. })));
        assert_eq!(fixtures.call_count("github_create_pr"), 0);
    }

    #[tokio::test]
    async fn test_error_object_is_failure() {
        let fixtures = Arc::new(FixtureExecutor::new());
        fixtures.respond("git_log", json!({"error": "not a git repository"}));
        let registry = registry(fixtures.clone());
        let report = registry
            .invoke("git_log", json!({}), ToolPolicy::ReadOnly)
            .await;
        match report.output {
            Err(ToolError::Failed {
                message, retryable, ..
            }) => {
                assert_eq!(message, "not a git repository");
                assert!(!retryable);
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(report.attempts, 1);
    }

    #[tokio::test]
    async fn test_retryable_read_only_failure_is_retried() {
        let fixtures = Arc::new(FixtureExecutor::new());
        fixtures.respond_once(
            "git_log",
            Err(ToolError::failed("git_log", "rate limited", true)),
        );
        fixtures.respond("git_log", json!({"commits": []}));
        let registry = registry(fixtures.clone());

        let report = registry
            .invoke("git_log", json!({"max_count": 5}), ToolPolicy::ReadOnly)
            .await;
        assert_eq!(report.output.unwrap(), json!({"commits": []}));
        assert_eq!(report.attempts, 2);
        assert_eq!(fixtures.call_count("git_log"), 2);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let fixtures = Arc::new(FixtureExecutor::new());
        fixtures.fail("grep_codebase", ToolError::failed("grep_codebase", "503", true));
        let registry = registry(fixtures.clone());

        let report = registry
            .invoke("grep_codebase", json!({"pattern": "x"}), ToolPolicy::ReadOnly)
            .await;
        assert!(report.output.is_err());
        assert_eq!(report.attempts, 3);
    }

    #[tokio::test]
    async fn test_mutating_tool_is_not_retried() {
        let fixtures = Arc::new(FixtureExecutor::new());
        fixtures.fail(
            "github_merge_pr",
            ToolError::failed("github_merge_pr", "502", true),
        );
        let registry = registry(fixtures.clone());

        let report = registry
            .invoke(
                "github_merge_pr",
                json!({"repo_full_name": "a/b", "pr_number": 3}),
                ToolPolicy::Unrestricted,
            )
            .await;
        assert!(report.output.is_err());
        assert_eq!(fixtures.call_count("github_merge_pr"), 1);
    }

    #[tokio::test]
    async fn test_timeout() {
        let fixtures = Arc::new(FixtureExecutor::new());
        fixtures.respond("list_files", json!({"files": []}));
        fixtures.delay("list_files", Duration::from_secs(5));
        let mut cfg = config();
        cfg.max_attempts = 1;
        let registry = ToolRegistry::new(fixtures, &cfg).unwrap();

        let report = registry
            .invoke("list_files", json!({}), ToolPolicy::ReadOnly)
            .await;
        assert!(matches!(report.output, Err(ToolError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_output_contract_is_enforced() {
        let fixtures = Arc::new(FixtureExecutor::new());
        fixtures.respond("read_file", json!({"text": "wrong field"}));
        let registry = registry(fixtures);
        let report = registry
            .invoke("read_file", json!({"path": "a.rs"}), ToolPolicy::ReadOnly)
            .await;
        assert!(matches!(report.output, Err(ToolError::InvalidOutput { .. })));
    }

    #[tokio::test]
    async fn test_constitution_checks_run_in_process() {
        let fixtures = Arc::new(FixtureExecutor::new());
        let registry = registry(fixtures.clone());
        let report = registry
            .invoke(
                "check_commit_format",
                json!({"commit_message": "fix: guard nil config to avoid crash"}),
                ToolPolicy::ReadOnly,
            )
            .await;
        let output = report.output.unwrap();
        assert_eq!(output["violations"], json!([]));
        assert_eq!(fixtures.call_count("check_commit_format"), 0);
    }

    #[test]
    fn test_available_under_policy() {
        let registry = registry(Arc::new(FixtureExecutor::new()));
        assert_eq!(registry.available(ToolPolicy::Unrestricted).len(), 16);
        assert!(registry
            .available(ToolPolicy::ReadOnly)
            .iter()
            .all(|s| s.is_read_only()));
    }
}
