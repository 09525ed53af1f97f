//! Built-in constitution checks
//!
//! Pattern-based compliance rules for Go, TypeScript, logging and commit
//! messages. The output shape is shared with remote executors so
//! [`checks_from_output`] can read either.

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde_json::{json, Value};

use super::{ToolError, ToolExecutor};
use crate::state::{CheckStatus, ConstitutionCheck};

const SECURITY: &str = "II - Security & Multi-Tenancy";
const TYPE_SAFETY: &str = "III - Type Safety & Error Handling";
const OBSERVABILITY: &str = "VI - Observability";
const COMMITS: &str = "X - Commit Discipline";

const WHAT_WORDS: [&str; 6] = ["add", "remove", "update", "change", "modify", "delete"];
const WHY_WORDS: [&str; 5] = ["to", "for", "because", "since", "so that"];

/// Tool names served by [`ConstitutionExecutor`]
pub const CHECK_TOOLS: [&str; 4] = [
    "check_go_error_handling",
    "check_typescript_type_safety",
    "check_structured_logging",
    "check_commit_format",
];

/// Compiled rule patterns
pub struct Rules {
    panic: Regex,
    bare_return: Regex,
    wrapped_error: Regex,
    ts_any: Regex,
    secrets: Vec<(Regex, &'static str)>,
    structured: Regex,
    conventional: Regex,
}

impl Rules {
    pub fn compile() -> Result<Self, regex::Error> {
        let secret = |pattern: &str| RegexBuilder::new(pattern).case_insensitive(true).build();
        Ok(Self {
            panic: Regex::new(r"\bpanic\s*\(")?,
            bare_return: Regex::new(r"(?m)return\s+err\s*$")?,
            wrapped_error: Regex::new(r"fmt\.Errorf\s*\([^)]*%w")?,
            ts_any: Regex::new(r":\s*any\b")?,
            secrets: vec![
                (secret(r"log.*token")?, "Potential token logging"),
                (secret(r"log.*password")?, "Potential password logging"),
                (secret(r"log.*secret")?, "Potential secret logging"),
                (secret(r"log.*api[_-]?key")?, "Potential API key logging"),
            ],
            structured: Regex::new(r"slog\.|zerolog\.|With\w+\(")?,
            conventional: Regex::new(r"^(feat|fix|docs|style|refactor|test|chore)(\([^)]+\))?: .+")?,
        })
    }

    pub fn check_go_error_handling(&self, code: &str, file_path: &str) -> Value {
        let mut violations = Vec::new();
        let mut warnings = Vec::new();

        for m in self.panic.find_iter(code) {
            let line = line_of(code, m.start());
            violations.push(entry(
                TYPE_SAFETY,
                CheckStatus::Fail,
                format!("panic() usage forbidden in production code at line {}", line),
                &[format!("{}:{}", file_path, line)],
            ));
        }
        for m in self.bare_return.find_iter(code) {
            let line = line_of(code, m.start());
            warnings.push(entry(
                TYPE_SAFETY,
                CheckStatus::Warning,
                format!("Consider wrapping error with context at line {}", line),
                &[format!("{}:{}", file_path, line)],
            ));
        }

        json!({
            "file_path": file_path,
            "language": "go",
            "principles": [TYPE_SAFETY],
            "stats": {
                "panic_count": violations.len(),
                "wrapped_errors": self.wrapped_error.find_iter(code).count()
            },
            "violations": violations,
            "warnings": warnings,
        })
    }

    pub fn check_typescript_type_safety(&self, code: &str, file_path: &str) -> Value {
        let mut violations = Vec::new();
        let mut any_count = 0;

        for (idx, line) in code.lines().enumerate() {
            let hits = self.ts_any.find_iter(line).count();
            any_count += hits;
            if hits > 0 && !line.contains("eslint-disable") {
                violations.push(entry(
                    TYPE_SAFETY,
                    CheckStatus::Fail,
                    format!(
                        "'any' type without eslint-disable justification at line {}",
                        idx + 1
                    ),
                    &[format!("{}:{}", file_path, idx + 1)],
                ));
            }
        }

        json!({
            "file_path": file_path,
            "language": "typescript",
            "principles": [TYPE_SAFETY],
            "stats": {"any_count": any_count, "unjustified_any": violations.len()},
            "violations": violations,
            "warnings": [],
        })
    }

    pub fn check_structured_logging(&self, code: &str, file_path: &str, language: &str) -> Value {
        let mut violations = Vec::new();
        let mut warnings = Vec::new();

        for (pattern, message) in &self.secrets {
            for m in pattern.find_iter(code) {
                let line = line_of(code, m.start());
                violations.push(entry(
                    SECURITY,
                    CheckStatus::Fail,
                    format!("{} at line {}", message, line),
                    &[format!("{}:{}", file_path, line)],
                ));
            }
        }

        let mut principles = vec![SECURITY];
        if language == "go" {
            principles.push(OBSERVABILITY);
            if code.contains("log.") && !self.structured.is_match(code) {
                warnings.push(entry(
                    OBSERVABILITY,
                    CheckStatus::Warning,
                    "Consider using structured logging (slog/zerolog) instead of log package"
                        .to_string(),
                    &[file_path.to_string()],
                ));
            }
        }

        json!({
            "file_path": file_path,
            "language": language,
            "principles": principles,
            "violations": violations,
            "warnings": warnings,
        })
    }

    pub fn check_commit_format(&self, commit_message: &str) -> Value {
        let mut violations = Vec::new();
        let mut warnings = Vec::new();

        if !self.conventional.is_match(commit_message) {
            violations.push(entry(
                COMMITS,
                CheckStatus::Fail,
                "Commit message does not follow conventional commit format".to_string(),
                &[],
            ));
        }
        if commit_message.chars().count() < 10 {
            warnings.push(entry(
                COMMITS,
                CheckStatus::Warning,
                "Commit message is very short, consider adding more context".to_string(),
                &[],
            ));
        }

        let lower = commit_message.to_lowercase();
        let has_what = WHAT_WORDS.iter().any(|w| lower.contains(w));
        let has_why = WHY_WORDS.iter().any(|w| lower.contains(w));
        if has_what && !has_why {
            warnings.push(entry(
                COMMITS,
                CheckStatus::Warning,
                "Commit explains WHAT but not WHY, consider adding motivation".to_string(),
                &[],
            ));
        }

        json!({
            "commit_message": commit_message,
            "principles": [COMMITS],
            "violations": violations,
            "warnings": warnings,
        })
    }
}

fn line_of(code: &str, offset: usize) -> usize {
    code[..offset].matches('\n').count() + 1
}

fn entry(principle: &str, status: CheckStatus, details: String, refs: &[String]) -> Value {
    json!({
        "principle": principle,
        "status": status,
        "details": details,
        "file_references": refs,
    })
}

/// Guess the checker language from a file extension
pub fn language_for(path: &str) -> Option<&'static str> {
    let ext = path.rsplit('.').next()?;
    match ext {
        "go" => Some("go"),
        "ts" | "tsx" => Some("typescript"),
        "py" => Some("python"),
        "rs" => Some("rust"),
        _ => None,
    }
}

/// Turn a checker output into constitution checks. A clean output yields
/// one passing check per principle it covered.
pub fn checks_from_output(output: &Value) -> Vec<ConstitutionCheck> {
    let mut checks: Vec<ConstitutionCheck> = ["violations", "warnings"]
        .iter()
        .filter_map(|key| output.get(*key).and_then(Value::as_array))
        .flatten()
        .filter_map(parse_check)
        .collect();

    if checks.is_empty() {
        let subject = output
            .get("file_path")
            .and_then(Value::as_str)
            .map(str::to_string);
        for principle in output
            .get("principles")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
        {
            let (rule, name) = split_principle(principle);
            let mut check = ConstitutionCheck::new(rule, name, CheckStatus::Pass, "No issues found");
            check.file_references.extend(subject.clone());
            checks.push(check);
        }
    }
    checks
}

fn parse_check(value: &Value) -> Option<ConstitutionCheck> {
    let principle = value.get("principle")?.as_str()?;
    let status: CheckStatus = serde_json::from_value(value.get("status")?.clone()).ok()?;
    let (rule, name) = split_principle(principle);
    let mut check = ConstitutionCheck::new(
        rule,
        name,
        status,
        value
            .get("details")
            .and_then(Value::as_str)
            .unwrap_or_default(),
    );
    check.file_references = value
        .get("file_references")
        .and_then(Value::as_array)
        .map(|refs| {
            refs.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    Some(check)
}

fn split_principle(principle: &str) -> (&str, &str) {
    match principle.split_once(" - ") {
        Some((rule, name)) => (rule.trim(), name.trim()),
        None => (principle, principle),
    }
}

/// In-process executor for the `check_*` tools
pub struct ConstitutionExecutor {
    rules: Rules,
}

impl ConstitutionExecutor {
    pub fn new() -> Result<Self, ToolError> {
        let rules = Rules::compile()
            .map_err(|e| ToolError::failed("constitution", e.to_string(), false))?;
        Ok(Self { rules })
    }

    pub fn serves(name: &str) -> bool {
        CHECK_TOOLS.contains(&name)
    }

    pub fn rules(&self) -> &Rules {
        &self.rules
    }
}

fn arg<'a>(tool: &str, args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidArguments {
            tool: tool.to_string(),
            reason: format!("missing string argument '{}'", key),
        })
}

#[async_trait]
impl ToolExecutor for ConstitutionExecutor {
    fn name(&self) -> &str {
        "constitution"
    }

    async fn invoke(&self, name: &str, args: Value) -> Result<Value, ToolError> {
        match name {
            "check_go_error_handling" => Ok(self
                .rules
                .check_go_error_handling(arg(name, &args, "code")?, arg(name, &args, "file_path")?)),
            "check_typescript_type_safety" => Ok(self.rules.check_typescript_type_safety(
                arg(name, &args, "code")?,
                arg(name, &args, "file_path")?,
            )),
            "check_structured_logging" => Ok(self.rules.check_structured_logging(
                arg(name, &args, "code")?,
                arg(name, &args, "file_path")?,
                arg(name, &args, "language")?,
            )),
            "check_commit_format" => Ok(self
                .rules
                .check_commit_format(arg(name, &args, "commit_message")?)),
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> Rules {
        Rules::compile().unwrap()
    }

    fn statuses(output: &Value) -> Vec<CheckStatus> {
        checks_from_output(output).iter().map(|c| c.status).collect()
    }

    #[test]
    fn test_go_panic_is_violation() {
        let code = "package main\n\nfunc main() {\n\tpanic(\"boom\")\n}\n";
        let out = rules().check_go_error_handling(code, "main.go");
        let checks = checks_from_output(&out);
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].status, CheckStatus::Fail);
        assert_eq!(checks[0].rule, "III");
        assert_eq!(checks[0].file_references, vec!["main.go:4".to_string()]);
    }

    #[test]
    fn test_go_bare_return_is_warning() {
        let code = "func f() error {\n\tif err != nil {\n\t\treturn err\n\t}\n\treturn fmt.Errorf(\"f: %w\", err)\n}";
        let out = rules().check_go_error_handling(code, "f.go");
        assert_eq!(statuses(&out), vec![CheckStatus::Warning]);
        assert_eq!(out["stats"]["wrapped_errors"], 1);
    }

    #[test]
    fn test_clean_go_passes() {
        let out = rules().check_go_error_handling("func f() {}\n", "f.go");
        let checks = checks_from_output(&out);
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].status, CheckStatus::Pass);
        assert_eq!(checks[0].principle, "Type Safety & Error Handling");
    }

    #[test]
    fn test_typescript_any_needs_justification() {
        let code = "let a: any = 1;\n// eslint-disable-next-line\nlet b: any = 2; // eslint-disable-line\n";
        let out = rules().check_typescript_type_safety(code, "a.ts");
        assert_eq!(statuses(&out), vec![CheckStatus::Fail]);
        assert_eq!(out["stats"]["any_count"], 2);
    }

    #[test]
    fn test_secret_logging_fails() {
        let out = rules().check_structured_logging(
            "log.Printf(\"token=%s\", tok)",
            "auth.go",
            "go",
        );
        let checks = checks_from_output(&out);
        assert!(checks
            .iter()
            .any(|c| c.rule == "II" && c.status == CheckStatus::Fail));
        assert!(checks
            .iter()
            .any(|c| c.rule == "VI" && c.status == CheckStatus::Warning));
    }

    #[test]
    fn test_structured_go_logging_passes() {
        let out = rules().check_structured_logging(
            "slog.Info(\"started\", \"port\", port)",
            "main.go",
            "go",
        );
        assert_eq!(statuses(&out), vec![CheckStatus::Pass, CheckStatus::Pass]);
    }

    #[test]
    fn test_commit_format() {
        let r = rules();
        assert_eq!(
            statuses(&r.check_commit_format("fix(api): handle nil pointer in handler")),
            vec![CheckStatus::Pass]
        );
        assert!(statuses(&r.check_commit_format("updated stuff"))
            .contains(&CheckStatus::Fail));

        let what_only = r.check_commit_format("feat: add sidebar");
        assert_eq!(statuses(&what_only), vec![CheckStatus::Warning]);
    }

    #[test]
    fn test_language_for() {
        assert_eq!(language_for("cmd/main.go"), Some("go"));
        assert_eq!(language_for("web/app.tsx"), Some("typescript"));
        assert_eq!(language_for("README"), None);
    }

    #[tokio::test]
    async fn test_executor_rejects_missing_args() {
        let exec = ConstitutionExecutor::new().unwrap();
        let err = exec
            .invoke("check_commit_format", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
        assert!(ConstitutionExecutor::serves("check_go_error_handling"));
        assert!(!ConstitutionExecutor::serves("read_file"));
    }
}
