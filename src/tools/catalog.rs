//! The fixed tool catalog

use serde_json::{json, Value};

use super::{ToolCategory, ToolEffect, ToolSpec};

const ERROR_OBJECT: &str = "returns {\"error\": message} on failure";

/// Every tool the registry knows about
pub fn catalog() -> Vec<ToolSpec> {
    vec![
        // Code analysis
        spec(
            "grep_codebase",
            "Search the repository for a regular expression",
            ToolCategory::Code,
            ToolEffect::ReadOnly,
            object(
                &["pattern"],
                json!({
                    "pattern": {"type": "string", "minLength": 1},
                    "file_glob": {"type": "string"},
                    "repo_path": {"type": "string"}
                }),
            ),
            object(&["matches"], json!({"matches": {"type": "array"}})),
        ),
        spec(
            "read_file",
            "Read a file, optionally a line range",
            ToolCategory::Code,
            ToolEffect::ReadOnly,
            object(
                &["path"],
                json!({
                    "path": {"type": "string", "minLength": 1},
                    "start_line": {"type": "integer", "minimum": 1},
                    "end_line": {"type": "integer", "minimum": 1},
                    "repo_path": {"type": "string"}
                }),
            ),
            object(&["content"], json!({"content": {"type": "string"}})),
        ),
        spec(
            "list_files",
            "List files in a directory matching a glob",
            ToolCategory::Code,
            ToolEffect::ReadOnly,
            object(
                &[],
                json!({
                    "directory": {"type": "string"},
                    "pattern": {"type": "string"},
                    "repo_path": {"type": "string"}
                }),
            ),
            object(&["files"], json!({"files": {"type": "array", "items": {"type": "string"}}})),
        ),
        spec(
            "git_log",
            "Recent commit history",
            ToolCategory::Git,
            ToolEffect::ReadOnly,
            object(
                &[],
                json!({
                    "path": {"type": "string"},
                    "since": {"type": "string"},
                    "max_count": {"type": "integer", "minimum": 1, "maximum": 500},
                    "repo_path": {"type": "string"}
                }),
            ),
            object(&["commits"], json!({"commits": {"type": "array"}})),
        ),
        spec(
            "git_diff",
            "Diff between two revisions",
            ToolCategory::Git,
            ToolEffect::ReadOnly,
            object(
                &[],
                json!({
                    "base": {"type": "string"},
                    "head": {"type": "string"},
                    "path": {"type": "string"},
                    "repo_path": {"type": "string"}
                }),
            ),
            object(&["diff"], json!({"diff": {"type": "string"}})),
        ),
        // Constitution compliance
        spec(
            "check_go_error_handling",
            "Check Go code for panic() and unwrapped error returns",
            ToolCategory::Constitution,
            ToolEffect::ReadOnly,
            object(
                &["code", "file_path"],
                json!({"code": {"type": "string"}, "file_path": {"type": "string"}}),
            ),
            check_output(),
        ),
        spec(
            "check_typescript_type_safety",
            "Check TypeScript code for unjustified 'any' types",
            ToolCategory::Constitution,
            ToolEffect::ReadOnly,
            object(
                &["code", "file_path"],
                json!({"code": {"type": "string"}, "file_path": {"type": "string"}}),
            ),
            check_output(),
        ),
        spec(
            "check_structured_logging",
            "Check code for secret logging and unstructured logs",
            ToolCategory::Constitution,
            ToolEffect::ReadOnly,
            object(
                &["code", "file_path", "language"],
                json!({
                    "code": {"type": "string"},
                    "file_path": {"type": "string"},
                    "language": {"type": "string"}
                }),
            ),
            check_output(),
        ),
        spec(
            "check_commit_format",
            "Check a commit message against the conventional commit rules",
            ToolCategory::Constitution,
            ToolEffect::ReadOnly,
            object(&["commit_message"], json!({"commit_message": {"type": "string"}})),
            check_output(),
        ),
        // GitHub
        spec(
            "github_list_issues",
            "List issues, optionally filtered by labels",
            ToolCategory::GitHub,
            ToolEffect::ReadOnly,
            object(
                &["repo_full_name"],
                json!({
                    "repo_full_name": repo_name(),
                    "state": {"enum": ["open", "closed", "all"]},
                    "labels": {"type": "array", "items": {"type": "string"}},
                    "max_results": {"type": "integer", "minimum": 1, "maximum": 100}
                }),
            ),
            object(&["issues"], json!({"issues": {"type": "array"}})),
        ),
        spec(
            "github_get_issue",
            "Fetch one issue with its comments",
            ToolCategory::GitHub,
            ToolEffect::ReadOnly,
            object(
                &["repo_full_name", "issue_number"],
                json!({"repo_full_name": repo_name(), "issue_number": number()}),
            ),
            object(
                &["number", "title"],
                json!({"number": {"type": "integer"}, "title": {"type": "string"}}),
            ),
        ),
        spec(
            "github_list_prs",
            "List pull requests",
            ToolCategory::GitHub,
            ToolEffect::ReadOnly,
            object(
                &["repo_full_name"],
                json!({
                    "repo_full_name": repo_name(),
                    "state": {"enum": ["open", "closed", "all"]},
                    "max_results": {"type": "integer", "minimum": 1, "maximum": 100}
                }),
            ),
            object(&["pull_requests"], json!({"pull_requests": {"type": "array"}})),
        ),
        spec(
            "github_create_issue_comment",
            "Comment on an issue or pull request",
            ToolCategory::GitHub,
            ToolEffect::Mutating,
            object(
                &["repo_full_name", "issue_number", "body"],
                json!({
                    "repo_full_name": repo_name(),
                    "issue_number": number(),
                    "body": {"type": "string", "minLength": 1}
                }),
            ),
            object(&["id"], json!({"id": {"type": "integer"}, "url": {"type": "string"}})),
        ),
        spec(
            "github_create_pr",
            "Open a pull request from an existing branch",
            ToolCategory::GitHub,
            ToolEffect::Mutating,
            object(
                &["repo_full_name", "title", "body", "head"],
                json!({
                    "repo_full_name": repo_name(),
                    "title": {"type": "string", "minLength": 1},
                    "body": {"type": "string"},
                    "head": {"type": "string", "minLength": 1},
                    "base": {"type": "string"},
                    "commit_message": {"type": "string"},
                    "files": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "required": ["path", "content"],
                            "properties": {
                                "path": {"type": "string"},
                                "content": {"type": "string"}
                            }
                        }
                    }
                }),
            ),
            object(
                &["number"],
                json!({"number": {"type": "integer"}, "url": {"type": "string"}}),
            ),
        ),
        spec(
            "github_update_issue_labels",
            "Replace the labels of an issue",
            ToolCategory::GitHub,
            ToolEffect::Mutating,
            object(
                &["repo_full_name", "issue_number", "labels"],
                json!({
                    "repo_full_name": repo_name(),
                    "issue_number": number(),
                    "labels": {"type": "array", "items": {"type": "string"}}
                }),
            ),
            object(&["labels"], json!({"labels": {"type": "array"}})),
        ),
        spec(
            "github_merge_pr",
            "Merge a pull request",
            ToolCategory::GitHub,
            ToolEffect::Mutating,
            object(
                &["repo_full_name", "pr_number"],
                json!({
                    "repo_full_name": repo_name(),
                    "pr_number": number(),
                    "merge_method": {"enum": ["merge", "squash", "rebase"]}
                }),
            ),
            object(&["merged"], json!({"merged": {"type": "boolean"}})),
        ),
    ]
}

fn spec(
    name: &'static str,
    description: &'static str,
    category: ToolCategory,
    effect: ToolEffect,
    input_schema: Value,
    output_schema: Value,
) -> ToolSpec {
    ToolSpec {
        name,
        description,
        category,
        effect,
        input_schema,
        output_schema,
        failure_mode: ERROR_OBJECT,
    }
}

fn object(required: &[&str], properties: Value) -> Value {
    json!({
        "type": "object",
        "required": required,
        "properties": properties
    })
}

fn repo_name() -> Value {
    json!({"type": "string", "pattern": "^[^/\\s]+/[^/\\s]+$"})
}

fn number() -> Value {
    json!({"type": "integer", "minimum": 1})
}

fn check_output() -> Value {
    let check = json!({
        "type": "object",
        "required": ["principle", "status"],
        "properties": {
            "principle": {"type": "string"},
            "status": {"enum": ["pass", "fail", "warning"]},
            "details": {"type": "string"},
            "file_references": {"type": "array", "items": {"type": "string"}}
        }
    });
    object(
        &["violations", "warnings"],
        json!({
            "violations": {"type": "array", "items": check.clone()},
            "warnings": {"type": "array", "items": check},
            "principles": {"type": "array", "items": {"type": "string"}}
        }),
    )
}
