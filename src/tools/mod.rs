//! Tool capability layer
//!
//! A fixed catalog of named tools, each with an input schema, an output
//! schema and a declared effect. Workflows never call a tool body directly:
//! every call goes through [`ToolRegistry`], which validates the contract,
//! applies timeouts and retries, and hands the call to a [`ToolExecutor`].

pub mod catalog;
pub mod constitution;
mod fixture;
mod http;
mod registry;

pub use catalog::catalog;
pub use constitution::ConstitutionExecutor;
pub use fixture::FixtureExecutor;
pub use http::HttpToolExecutor;
pub use registry::{ToolPolicy, ToolRegistry, ToolReport};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Whether a tool changes the outside world
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolEffect {
    ReadOnly,
    Mutating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    Code,
    Git,
    GitHub,
    Constitution,
}

/// Declared contract of a tool
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub category: ToolCategory,
    pub effect: ToolEffect,
    pub input_schema: Value,
    pub output_schema: Value,
    /// How the tool reports failure
    pub failure_mode: &'static str,
}

impl ToolSpec {
    pub fn is_read_only(&self) -> bool {
        self.effect == ToolEffect::ReadOnly
    }
}

/// A tool call requested by the reasoning capability or a workflow step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(name: &str, arguments: Value) -> Self {
        Self {
            id: String::new(),
            name: name.to_string(),
            arguments,
        }
    }
}

/// Tool-level failure. Recoverable: workflows record it as a finding.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("Invalid output from {tool}: {reason}")]
    InvalidOutput { tool: String, reason: String },

    #[error("Tool {tool} is not permitted here: {reason}")]
    Forbidden { tool: String, reason: String },

    #[error("Tool {tool} timed out after {elapsed:?}")]
    Timeout { tool: String, elapsed: Duration },

    #[error("Tool {tool} failed: {message}")]
    Failed {
        tool: String,
        message: String,
        retryable: bool,
    },
}

impl ToolError {
    pub fn failed(tool: &str, message: impl Into<String>, retryable: bool) -> Self {
        ToolError::Failed {
            tool: tool.to_string(),
            message: message.into(),
            retryable,
        }
    }

    /// Whether another attempt could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ToolError::Timeout { .. } => true,
            ToolError::Failed { retryable, .. } => *retryable,
            _ => false,
        }
    }

    pub fn tool(&self) -> &str {
        match self {
            ToolError::UnknownTool(tool) => tool,
            ToolError::InvalidArguments { tool, .. }
            | ToolError::InvalidOutput { tool, .. }
            | ToolError::Forbidden { tool, .. }
            | ToolError::Timeout { tool, .. }
            | ToolError::Failed { tool, .. } => tool,
        }
    }
}

/// Executes tool bodies. Implementations only run the tool; contract
/// checks, retries and policy live in [`ToolRegistry`].
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Executor name for logs
    fn name(&self) -> &str;

    /// Run `name` with already-validated arguments
    async fn invoke(&self, name: &str, args: Value) -> Result<Value, ToolError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(ToolError::Timeout {
            tool: "grep_codebase".into(),
            elapsed: Duration::from_secs(1)
        }
        .is_retryable());
        assert!(ToolError::failed("grep_codebase", "503", true).is_retryable());
        assert!(!ToolError::failed("grep_codebase", "404", false).is_retryable());
        assert!(!ToolError::UnknownTool("nope".into()).is_retryable());
    }

    #[test]
    fn test_tool_call_deserializes_without_id() {
        let call: ToolCall =
            serde_json::from_str(r#"{"name": "read_file", "arguments": {"path": "a"}}"#).unwrap();
        assert!(call.id.is_empty());
        assert_eq!(call.name, "read_file");
    }
}
