//! Trigger input and mode classification primitives
//!
//! A trigger is the raw request handed to the supervisor. Its `mode` field
//! selects the workflow; `trigger` carries the mode-specific payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Incoming request, exactly as received
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerRequest {
    /// Declared operating mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// Mode-specific payload
    #[serde(default)]
    pub trigger: Value,
    /// Caller session identifier
    #[serde(default)]
    pub session_id: String,
    /// Project the run belongs to
    #[serde(default)]
    pub project_name: String,
    /// Repository URLs in scope
    #[serde(default)]
    pub repositories: Vec<String>,
}

impl TriggerRequest {
    pub fn new(mode: &str, trigger: Value) -> Self {
        Self {
            mode: Some(mode.to_string()),
            trigger,
            ..Default::default()
        }
    }

    pub fn with_project(mut self, project_name: &str, repositories: &[&str]) -> Self {
        self.project_name = project_name.to_string();
        self.repositories = repositories.iter().map(|r| r.to_string()).collect();
        self
    }

    /// Look up a string field of the payload
    pub fn field(&self, key: &str) -> Option<&str> {
        self.trigger.get(key).and_then(Value::as_str)
    }

    /// The user question for on-demand runs
    pub fn query(&self) -> Option<&str> {
        self.field("query").or_else(|| self.field("question"))
    }

    /// `owner/name` of the target repository
    pub fn repo_full_name(&self) -> Option<String> {
        if let Some(name) = self.field("repo").or_else(|| self.field("repository")) {
            return Some(name.to_string());
        }
        if let Some(name) = self
            .trigger
            .pointer("/payload/repository/full_name")
            .and_then(Value::as_str)
        {
            return Some(name.to_string());
        }
        self.repositories.first().map(|url| repo_name_from_url(url))
    }

    /// Issue number named directly in the payload
    pub fn issue_number(&self) -> Option<u64> {
        self.trigger
            .get("issue_number")
            .or_else(|| self.trigger.get("issue"))
            .and_then(Value::as_u64)
    }

    /// Trigger-level opt-out of the automatic action branch. It can only
    /// make the gate stricter.
    pub fn auto_merge_opt_out(&self) -> bool {
        self.trigger.get("auto_merge").and_then(Value::as_bool) == Some(false)
    }
}

/// Strip a repository URL down to `owner/name`
pub fn repo_name_from_url(url: &str) -> String {
    let trimmed = url.trim_end_matches('/').trim_end_matches(".git");
    let parts: Vec<&str> = trimmed.rsplit(['/', ':']).take(2).collect();
    match parts.as_slice() {
        [name, owner] if !owner.is_empty() => format!("{}/{}", owner, name),
        _ => trimmed.to_string(),
    }
}

/// Operating mode of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// Interactive question answering
    OnDemand,
    /// Autonomous issue-to-PR maintenance
    Background,
    /// Cadence-driven health checks, report only
    Scheduled,
    /// Reaction to a repository event
    Webhook,
}

impl Mode {
    pub const ALL: [Mode; 4] = [Mode::OnDemand, Mode::Background, Mode::Scheduled, Mode::Webhook];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::OnDemand => "on-demand",
            Mode::Background => "background",
            Mode::Scheduled => "scheduled",
            Mode::Webhook => "webhook",
        }
    }

    /// Whether a checkpoint failure aborts the run
    pub fn requires_durability(&self) -> bool {
        !matches!(self, Mode::OnDemand)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "on-demand" | "on_demand" => Ok(Mode::OnDemand),
            "background" => Ok(Mode::Background),
            "scheduled" => Ok(Mode::Scheduled),
            "webhook" => Ok(Mode::Webhook),
            other => Err(Error::UnroutableTrigger(format!("unknown mode '{}'", other))),
        }
    }
}

/// Cadence of a scheduled run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    Nightly,
    Weekly,
    Monthly,
}

impl Cadence {
    /// Read the cadence from a scheduled payload (`cadence` or `schedule_type`)
    pub fn from_payload(payload: &Value) -> Result<Self> {
        let raw = payload
            .get("cadence")
            .or_else(|| payload.get("schedule_type"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::UnroutableTrigger("scheduled trigger has no cadence".to_string())
            })?;
        raw.parse()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Cadence::Nightly => "nightly",
            Cadence::Weekly => "weekly",
            Cadence::Monthly => "monthly",
        }
    }

    /// Report title prefix, e.g. `Nightly`
    pub fn title(&self) -> &'static str {
        match self {
            Cadence::Nightly => "Nightly",
            Cadence::Weekly => "Weekly",
            Cadence::Monthly => "Monthly",
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Cadence {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "nightly" => Ok(Cadence::Nightly),
            "weekly" => Ok(Cadence::Weekly),
            "monthly" => Ok(Cadence::Monthly),
            other => Err(Error::UnroutableTrigger(format!(
                "unknown cadence '{}'",
                other
            ))),
        }
    }
}

/// Repository events the webhook workflow reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEvent {
    IssueOpened,
    PullRequestOpened,
    PushToMain,
}

impl WebhookEvent {
    /// Classify a webhook payload by its `event_type`. A `github.` prefix is
    /// optional; a push only counts when it targets `main`.
    pub fn from_payload(payload: &Value) -> Result<Self> {
        let event_type = payload
            .get("event_type")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::UnroutableTrigger("webhook trigger has no event_type".to_string())
            })?;
        let name = event_type.strip_prefix("github.").unwrap_or(event_type);

        match name {
            "issues.opened" | "issue.opened" => Ok(WebhookEvent::IssueOpened),
            "pull_request.opened" => Ok(WebhookEvent::PullRequestOpened),
            "push.main" => Ok(WebhookEvent::PushToMain),
            "push" => {
                let git_ref = payload
                    .pointer("/payload/ref")
                    .or_else(|| payload.get("ref"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if git_ref == "refs/heads/main" || git_ref == "main" {
                    Ok(WebhookEvent::PushToMain)
                } else {
                    Err(Error::UnroutableTrigger(format!(
                        "no reaction for push to '{}'",
                        git_ref
                    )))
                }
            }
            other => Err(Error::UnroutableTrigger(format!(
                "no reaction for webhook event '{}'",
                other
            ))),
        }
    }
}

/// Normalized view of a webhook payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedEvent {
    pub event_type: String,
    pub repo: String,
    pub number: Option<u64>,
    pub title: Option<String>,
    pub body: Option<String>,
    pub author: Option<String>,
    /// Commit messages carried by the payload (PR or push)
    #[serde(default)]
    pub commits: Vec<String>,
    /// Changed files with their content, when the payload includes them
    #[serde(default)]
    pub files: Vec<(String, String)>,
}

impl ParsedEvent {
    pub fn from_payload(trigger: &Value) -> Self {
        let payload = trigger.get("payload").unwrap_or(trigger);
        let item = payload
            .get("issue")
            .or_else(|| payload.get("pull_request"));
        let text = |key: &str| {
            item.and_then(|i| i.get(key))
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        let commits = payload
            .get("commits")
            .and_then(Value::as_array)
            .map(|commits| {
                commits
                    .iter()
                    .filter_map(|c| c.get("message").or(Some(c)).and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let files = payload
            .get("files")
            .and_then(Value::as_array)
            .map(|files| {
                files
                    .iter()
                    .filter_map(|f| {
                        let path = f.get("filename").or_else(|| f.get("path"))?.as_str()?;
                        let content = f
                            .get("content")
                            .or_else(|| f.get("patch"))
                            .and_then(Value::as_str)
                            .unwrap_or_default();
                        Some((path.to_string(), content.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            event_type: trigger
                .get("event_type")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            repo: payload
                .pointer("/repository/full_name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            number: item.and_then(|i| i.get("number")).and_then(Value::as_u64),
            title: text("title"),
            body: text("body"),
            author: payload
                .pointer("/sender/login")
                .and_then(Value::as_str)
                .map(str::to_string),
            commits,
            files,
        }
    }
}
