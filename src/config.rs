//! Configuration loading and management

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Supervisor and gating policy
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    /// Tool registry settings
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Reasoning capability settings
    #[serde(default)]
    pub harness: HarnessConfig,

    /// Checkpoint persistence
    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file or default locations, then apply
    /// `AMBER_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path.map(PathBuf::from).or_else(|| {
            // Try .amber/config.toml in current directory
            let local = PathBuf::from(".amber/config.toml");
            if local.exists() {
                return Some(local);
            }

            // Try ~/.amber/config.toml
            dirs::home_dir().map(|h| h.join(".amber/config.toml"))
        });

        let mut config = match config_path {
            Some(p) if p.exists() => {
                let content = std::fs::read_to_string(&p)?;
                Self::parse(&content)?
            }
            Some(p) if path.is_some() => {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )))
            }
            _ => Config::default(),
        };

        config.apply_env_from(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// production).
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("AMBER_AUTO_MERGE_ENABLED") {
            self.supervisor.auto_merge_enabled = parse_bool(&v).ok_or_else(|| {
                Error::Config(format!("AMBER_AUTO_MERGE_ENABLED: not a boolean: {}", v))
            })?;
        }
        if let Some(v) = lookup("AMBER_AUTO_MERGE_MIN_CONFIDENCE") {
            self.supervisor.auto_merge_min_confidence = v.trim().parse().map_err(|_| {
                Error::Config(format!("AMBER_AUTO_MERGE_MIN_CONFIDENCE: not a number: {}", v))
            })?;
        }
        if let Some(v) = lookup("AMBER_MAX_TOOL_CALLS") {
            self.supervisor.max_tool_calls = v.trim().parse().map_err(|_| {
                Error::Config(format!("AMBER_MAX_TOOL_CALLS: not an integer: {}", v))
            })?;
        }
        if let Some(v) = lookup("AMBER_RUN_TIMEOUT") {
            self.supervisor.run_timeout = humantime::parse_duration(v.trim())
                .map_err(|e| Error::Config(format!("AMBER_RUN_TIMEOUT: {}", e)))?;
        }
        if let Some(v) = lookup("AMBER_CHECKPOINT_URL") {
            self.checkpoint.database_url = v;
        }
        if let Some(v) = lookup("AMBER_LOG") {
            self.logging.level = v;
        }
        Ok(())
    }

    /// Reject settings no run could honour
    pub fn validate(&self) -> Result<()> {
        self.supervisor.validate()?;

        if self.tools.timeout.is_zero() {
            return Err(Error::Config("tools.timeout must be non-zero".to_string()));
        }
        if self.tools.max_attempts == 0 {
            return Err(Error::Config(
                "tools.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.harness.timeout.is_zero() {
            return Err(Error::Config("harness.timeout must be non-zero".to_string()));
        }
        self.harness.kind.parse::<crate::HarnessKind>()?;
        self.checkpoint.backend.parse::<crate::checkpoint::BackendKind>()?;
        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Policy handed to the supervisor for every run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Master switch for autonomous merges
    #[serde(default)]
    pub auto_merge_enabled: bool,

    /// Minimum risk confidence for the automatic action branch
    #[serde(default = "default_min_confidence")]
    pub auto_merge_min_confidence: f64,

    /// Tool-call budget for reasoning-driven context gathering
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls: usize,

    /// Wall-clock limit for one execution of a run
    #[serde(default = "default_run_timeout", with = "duration_serde")]
    pub run_timeout: Duration,
}

fn default_min_confidence() -> f64 {
    0.95
}

fn default_max_tool_calls() -> usize {
    25
}

fn default_run_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            auto_merge_enabled: false,
            auto_merge_min_confidence: default_min_confidence(),
            max_tool_calls: default_max_tool_calls(),
            run_timeout: default_run_timeout(),
        }
    }
}

impl SupervisorConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.auto_merge_min_confidence) {
            return Err(Error::Config(format!(
                "supervisor.auto_merge_min_confidence must be within [0, 1], got {}",
                self.auto_merge_min_confidence
            )));
        }
        if self.max_tool_calls == 0 {
            return Err(Error::Config(
                "supervisor.max_tool_calls must be at least 1".to_string(),
            ));
        }
        if self.run_timeout.is_zero() {
            return Err(Error::Config(
                "supervisor.run_timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Tool registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Base URL of the tool gateway (`POST {endpoint}/tools/{name}`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Environment variable holding the gateway bearer token
    #[serde(default = "default_tools_token_env")]
    pub token_env: String,

    /// Per-invocation timeout
    #[serde(default = "default_tool_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Attempts for retryable failures of read-only tools
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial retry delay, doubled per attempt
    #[serde(default = "default_backoff", with = "duration_serde")]
    pub backoff: Duration,

    /// Serve the constitution checks in-process instead of via the gateway
    #[serde(default = "default_true")]
    pub builtin_constitution: bool,
}

fn default_tools_token_env() -> String {
    "AMBER_TOOLS_TOKEN".to_string()
}

fn default_tool_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff() -> Duration {
    Duration::from_millis(500)
}

fn default_true() -> bool {
    true
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            token_env: default_tools_token_env(),
            timeout: default_tool_timeout(),
            max_attempts: default_max_attempts(),
            backoff: default_backoff(),
            builtin_constitution: true,
        }
    }
}

/// Reasoning capability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Which harness to use (`http` or `scripted`)
    #[serde(default = "default_harness_kind")]
    pub kind: String,

    /// Endpoint of the reasoning service (http harness)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Model identifier forwarded to the endpoint
    #[serde(default = "default_model")]
    pub model: String,

    /// Environment variable holding the API token
    #[serde(default = "default_harness_token_env")]
    pub token_env: String,

    /// Per-turn timeout
    #[serde(default = "default_harness_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Script file for the scripted harness
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<PathBuf>,
}

fn default_harness_kind() -> String {
    "http".to_string()
}

fn default_model() -> String {
    "claude-sonnet-4-5".to_string()
}

fn default_harness_token_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_harness_timeout() -> Duration {
    Duration::from_secs(120)
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            kind: default_harness_kind(),
            endpoint: None,
            model: default_model(),
            token_env: default_harness_token_env(),
            timeout: default_harness_timeout(),
            script: None,
        }
    }
}

/// Checkpoint persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Backend: `sqlite`, `file` or `memory`
    #[serde(default = "default_backend")]
    pub backend: String,

    /// SQLite connection URL
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Directory for the file backend
    #[serde(default = "default_checkpoint_dir")]
    pub directory: PathBuf,
}

fn default_backend() -> String {
    "sqlite".to_string()
}

fn default_database_url() -> String {
    "sqlite://.amber/checkpoints.db".to_string()
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from(".amber/checkpoints")
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            database_url: default_database_url(),
            directory: default_checkpoint_dir(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

/// Initialize .amber directory
pub fn init() -> Result<PathBuf> {
    let amber_dir = PathBuf::from(".amber");

    let checkpoints_dir = amber_dir.join("checkpoints");
    if !checkpoints_dir.exists() {
        std::fs::create_dir_all(&checkpoints_dir)?;
    }

    // Create default config if it doesn't exist
    let config_path = amber_dir.join("config.toml");
    if !config_path.exists() {
        let config_str = toml::to_string_pretty(&Config::default())
            .map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(&config_path, config_str)?;
    }

    Ok(config_path)
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(!config.supervisor.auto_merge_enabled);
        assert_eq!(config.supervisor.auto_merge_min_confidence, 0.95);
        assert_eq!(config.supervisor.max_tool_calls, 25);
        assert_eq!(config.supervisor.run_timeout, Duration::from_secs(1800));
        assert_eq!(config.checkpoint.backend, "sqlite");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_config() {
        let config = Config::parse(
            r#"
[supervisor]
auto_merge_enabled = true
run_timeout = "90s"

[tools]
endpoint = "http://localhost:9000"
backoff = "50ms"
"#,
        )
        .unwrap();

        assert!(config.supervisor.auto_merge_enabled);
        assert_eq!(config.supervisor.run_timeout, Duration::from_secs(90));
        assert_eq!(config.supervisor.auto_merge_min_confidence, 0.95);
        assert_eq!(config.tools.endpoint.as_deref(), Some("http://localhost:9000"));
        assert_eq!(config.tools.backoff, Duration::from_millis(50));
        assert_eq!(config.tools.max_attempts, 3);
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let rendered = toml::to_string_pretty(&Config::default()).unwrap();
        let parsed = Config::parse(&rendered).unwrap();
        assert_eq!(parsed.supervisor.run_timeout, Duration::from_secs(1800));
        assert_eq!(parsed.harness.kind, "http");
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("AMBER_AUTO_MERGE_ENABLED", "true"),
            ("AMBER_AUTO_MERGE_MIN_CONFIDENCE", "0.8"),
            ("AMBER_MAX_TOOL_CALLS", "5"),
            ("AMBER_RUN_TIMEOUT", "2m"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_env_from(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert!(config.supervisor.auto_merge_enabled);
        assert_eq!(config.supervisor.auto_merge_min_confidence, 0.8);
        assert_eq!(config.supervisor.max_tool_calls, 5);
        assert_eq!(config.supervisor.run_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = Config::default();
        let err = config
            .apply_env_from(|k| (k == "AMBER_AUTO_MERGE_ENABLED").then(|| "maybe".to_string()))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_validate_rejects_out_of_range_confidence() {
        let mut config = Config::default();
        config.supervisor.auto_merge_min_confidence = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.supervisor.max_tool_calls = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.checkpoint.backend = "postgres".to_string();
        assert!(config.validate().is_err());
    }
}
