//! Canned tool executor for offline replays and tests

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::{ToolError, ToolExecutor};
use crate::{Error, Result};

type Hook = Arc<dyn Fn(&str, &Value) + Send + Sync>;
type Response = std::result::Result<Value, ToolError>;

/// Serves recorded responses per tool. Queued responses are consumed first,
/// then the sticky response repeats.
#[derive(Default)]
pub struct FixtureExecutor {
    queued: Mutex<HashMap<String, VecDeque<Response>>>,
    sticky: Mutex<HashMap<String, Response>>,
    delays: Mutex<HashMap<String, Duration>>,
    calls: Mutex<Vec<(String, Value)>>,
    hook: Mutex<Option<Hook>>,
}

impl FixtureExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load fixtures from a JSON object mapping tool names to an output, or
    /// to an array of outputs served in order (the last one repeats).
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&content)?;
        Self::from_json(&value)
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        let map = value
            .as_object()
            .ok_or_else(|| Error::Config("tool fixtures must be a JSON object".to_string()))?;

        let fixtures = Self::new();
        for (tool, responses) in map {
            match responses {
                Value::Array(items) => {
                    if let Some((last, rest)) = items.split_last() {
                        for item in rest {
                            fixtures.respond_once(tool, Ok(item.clone()));
                        }
                        fixtures.respond(tool, last.clone());
                    }
                }
                other => fixtures.respond(tool, other.clone()),
            }
        }
        Ok(fixtures)
    }

    /// Sticky successful response
    pub fn respond(&self, tool: &str, output: Value) {
        self.sticky.lock().insert(tool.to_string(), Ok(output));
    }

    /// Sticky failure
    pub fn fail(&self, tool: &str, error: ToolError) {
        self.sticky.lock().insert(tool.to_string(), Err(error));
    }

    /// One-shot response served before the sticky one
    pub fn respond_once(&self, tool: &str, response: Response) {
        self.queued
            .lock()
            .entry(tool.to_string())
            .or_default()
            .push_back(response);
    }

    /// Delay every call to `tool`
    pub fn delay(&self, tool: &str, delay: Duration) {
        self.delays.lock().insert(tool.to_string(), delay);
    }

    /// Callback run on every invocation, before the response is served
    pub fn on_invoke<F>(&self, hook: F)
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        *self.hook.lock() = Some(Arc::new(hook));
    }

    pub fn call_count(&self, tool: &str) -> usize {
        self.calls.lock().iter().filter(|(name, _)| name == tool).count()
    }

    /// Every call made so far, in order
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ToolExecutor for FixtureExecutor {
    fn name(&self) -> &str {
        "fixture"
    }

    async fn invoke(&self, name: &str, args: Value) -> std::result::Result<Value, ToolError> {
        self.calls.lock().push((name.to_string(), args.clone()));

        let hook = self.hook.lock().clone();
        if let Some(hook) = hook {
            hook(name, &args);
        }

        let delay = self.delays.lock().get(name).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let queued = self
            .queued
            .lock()
            .get_mut(name)
            .and_then(VecDeque::pop_front);
        if let Some(response) = queued {
            return response;
        }

        self.sticky
            .lock()
            .get(name)
            .cloned()
            .unwrap_or_else(|| Err(ToolError::failed(name, "no fixture recorded", false)))
    }
}
