//! Scripted harness
//!
//! Plays back a fixed list of actions per workflow step. The turn index is
//! derived from the run state (assistant messages already recorded for the
//! step), so a resumed run replays exactly the turns it has not taken yet.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;

use super::{Action, Harness, HarnessKind, ReasoningRequest};
use crate::{Error, Result};

/// Wildcard script used for steps without their own entry
const ANY_STEP: &str = "*";

#[derive(Debug, Clone, Default)]
pub struct ScriptedHarness {
    scripts: HashMap<String, Vec<Action>>,
}

impl ScriptedHarness {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the actions played for `step`; the last one repeats once the
    /// script runs out.
    pub fn step(mut self, step: &str, actions: Vec<Action>) -> Self {
        self.scripts.insert(step.to_string(), actions);
        self
    }

    /// Load a YAML (or JSON) map of step name to action list
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let scripts: HashMap<String, Vec<Action>> = serde_yaml::from_str(&content)?;
        Ok(Self { scripts })
    }
}

#[async_trait]
impl Harness for ScriptedHarness {
    fn name(&self) -> &str {
        "scripted"
    }

    fn kind(&self) -> HarnessKind {
        HarnessKind::Scripted
    }

    async fn next_action(&self, request: ReasoningRequest<'_>) -> Result<Action> {
        let script = self
            .scripts
            .get(request.step)
            .or_else(|| self.scripts.get(ANY_STEP))
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::Harness(format!("no script for step '{}'", request.step)))?;

        let turn = request.state.reasoning_turns(request.step);
        let action = script.get(turn).or_else(|| script.last());
        action
            .cloned()
            .ok_or_else(|| Error::Harness(format!("empty script for step '{}'", request.step)))
    }
}
