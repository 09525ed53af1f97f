//! HTTP reasoning harness
//!
//! Posts the run context to a reasoning endpoint and expects an [`Action`]
//! back. Prompt construction lives behind the endpoint.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::{Action, Harness, HarnessKind, ReasoningRequest};
use crate::config::HarnessConfig;
use crate::state::{ConstitutionCheck, Finding, Message};
use crate::{Error, Result};

pub struct HttpHarness {
    endpoint: String,
    model: String,
    client: reqwest::Client,
}

/// Wire form of a tool offered to the model
#[derive(Debug, Serialize)]
struct ToolDefinition<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

/// Wire form of a reasoning turn
#[derive(Debug, Serialize)]
struct TurnRequest<'a> {
    model: &'a str,
    run_id: &'a str,
    mode: String,
    step: &'a str,
    instruction: &'a str,
    trigger: &'a Value,
    messages: &'a [Message],
    findings: Vec<&'a Finding>,
    constitution_checks: &'a [ConstitutionCheck],
    tools: Vec<ToolDefinition<'a>>,
}

impl HttpHarness {
    pub fn new(config: &HarnessConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| Error::Config("harness.endpoint is not configured".to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Ok(token) = std::env::var(&config.token_env) {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|e| Error::Config(format!("Invalid API key format: {}", e)))?,
            );
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            endpoint,
            model: config.model.clone(),
            client,
        })
    }
}

#[async_trait]
impl Harness for HttpHarness {
    fn name(&self) -> &str {
        "http"
    }

    fn kind(&self) -> HarnessKind {
        HarnessKind::Http
    }

    async fn next_action(&self, request: ReasoningRequest<'_>) -> Result<Action> {
        let state = request.state;
        let body = TurnRequest {
            model: &self.model,
            run_id: state.run_id(),
            mode: state.mode().to_string(),
            step: request.step,
            instruction: &request.instruction,
            trigger: &state.request().trigger,
            messages: &state.messages,
            findings: state.current_findings(),
            constitution_checks: &state.constitution_checks,
            tools: request
                .tools
                .iter()
                .map(|t| ToolDefinition {
                    name: t.name,
                    description: t.description,
                    parameters: &t.input_schema,
                })
                .collect(),
        };

        debug!(
            "Reasoning turn for step {} ({} tools offered)",
            request.step,
            body.tools.len()
        );

        let response = self.client.post(&self.endpoint).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Harness(format!(
                "reasoning endpoint returned {}: {}",
                status, text
            )));
        }

        let action = response
            .json::<Action>()
            .await
            .map_err(|e| Error::Harness(format!("malformed action: {}", e)))?;
        Ok(action)
    }
}
