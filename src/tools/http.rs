//! Remote tool gateway
//!
//! Posts validated arguments to `{endpoint}/tools/{name}` and returns the
//! JSON body. The gateway owns the concrete GitHub/git/filesystem bodies.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;

use super::{ToolError, ToolExecutor};
use crate::config::ToolsConfig;
use crate::{Error, Result};

pub struct HttpToolExecutor {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpToolExecutor {
    pub fn new(config: &ToolsConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| Error::Config("tools.endpoint is not configured".to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Ok(token) = std::env::var(&config.token_env) {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|e| Error::Config(format!("Invalid tool token format: {}", e)))?,
            );
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
        })
    }
}

/// Transient statuses worth another attempt
fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[async_trait]
impl ToolExecutor for HttpToolExecutor {
    fn name(&self) -> &str {
        "http"
    }

    async fn invoke(&self, name: &str, args: Value) -> std::result::Result<Value, ToolError> {
        let url = format!("{}/tools/{}", self.endpoint, name);
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .json(&args)
            .send()
            .await
            .map_err(|e| ToolError::failed(name, e.to_string(), e.is_timeout() || e.is_connect()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolError::failed(
                name,
                format!("gateway returned {}: {}", status, body),
                is_transient(status),
            ));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ToolError::InvalidOutput {
                tool: name.to_string(),
                reason: e.to_string(),
            })
    }
}
