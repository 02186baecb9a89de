//! Anthropic messages adapter.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde_json::Value;

use super::error::AdapterError;
use super::openai::map_reqwest_error;
use super::pricing::PricingTable;
use super::{CompletionRequest, CompletionResponse, LlmAdapter};

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub base_url: String,
}

impl AnthropicConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        AnthropicConfig {
            api_key: api_key.into(),
            base_url: "https://api.anthropic.com".to_string(),
        }
    }
}

pub struct AnthropicAdapter {
    config: AnthropicConfig,
    client: reqwest::Client,
    pricing: Arc<PricingTable>,
}

impl AnthropicAdapter {
    pub fn new(config: AnthropicConfig, pricing: Arc<PricingTable>) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            pricing,
        }
    }

    fn build_headers(&self) -> Result<HeaderMap, AdapterError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.config.api_key)
                .map_err(|e| AdapterError::InvalidRequest(e.to_string()))?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    fn build_payload(&self, request: &CompletionRequest) -> Value {
        let mut payload = serde_json::json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": [{"role": "user", "content": request.user_message}],
        });
        if !request.system_prompt.is_empty() {
            payload["system"] = Value::String(request.system_prompt.clone());
        }
        payload
    }

    fn parse_response(
        &self,
        body: &Value,
        request: &CompletionRequest,
        latency_ms: u64,
    ) -> Result<CompletionResponse, AdapterError> {
        let text = body
            .get("content")
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
            .and_then(|block| block.get("text"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| AdapterError::InvalidResponse("missing content[0].text".to_string()))?
            .to_string();

        let usage = body.get("usage").cloned().unwrap_or(Value::Null);
        let tokens_prompt = usage
            .get("input_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let tokens_completion = usage
            .get("output_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);

        let model_used = body
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or(&request.model)
            .to_string();

        let cost =
            self.pricing
                .cost("anthropic", &request.model, tokens_prompt, tokens_completion);

        Ok(CompletionResponse {
            text,
            tokens_prompt,
            tokens_completion,
            model_used,
            latency_ms,
            cost,
        })
    }
}

#[async_trait]
impl LlmAdapter for AnthropicAdapter {
    fn id(&self) -> &str {
        "anthropic"
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, AdapterError> {
        let url = format!("{}/v1/messages", self.config.base_url);
        let headers = self.build_headers()?;
        let payload = self.build_payload(&request);
        tracing::debug!(model = %request.model, max_tokens = request.max_tokens, "anthropic request");

        let start = Instant::now();
        let response = self
            .client
            .post(&url)
            .headers(headers)
            .timeout(Duration::from_secs(request.timeout_secs))
            .json(&payload)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let latency_ms = start.elapsed().as_millis() as u64;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(AdapterError::Authentication(format!("status {status}")));
        }
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(AdapterError::RateLimited { retry_after });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AdapterError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AdapterError::InvalidResponse(e.to_string()))?;

        self.parse_response(&body, &request, latency_ms)
    }
}
