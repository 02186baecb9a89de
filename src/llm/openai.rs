//! OpenAI chat-completions adapter.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;

use super::error::AdapterError;
use super::pricing::PricingTable;
use super::{CompletionRequest, CompletionResponse, LlmAdapter};

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        OpenAiConfig {
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }
}

pub struct OpenAiAdapter {
    config: OpenAiConfig,
    client: reqwest::Client,
    pricing: Arc<PricingTable>,
}

impl OpenAiAdapter {
    pub fn new(config: OpenAiConfig, pricing: Arc<PricingTable>) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            pricing,
        }
    }

    fn build_headers(&self) -> Result<HeaderMap, AdapterError> {
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", self.config.api_key);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).map_err(|e| AdapterError::InvalidRequest(e.to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    fn build_payload(&self, request: &CompletionRequest) -> Value {
        let mut messages = Vec::new();
        if !request.system_prompt.is_empty() {
            messages.push(serde_json::json!({
                "role": "system",
                "content": request.system_prompt,
            }));
        }
        messages.push(serde_json::json!({
            "role": "user",
            "content": request.user_message,
        }));

        serde_json::json!({
            "model": request.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        })
    }

    fn parse_response(
        &self,
        body: &Value,
        request: &CompletionRequest,
        latency_ms: u64,
    ) -> Result<CompletionResponse, AdapterError> {
        let text = body
            .get("choices")
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                AdapterError::InvalidResponse("missing choices[0].message.content".to_string())
            })?
            .to_string();

        let usage = body.get("usage").cloned().unwrap_or(Value::Null);
        let tokens_prompt = usage
            .get("prompt_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let tokens_completion = usage
            .get("completion_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);

        let model_used = body
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or(&request.model)
            .to_string();

        let cost = self
            .pricing
            .cost("openai", &request.model, tokens_prompt, tokens_completion);

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
impl LlmAdapter for OpenAiAdapter {
    fn id(&self) -> &str {
        "openai"
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, AdapterError> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let headers = self.build_headers()?;
        let payload = self.build_payload(&request);
        tracing::debug!(model = %request.model, max_tokens = request.max_tokens, "openai request");

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

pub(crate) fn map_reqwest_error(e: reqwest::Error) -> AdapterError {
    if e.is_timeout() {
        AdapterError::Timeout
    } else {
        AdapterError::Network(e.to_string())
    }
}
