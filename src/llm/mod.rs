//! Normalized adapter layer over LLM provider APIs.
//!
//! Every provider is exposed through [`LlmAdapter`]: one completed request
//! in, normalized text + token counts + computed cost out. Adapters are safe
//! for concurrent use and are looked up per step through the
//! [`AdapterRegistry`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

pub mod anthropic;
pub mod error;
pub mod openai;
pub mod pricing;

pub use anthropic::{AnthropicAdapter, AnthropicConfig};
pub use error::AdapterError;
pub use openai::{OpenAiAdapter, OpenAiConfig};
pub use pricing::{ModelPricing, PricingTable};

/// A single completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub system_prompt: String,
    pub user_message: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

/// A normalized completion response.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionResponse {
    pub text: String,
    pub tokens_prompt: u64,
    pub tokens_completion: u64,
    pub model_used: String,
    pub latency_ms: u64,
    pub cost: f64,
}

/// Uniform request/response contract over provider SDKs.
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    /// Stable provider id, e.g. `openai`.
    fn id(&self) -> &str;

    async fn complete(&self, request: CompletionRequest)
        -> Result<CompletionResponse, AdapterError>;
}

/// Registry of adapters keyed by provider id.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn LlmAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn LlmAdapter>) {
        self.adapters.insert(adapter.id().to_string(), adapter);
    }

    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn LlmAdapter>> {
        self.adapters.get(provider_id).cloned()
    }

    pub fn provider_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.adapters.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy;

    #[async_trait]
    impl LlmAdapter for Dummy {
        fn id(&self) -> &str {
            "dummy"
        }

        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, AdapterError> {
            Ok(CompletionResponse {
                text: request.user_message,
                tokens_prompt: 1,
                tokens_completion: 1,
                model_used: request.model,
                latency_ms: 0,
                cost: 0.0,
            })
        }
    }

    #[tokio::test]
    async fn test_registry_lookup() {
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(Dummy));
        assert!(registry.get("dummy").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.provider_ids(), vec!["dummy"]);
    }
}
