//! Per-model price table.
//!
//! Loaded once at startup and immutable thereafter. Adapters compute the
//! cost of each call from this table; the engine never consults pricing
//! during a step.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;

const DEFAULT_PRICING: &str = include_str!("../../pricing/models.json");

/// Unit prices for one model, in currency per 1000 tokens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

/// Immutable `provider -> model -> prices` mapping.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PricingTable {
    #[serde(flatten)]
    providers: HashMap<String, HashMap<String, ModelPricing>>,
}

impl PricingTable {
    /// The table shipped with the crate.
    pub fn builtin() -> Self {
        serde_json::from_str(DEFAULT_PRICING).expect("embedded pricing table is valid JSON")
    }

    /// Load a table from a JSON file, e.g. a deployment override.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, WorkflowError> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| WorkflowError::Pricing(format!("read {:?}: {e}", path.as_ref())))?;
        serde_json::from_str(&raw).map_err(|e| WorkflowError::Pricing(e.to_string()))
    }

    /// Prices for a model. Unknown models price at zero, matching the
    /// reporting-only behavior for providers without a configured table.
    pub fn get(&self, provider: &str, model: &str) -> ModelPricing {
        self.providers
            .get(provider)
            .and_then(|models| models.get(model))
            .copied()
            .unwrap_or_default()
    }

    /// Cost of a call, rounded to 6 decimal places.
    pub fn cost(&self, provider: &str, model: &str, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        let pricing = self.get(provider, model);
        let input = prompt_tokens as f64 / 1000.0 * pricing.input_per_1k;
        let output = completion_tokens as f64 / 1000.0 * pricing.output_per_1k;
        round6(input + output)
    }
}

pub(crate) fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}
