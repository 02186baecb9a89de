//! Static pre-run cost estimation.
//!
//! Prompt size is approximated from the system prompt plus the expected
//! output of each dependency (the 60% rule), completion size by the step's
//! `max_tokens` upper bound. Estimates are intentionally conservative; the
//! confidence tier tells the caller how far to trust them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::llm::PricingTable;
use crate::llm::pricing::round6;
use crate::planner::ExecutionPlan;
use crate::schema::{NodeData, NodeKind};

use super::{AVG_OUTPUT_RATIO, BASE_INPUT_ESTIMATE, CHARS_PER_TOKEN, FORMATTING_OVERHEAD_PER_DEP};

/// Per-step estimate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepEstimate {
    pub node_id: String,
    pub provider: String,
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost: f64,
}

/// How far to trust the estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// The full pre-run estimate for a plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CostEstimate {
    pub total: f64,
    pub steps: Vec<StepEstimate>,
    pub confidence: Confidence,
}

/// Estimate the cost of running a plan once, happy path.
pub fn estimate_plan_cost(plan: &ExecutionPlan, pricing: &PricingTable) -> CostEstimate {
    let configs: HashMap<&str, &NodeData> = plan
        .iter_entries()
        .map(|(_, entry)| (entry.node_id.as_str(), &entry.config))
        .collect();

    let mut steps = Vec::with_capacity(plan.total_steps);
    let mut total = 0.0;
    let mut has_conditional = false;
    let mut max_tokens_seen: u32 = 0;
    let mut longest_prompt: usize = 0;

    for (_, entry) in plan.iter_entries() {
        if entry.kind == NodeKind::Conditional {
            has_conditional = true;
        }
        max_tokens_seen = max_tokens_seen.max(entry.config.max_tokens);
        longest_prompt = longest_prompt.max(entry.config.system_prompt.len());

        let prompt_tokens = estimate_prompt_tokens(&entry.config, &entry.deps, &configs);
        let completion_tokens = u64::from(entry.config.max_tokens);
        let cost = pricing.cost(
            &entry.config.provider,
            &entry.config.model,
            prompt_tokens,
            completion_tokens,
        );

        total += cost;
        steps.push(StepEstimate {
            node_id: entry.node_id.clone(),
            provider: entry.config.provider.clone(),
            model: entry.config.model.clone(),
            prompt_tokens,
            completion_tokens,
            cost,
        });
    }

    let confidence = if has_conditional || max_tokens_seen > 4096 {
        Confidence::Low
    } else if max_tokens_seen <= 1024 && longest_prompt <= 512 {
        Confidence::High
    } else {
        Confidence::Medium
    };

    CostEstimate {
        total: round6(total),
        steps,
        confidence,
    }
}

fn estimate_prompt_tokens(
    config: &NodeData,
    deps: &[String],
    configs: &HashMap<&str, &NodeData>,
) -> u64 {
    let system_tokens = (config.system_prompt.len() as u64 + CHARS_PER_TOKEN - 1) / CHARS_PER_TOKEN;

    let input_tokens = if deps.is_empty() {
        BASE_INPUT_ESTIMATE
    } else {
        let expected_output: u64 = deps
            .iter()
            .map(|dep| {
                let dep_max = configs
                    .get(dep.as_str())
                    .map(|c| c.max_tokens)
                    .unwrap_or(1000);
                (f64::from(dep_max) * AVG_OUTPUT_RATIO) as u64
            })
            .sum();
        expected_output + FORMATTING_OVERHEAD_PER_DEP * deps.len() as u64
    };

    system_tokens + input_tokens
}
