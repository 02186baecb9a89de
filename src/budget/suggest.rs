//! Ranked cost-cut suggestions.
//!
//! When the static estimate exceeds the cost ceiling, each step is checked
//! against a provider-pinned model downgrade ladder, and steps with no
//! dependents can be skipped outright. Candidates are ranked by savings;
//! the cumulative column tells the caller how many suggestions to accept
//! before the plan fits. Nothing is applied automatically.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::llm::PricingTable;
use crate::llm::pricing::round6;
use crate::schema::GraphData;

use super::estimate::CostEstimate;

/// Pinned downgrade ladder per model. The order is the preference order.
fn downgrade_ladder(model: &str) -> &'static [&'static str] {
    match model {
        "gpt-4o" => &["gpt-4o-mini", "gpt-3.5-turbo"],
        "gpt-4o-mini" => &["gpt-3.5-turbo"],
        "claude-3.5-sonnet" => &["claude-3-haiku"],
        _ => &[],
    }
}

fn provider_for(model: &str) -> Option<&'static str> {
    match model {
        "gpt-4o" | "gpt-4o-mini" | "gpt-3.5-turbo" => Some("openai"),
        "claude-3.5-sonnet" | "claude-3-haiku" => Some("anthropic"),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    DowngradeModel,
    SkipAgent,
}

/// A single ranked suggestion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BudgetSuggestion {
    pub action: SuggestedAction,
    pub agent: String,
    pub saves: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact: Option<String>,
    pub cumulative_savings: f64,
    pub would_fit_budget: bool,
}

/// Generate suggestions ranked by savings descending.
pub fn generate_suggestions(
    estimate: &CostEstimate,
    max_cost: f64,
    data: &GraphData,
    pricing: &PricingTable,
) -> Vec<BudgetSuggestion> {
    let mut suggestions = Vec::new();

    for step in &estimate.steps {
        for &target_model in downgrade_ladder(&step.model) {
            let target_provider = provider_for(target_model).unwrap_or(step.provider.as_str());
            let new_cost = pricing.cost(
                target_provider,
                target_model,
                step.prompt_tokens,
                step.completion_tokens,
            );
            let savings = round6(step.cost - new_cost);
            if savings > 0.0 {
                suggestions.push(BudgetSuggestion {
                    action: SuggestedAction::DowngradeModel,
                    agent: step.node_id.clone(),
                    saves: savings,
                    from_model: Some(step.model.clone()),
                    to_model: Some(target_model.to_string()),
                    impact: Some(format!(
                        "{target_model} may produce shorter or less nuanced outputs"
                    )),
                    cumulative_savings: 0.0,
                    would_fit_budget: false,
                });
            }
        }
    }

    let sources: HashSet<&str> = data.edges.iter().map(|e| e.source.as_str()).collect();
    for step in &estimate.steps {
        if !sources.contains(step.node_id.as_str()) {
            suggestions.push(BudgetSuggestion {
                action: SuggestedAction::SkipAgent,
                agent: step.node_id.clone(),
                saves: step.cost,
                from_model: None,
                to_model: None,
                impact: Some("Optional branch with no downstream dependencies".to_string()),
                cumulative_savings: 0.0,
                would_fit_budget: false,
            });
        }
    }

    // stable: equal savings keep plan-order ranking
    suggestions.sort_by(|a, b| {
        b.saves
            .partial_cmp(&a.saves)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut cumulative = 0.0;
    for suggestion in &mut suggestions {
        cumulative = round6(cumulative + suggestion.saves);
        suggestion.cumulative_savings = cumulative;
        suggestion.would_fit_budget = estimate.total - cumulative <= max_cost;
    }

    suggestions
}
