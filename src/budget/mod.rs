//! Budget planning: static pre-run estimation, ranked cut suggestions, and
//! the runtime enforcer.

pub mod enforcer;
pub mod estimate;
pub mod suggest;

pub use enforcer::{BudgetEnforcer, BudgetStatus, BudgetUsage};
pub use estimate::{estimate_plan_cost, Confidence, CostEstimate, StepEstimate};
pub use suggest::{generate_suggestions, BudgetSuggestion, SuggestedAction};

/// Assumed ratio of a dependency's `max_tokens` actually produced.
pub const AVG_OUTPUT_RATIO: f64 = 0.6;

/// Prompt-token floor for steps without dependencies (the user input).
pub const BASE_INPUT_ESTIMATE: u64 = 200;

/// Framing overhead added per dependency when marshalling context.
pub const FORMATTING_OVERHEAD_PER_DEP: u64 = 50;

/// Crude characters-per-token divisor for system prompts.
pub const CHARS_PER_TOKEN: u64 = 4;

/// Fraction of a ceiling at which the one-shot warning fires.
pub const WARNING_THRESHOLD: f64 = 0.8;
