pub mod budget;
pub mod core;
pub mod error;
pub mod graph;
pub mod llm;
pub mod memory;
pub mod planner;
pub mod schema;
pub mod scheduler;

pub use crate::budget::{
    estimate_plan_cost, generate_suggestions, BudgetEnforcer, BudgetStatus, BudgetSuggestion,
    Confidence, CostEstimate,
};
pub use crate::core::backtrack::{StepOutcome, StepSuccess};
pub use crate::core::driver::{EngineConfig, ExecutionDriver};
pub use crate::core::event_bus::{
    ChannelPublisher, EventEmitter, EventPublisher, ExecutionEvent, NoopPublisher, PublishOutcome,
};
pub use crate::core::run_state::{
    ExecutionRecord, RunOutcome, RunStatus, SkipReason, StepRecord, StepStatus,
};
pub use crate::core::runtime_context::RuntimeContext;
pub use crate::error::{StepError, StepErrorKind, WorkflowError, WorkflowResult};
pub use crate::graph::Dag;
pub use crate::llm::{
    AdapterError, AdapterRegistry, AnthropicAdapter, CompletionRequest, CompletionResponse,
    LlmAdapter, OpenAiAdapter, PricingTable,
};
pub use crate::memory::{InMemoryStore, MemoryProvider, MemorySnippet};
pub use crate::planner::{plan, ExecutionPlan, ParallelGroup, PlanEntry, PlanSummary};
pub use crate::schema::{
    Budget, EdgeSchema, GraphData, NodeData, NodeKind, NodeSchema, WorkflowDefinition,
};
pub use crate::scheduler::{RunHandle, RunPhase, RunSubmission, WorkflowRunner};
