//! Run entry point.
//!
//! [`WorkflowRunner`] wires the adapter registry, publisher, memory and
//! pricing together. `submit` plans the graph, gates on the static cost
//! estimate, then spawns the driver and hands back a [`RunHandle`] for
//! status polling, waiting, and cancellation.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use tracing::error;

use crate::budget::{estimate_plan_cost, generate_suggestions, BudgetEnforcer, CostEstimate};
use crate::core::driver::{EngineConfig, ExecutionDriver};
use crate::core::event_bus::{EventEmitter, EventPublisher, ExecutionEvent, NoopPublisher};
use crate::core::run_state::{RunOutcome, RunStatus, RunTotals};
use crate::core::runtime_context::RuntimeContext;
use crate::error::WorkflowError;
use crate::graph::Dag;
use crate::llm::{AdapterRegistry, PricingTable};
use crate::memory::MemoryProvider;
use crate::planner::plan_dag;
use crate::schema::{Budget, WorkflowDefinition};

/// Observable run phase.
#[derive(Debug, Clone)]
pub enum RunPhase {
    Running,
    Finished(RunOutcome),
}

/// Handle to a submitted run.
#[derive(Debug)]
pub struct RunHandle {
    run_id: String,
    phase: Arc<Mutex<RunPhase>>,
    cancel: CancellationToken,
}

impl RunHandle {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub async fn phase(&self) -> RunPhase {
        self.phase.lock().await.clone()
    }

    /// The frozen outcome, if the run has terminated.
    pub async fn outcome(&self) -> Option<RunOutcome> {
        match self.phase().await {
            RunPhase::Finished(outcome) => Some(outcome),
            RunPhase::Running => None,
        }
    }

    /// Block until the run terminates.
    pub async fn wait(&self) -> RunOutcome {
        loop {
            if let RunPhase::Finished(outcome) = self.phase().await {
                return outcome;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
    }

    /// Request cooperative cancellation. Steps observe the signal at their
    /// next suspension point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Accepted submission: the run is executing in the background.
#[derive(Debug)]
pub struct RunSubmission {
    pub run_id: String,
    pub estimate: CostEstimate,
    pub handle: RunHandle,
}

/// Configured engine front door.
pub struct WorkflowRunner {
    adapters: Arc<AdapterRegistry>,
    publisher: Arc<dyn EventPublisher>,
    memory: Option<Arc<dyn MemoryProvider>>,
    pricing: Arc<PricingTable>,
    config: EngineConfig,
    context: RuntimeContext,
}

impl WorkflowRunner {
    pub fn builder() -> WorkflowRunnerBuilder {
        WorkflowRunnerBuilder {
            adapters: None,
            publisher: None,
            memory: None,
            pricing: None,
            config: EngineConfig::default(),
            context: RuntimeContext::default(),
        }
    }

    /// Validate, plan, estimate, and launch a run.
    ///
    /// When a cost ceiling is set and the static estimate exceeds it, the
    /// submission fails synchronously with ranked suggestions; nothing is
    /// applied automatically, the caller edits and resubmits.
    pub async fn submit(
        &self,
        definition: &WorkflowDefinition,
        user_input: Option<String>,
        budget: Budget,
    ) -> Result<RunSubmission, WorkflowError> {
        let dag = Dag::build(&definition.graph, self.config.max_nodes)?;
        let plan = plan_dag(&dag)?;
        let estimate = estimate_plan_cost(&plan, &self.pricing);

        if let Some(max_cost) = budget.max_cost {
            if estimate.total > max_cost {
                let suggestions =
                    generate_suggestions(&estimate, max_cost, &definition.graph, &self.pricing);
                return Err(WorkflowError::BudgetExceededEstimate {
                    estimated: estimate.total,
                    max_cost,
                    suggestions,
                });
            }
        }

        let run_id = self.context.id_generator.next_id();
        let cancel = CancellationToken::new();
        let emitter = EventEmitter::new(
            run_id.clone(),
            self.publisher.clone(),
            self.context.time_provider.clone(),
        );
        let enforcer = Arc::new(BudgetEnforcer::new(budget));

        let driver = ExecutionDriver::new(
            run_id.clone(),
            plan,
            dag,
            self.adapters.clone(),
            emitter,
            enforcer,
            self.memory.clone(),
            cancel.clone(),
            self.config.clone(),
        );

        let phase = Arc::new(Mutex::new(RunPhase::Running));
        let phase_exec = phase.clone();
        let watchdog_emitter = EventEmitter::new(
            run_id.clone(),
            self.publisher.clone(),
            self.context.time_provider.clone(),
        );
        let watchdog_run_id = run_id.clone();
        let driver_task = tokio::spawn(async move { driver.run(user_input).await });
        tokio::spawn(async move {
            let outcome = match driver_task.await {
                Ok(outcome) => outcome,
                Err(join_error) => {
                    // an invariant violation must still terminate the run
                    // with a final event, never leak a panic to subscribers
                    error!(run_id = %watchdog_run_id, error = %join_error, "driver task aborted");
                    let totals = RunTotals::default();
                    watchdog_emitter
                        .emit(ExecutionEvent::ExecutionCompleted {
                            status: RunStatus::Failed,
                            totals,
                            timestamp: watchdog_emitter.timestamp(),
                        })
                        .await;
                    RunOutcome {
                        run_id: watchdog_run_id,
                        status: RunStatus::Failed,
                        totals,
                        steps: Vec::new(),
                        error: Some("internal_error".to_string()),
                    }
                }
            };
            *phase_exec.lock().await = RunPhase::Finished(outcome);
        });

        Ok(RunSubmission {
            run_id: run_id.clone(),
            estimate,
            handle: RunHandle {
                run_id,
                phase,
                cancel,
            },
        })
    }
}

pub struct WorkflowRunnerBuilder {
    adapters: Option<Arc<AdapterRegistry>>,
    publisher: Option<Arc<dyn EventPublisher>>,
    memory: Option<Arc<dyn MemoryProvider>>,
    pricing: Option<Arc<PricingTable>>,
    config: EngineConfig,
    context: RuntimeContext,
}

impl WorkflowRunnerBuilder {
    pub fn adapters(mut self, adapters: Arc<AdapterRegistry>) -> Self {
        self.adapters = Some(adapters);
        self
    }

    pub fn publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn memory(mut self, memory: Arc<dyn MemoryProvider>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn pricing(mut self, pricing: Arc<PricingTable>) -> Self {
        self.pricing = Some(pricing);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn context(mut self, context: RuntimeContext) -> Self {
        self.context = context;
        self
    }

    pub fn build(self) -> WorkflowRunner {
        WorkflowRunner {
            adapters: self.adapters.unwrap_or_else(|| Arc::new(AdapterRegistry::new())),
            publisher: self.publisher.unwrap_or_else(|| Arc::new(NoopPublisher)),
            memory: self.memory,
            pricing: self
                .pricing
                .unwrap_or_else(|| Arc::new(PricingTable::builtin())),
            config: self.config,
            context: self.context,
        }
    }
}
