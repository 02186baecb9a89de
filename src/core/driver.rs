//! Plan-driven execution.
//!
//! One driver task owns the run. For each parallel group it marshals step
//! inputs from upstream outputs, dispatches every runnable member
//! concurrently, and applies the returned outcomes to the run state -- step
//! workers never mutate shared state. Conditional routing, downstream skip
//! propagation, and the budget halt all happen between groups on the driver
//! task.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::budget::BudgetEnforcer;
use crate::core::backtrack::{
    self, FallbackSpec, StepContext, StepOutcome, StepRequest, StepSuccess,
};
use crate::core::event_bus::{EventEmitter, ExecutionEvent, TokenCounts};
use crate::core::run_state::{
    RunOutcome, RunState, RunStatus, SkipReason, StepOutput, StepRecord, StepStatus,
};
use crate::graph::Dag;
use crate::llm::AdapterRegistry;
use crate::memory::MemoryProvider;
use crate::planner::{ExecutionPlan, PlanEntry};
use crate::schema::{NodeData, NodeKind, MAX_WORKFLOW_NODES, RETRY_POLICY_CAP};

/// Engine-wide knobs, shared by the scheduler and every run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Hard cap on graph size.
    pub max_nodes: usize,
    /// Policy ceiling on per-node retry counts.
    pub max_retry_cap: u32,
    /// Bounded (+10%) jitter on retry backoff. Off by default so event
    /// timing stays deterministic under test.
    pub retry_jitter: bool,
    /// How many memory entries a recall query may prepend.
    pub memory_recall_top_k: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_nodes: MAX_WORKFLOW_NODES,
            max_retry_cap: RETRY_POLICY_CAP,
            retry_jitter: false,
            memory_recall_top_k: 5,
        }
    }
}

/// Drives one plan to completion.
pub struct ExecutionDriver {
    run_id: String,
    plan: ExecutionPlan,
    dag: Dag,
    adapters: Arc<AdapterRegistry>,
    emitter: EventEmitter,
    enforcer: Arc<BudgetEnforcer>,
    memory: Option<Arc<dyn MemoryProvider>>,
    cancel: CancellationToken,
    config: EngineConfig,
}

impl ExecutionDriver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        run_id: impl Into<String>,
        plan: ExecutionPlan,
        dag: Dag,
        adapters: Arc<AdapterRegistry>,
        emitter: EventEmitter,
        enforcer: Arc<BudgetEnforcer>,
        memory: Option<Arc<dyn MemoryProvider>>,
        cancel: CancellationToken,
        config: EngineConfig,
    ) -> Self {
        ExecutionDriver {
            run_id: run_id.into(),
            plan,
            dag,
            adapters,
            emitter,
            enforcer,
            memory,
            cancel,
            config,
        }
    }

    /// Run the plan to a terminal outcome. Per-step failures never surface
    /// as errors here; they are folded into the outcome.
    pub async fn run(self, user_input: Option<String>) -> RunOutcome {
        let started = Instant::now();
        info!(run_id = %self.run_id, steps = self.plan.total_steps, "execution started");

        self.emitter
            .emit(ExecutionEvent::ExecutionStarted {
                plan: self.plan.summary(),
                timestamp: self.emitter.timestamp(),
            })
            .await;

        let mut state = RunState::new(self.run_id.clone(), &self.plan);
        let mut cancelled = false;
        let mut budget_stop = false;
        let groups = self.plan.groups.clone();

        for group in &groups {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let mut batch: Vec<StepRequest> = Vec::new();
            for entry in &group.entries {
                if state.status(&entry.node_id) != Some(StepStatus::Pending) {
                    continue;
                }
                if !entry.deps.is_empty() {
                    let has_live_dep = entry
                        .deps
                        .iter()
                        .any(|dep| state.effective_output(dep).is_some());
                    if !has_live_dep {
                        // every dependency died without being caught by
                        // propagation (e.g. conditional dead ends)
                        self.skip_step(&mut state, &entry.node_id, SkipReason::DependencyFailed)
                            .await;
                        continue;
                    }
                }

                let (prompt, input) = self.build_step_input(&state, entry, user_input.as_deref()).await;
                state.mark_running(&entry.node_id, input, self.emitter.timestamp());
                batch.push(self.make_step_request(entry, group.group, prompt));
            }

            if batch.is_empty() {
                continue;
            }

            let ctx = StepContext {
                adapters: self.adapters.clone(),
                emitter: self.emitter.clone(),
                enforcer: self.enforcer.clone(),
                cancel: self.cancel.clone(),
                config: self.config.clone(),
            };

            let step_futures = batch.into_iter().map(|request| {
                let ctx = ctx.clone();
                async move {
                    ctx.emitter
                        .emit(ExecutionEvent::AgentStarted {
                            agent_id: request.node_id.clone(),
                            agent_name: request.agent_name.clone(),
                            parallel_group: request.parallel_group,
                            timestamp: ctx.emitter.timestamp(),
                        })
                        .await;
                    let node_id = request.node_id.clone();
                    let outcome = backtrack::execute_step(request, ctx).await;
                    (node_id, outcome)
                }
            });
            let results = futures::future::join_all(step_futures).await;

            for (node_id, outcome) in results {
                if matches!(outcome, StepOutcome::Cancelled) {
                    cancelled = true;
                }
                self.apply_outcome(&mut state, &node_id, outcome).await;
            }
            if cancelled {
                break;
            }

            // Steps already in flight were allowed to finish; nothing past
            // this group gets dispatched once the enforcer halts.
            if self.enforcer.is_halted() {
                let agents_not_run = state.mark_remaining_not_run();
                self.emitter
                    .emit(ExecutionEvent::BudgetExceeded {
                        consumed: self.enforcer.usage(),
                        budget: self.enforcer.limits(),
                        agents_not_run,
                        timestamp: self.emitter.timestamp(),
                    })
                    .await;
                budget_stop = true;
                break;
            }
        }

        if cancelled {
            let _ = state.mark_remaining_not_run();
        }

        let status = if cancelled {
            RunStatus::Cancelled
        } else if budget_stop || self.enforcer.is_halted() {
            RunStatus::BudgetExceeded
        } else {
            self.classify(&state)
        };
        let error = match status {
            RunStatus::Failed => Some("no terminal step produced output".to_string()),
            RunStatus::BudgetExceeded => Some("budget exceeded".to_string()),
            RunStatus::Cancelled => Some("cancelled".to_string()),
            _ => None,
        };

        let totals = state.totals(
            started.elapsed().as_millis() as u64,
            self.emitter.dropped_count(),
        );
        info!(run_id = %self.run_id, ?status, cost = totals.cost, "execution finished");

        self.emitter
            .emit(ExecutionEvent::ExecutionCompleted {
                status,
                totals,
                timestamp: self.emitter.timestamp(),
            })
            .await;

        state.into_outcome(status, totals, error)
    }

    /// Terminal classification over the executable leaves.
    fn classify(&self, state: &RunState) -> RunStatus {
        let produced = self
            .dag
            .leaf_ids()
            .iter()
            .any(|leaf| state.effective_output(leaf).is_some());
        if !produced {
            RunStatus::Failed
        } else if state.has_degraded_steps() {
            RunStatus::CompletedWithSkips
        } else {
            RunStatus::Completed
        }
    }

    async fn apply_outcome(&self, state: &mut RunState, node_id: &str, outcome: StepOutcome) {
        match outcome {
            StepOutcome::Completed(success) => {
                self.apply_success(state, node_id, success).await;
            }
            StepOutcome::Failed { error, attempts } => {
                state.mark_failed(
                    node_id,
                    error.to_string(),
                    attempts.saturating_sub(1),
                    self.emitter.timestamp(),
                );
                self.propagate_dead_paths(state, node_id).await;
            }
            StepOutcome::FailedWithFallback {
                error,
                attempts,
                fallback,
            } => {
                let parallel_group = state
                    .record(node_id)
                    .map(|r| r.parallel_group)
                    .unwrap_or(0);
                state.mark_failed(
                    node_id,
                    error.to_string(),
                    attempts.saturating_sub(1),
                    self.emitter.timestamp(),
                );

                match fallback.result {
                    Ok(success) => {
                        let output = StepOutput {
                            agent_name: fallback.agent_name.clone(),
                            text: success.text.clone(),
                            structured: None,
                        };
                        let record = self.fallback_record(
                            state,
                            node_id,
                            &fallback.fallback_id,
                            &fallback.agent_name,
                            parallel_group,
                            Ok(&success),
                        );
                        state.push_fallback_record(record, Some(output));
                        self.emitter
                            .emit(ExecutionEvent::AgentCompleted {
                                agent_id: fallback.fallback_id.clone(),
                                agent_name: fallback.agent_name.clone(),
                                tokens: TokenCounts {
                                    prompt: success.tokens_prompt,
                                    completion: success.tokens_completion,
                                },
                                cost: success.cost,
                                latency_ms: success.latency_ms,
                                timestamp: self.emitter.timestamp(),
                            })
                            .await;
                        if let Some(node) = self.dag.node(&fallback.fallback_id) {
                            self.store_memory(&node.config, &success.text).await;
                        }
                        if self.is_conditional(node_id) {
                            self.route_conditional(state, node_id, &success.text).await;
                        }
                    }
                    Err(fb_error) => {
                        let record = self.fallback_record(
                            state,
                            node_id,
                            &fallback.fallback_id,
                            &fallback.agent_name,
                            parallel_group,
                            Err(&fb_error.to_string()),
                        );
                        state.push_fallback_record(record, None);
                        self.propagate_dead_paths(state, node_id).await;
                    }
                }
            }
            StepOutcome::Cancelled => {}
        }
    }

    async fn apply_success(&self, state: &mut RunState, node_id: &str, success: StepSuccess) {
        let Some(node) = self.dag.node(node_id) else {
            warn!(node_id, "outcome for unknown node");
            return;
        };
        let agent_name = node.config.display_name(node_id).to_string();
        let output = StepOutput {
            agent_name: agent_name.clone(),
            text: success.text.clone(),
            structured: None,
        };
        state.mark_completed(
            node_id,
            output,
            success.tokens_prompt,
            success.tokens_completion,
            success.cost,
            success.latency_ms,
            success.attempts.saturating_sub(1),
            self.emitter.timestamp(),
        );
        self.emitter
            .emit(ExecutionEvent::AgentCompleted {
                agent_id: node_id.to_string(),
                agent_name,
                tokens: TokenCounts {
                    prompt: success.tokens_prompt,
                    completion: success.tokens_completion,
                },
                cost: success.cost,
                latency_ms: success.latency_ms,
                timestamp: self.emitter.timestamp(),
            })
            .await;

        self.store_memory(&node.config, &success.text).await;

        if node.kind == NodeKind::Conditional {
            self.route_conditional(state, node_id, &success.text).await;
        }
    }

    fn is_conditional(&self, node_id: &str) -> bool {
        self.dag
            .node(node_id)
            .map(|n| n.kind == NodeKind::Conditional)
            .unwrap_or(false)
    }

    /// Select exactly one outgoing branch of a completed conditional node.
    ///
    /// Edges are tried in ascending target-id order; `default` edges only
    /// after every non-default edge has been rejected. Targets on losing
    /// branches are skipped and the skip propagates.
    async fn route_conditional(&self, state: &mut RunState, node_id: &str, output_text: &str) {
        let edges = self.dag.outgoing_edges(node_id);

        let mut selected: Option<String> = None;
        for edge in &edges {
            let matched = match &edge.condition {
                None => true,
                Some(condition) if !condition.is_default() => condition.matches(output_text),
                Some(_) => false,
            };
            if matched {
                selected = Some(edge.target.clone());
                break;
            }
        }
        if selected.is_none() {
            selected = edges
                .iter()
                .find(|e| e.condition.as_ref().is_some_and(|c| c.is_default()))
                .map(|e| e.target.clone());
        }

        let mut seen = std::collections::HashSet::new();
        for edge in &edges {
            if !seen.insert(edge.target.clone()) {
                continue;
            }
            if Some(edge.target.as_str()) == selected.as_deref() {
                continue;
            }
            if state.status(&edge.target) == Some(StepStatus::Pending) {
                self.skip_step(state, &edge.target, SkipReason::ConditionNotMet)
                    .await;
            }
        }
    }

    async fn skip_step(&self, state: &mut RunState, node_id: &str, reason: SkipReason) {
        state.mark_skipped(node_id, reason);
        self.emitter
            .emit(ExecutionEvent::AgentSkipped {
                agent_id: node_id.to_string(),
                reason,
                timestamp: self.emitter.timestamp(),
            })
            .await;
        self.propagate_dead_paths(state, node_id).await;
    }

    /// Mark descendants skipped when every path from a root now runs
    /// through a dead ancestor. A descendant keeping at least one live or
    /// undecided dependency stays pending and later runs with a partial
    /// input map.
    async fn propagate_dead_paths(&self, state: &mut RunState, from: &str) {
        let mut stack = vec![from.to_string()];
        while let Some(current) = stack.pop() {
            for dependent in self.dag.dependents_of(&current) {
                if state.status(&dependent) != Some(StepStatus::Pending) {
                    continue;
                }
                let all_deps_dead = self.dag.deps_of(&dependent).iter().all(|dep| {
                    state.effective_output(dep).is_none()
                        && matches!(
                            state.status(dep),
                            Some(StepStatus::Failed)
                                | Some(StepStatus::Skipped)
                                | Some(StepStatus::NotRun)
                        )
                });
                if all_deps_dead {
                    state.mark_skipped(&dependent, SkipReason::DependencyFailed);
                    self.emitter
                        .emit(ExecutionEvent::AgentSkipped {
                            agent_id: dependent.clone(),
                            reason: SkipReason::DependencyFailed,
                            timestamp: self.emitter.timestamp(),
                        })
                        .await;
                    stack.push(dependent);
                }
            }
        }
    }

    /// Gather dependency outputs, prepend any memory-recall payload, and
    /// attach the root user input for dependency-free nodes. Missing
    /// dependencies are simply absent; the engine invents no placeholders.
    async fn build_step_input(
        &self,
        state: &RunState,
        entry: &PlanEntry,
        user_input: Option<&str>,
    ) -> (String, Value) {
        let mut parts: Vec<String> = Vec::new();

        if let Some(recalled) = self.recall_memory(&entry.config).await {
            parts.push(recalled);
        }

        let mut dep_outputs = serde_json::Map::new();
        if entry.deps.is_empty() {
            if let Some(input) = user_input {
                if !input.is_empty() {
                    parts.push(format!("User input:\n{input}"));
                }
            }
        } else {
            let mut lines: Vec<String> = Vec::new();
            for dep in &entry.deps {
                if let Some(output) = state.effective_output(dep) {
                    lines.push(format!("\n[{}]:\n{}", output.agent_name, output.text));
                    dep_outputs.insert(
                        dep.clone(),
                        json!({"agent_name": output.agent_name, "text": output.text}),
                    );
                }
            }
            if !lines.is_empty() {
                parts.push("Context from previous agents:".to_string());
                parts.extend(lines);
            }
        }

        if parts.is_empty() {
            parts.push("No input provided.".to_string());
        }

        let prompt = parts.join("\n\n");
        let input = json!({
            "prompt": prompt,
            "system_prompt": entry.config.system_prompt,
            "dependency_outputs": Value::Object(dep_outputs),
        });
        (prompt, input)
    }

    async fn recall_memory(&self, config: &NodeData) -> Option<String> {
        let memory = self.memory.as_ref()?;
        let query = config.memory_recall_query.as_ref()?;
        match memory
            .recall(&self.run_id, query, self.config.memory_recall_top_k)
            .await
        {
            Ok(snippets) if !snippets.is_empty() => {
                let mut lines = vec!["Recalled context:".to_string()];
                for snippet in snippets {
                    lines.push(format!("[{}]:\n{}", snippet.key, snippet.text));
                }
                Some(lines.join("\n"))
            }
            Ok(_) => None,
            Err(e) => {
                warn!(run_id = %self.run_id, error = %e, "memory recall failed");
                None
            }
        }
    }

    async fn store_memory(&self, config: &NodeData, text: &str) {
        let (Some(memory), Some(key)) = (self.memory.as_ref(), config.memory_store_key.as_ref())
        else {
            return;
        };
        if let Err(e) = memory.store(&self.run_id, key, text).await {
            warn!(run_id = %self.run_id, key = %key, error = %e, "memory store failed");
        }
    }

    fn make_step_request(&self, entry: &PlanEntry, group: usize, prompt: String) -> StepRequest {
        let fallback = entry
            .config
            .fallback_agent_id
            .as_ref()
            .filter(|id| !id.is_empty())
            .and_then(|id| self.dag.node(id))
            .map(|node| FallbackSpec {
                node_id: node.id.clone(),
                agent_name: node.config.display_name(&node.id).to_string(),
                config: node.config.clone(),
            });

        StepRequest {
            node_id: entry.node_id.clone(),
            agent_name: entry.config.display_name(&entry.node_id).to_string(),
            parallel_group: group,
            config: entry.config.clone(),
            prompt,
            fallback,
        }
    }

    fn fallback_record(
        &self,
        state: &RunState,
        original_id: &str,
        fallback_id: &str,
        agent_name: &str,
        parallel_group: usize,
        result: Result<&StepSuccess, &String>,
    ) -> StepRecord {
        let config = self
            .dag
            .node(fallback_id)
            .map(|n| n.config.clone())
            .unwrap_or_default();
        let mut record = StepRecord {
            node_id: fallback_id.to_string(),
            name: agent_name.to_string(),
            status: StepStatus::Failed,
            input: None,
            output: None,
            error: None,
            provider: config.provider,
            model: config.model,
            tokens_prompt: 0,
            tokens_completion: 0,
            cost: 0.0,
            latency_ms: None,
            retries: 0,
            is_fallback: true,
            fallback_for: Some(original_id.to_string()),
            execution_order: state.next_execution_order(),
            parallel_group,
            started_at: None,
            completed_at: Some(self.emitter.timestamp()),
        };
        match result {
            Ok(success) => {
                record.status = StepStatus::Completed;
                record.output = Some(StepOutput {
                    agent_name: agent_name.to_string(),
                    text: success.text.clone(),
                    structured: None,
                });
                record.tokens_prompt = success.tokens_prompt;
                record.tokens_completion = success.tokens_completion;
                record.cost = success.cost;
                record.latency_ms = Some(success.latency_ms);
            }
            Err(error) => {
                record.error = Some((*error).clone());
            }
        }
        record
    }
}
