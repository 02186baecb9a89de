//! Per-run execution state.
//!
//! The driver task is the only writer. Step workers hand their outcomes
//! back to the driver, which applies them here and freezes the state into a
//! [`RunOutcome`] on termination.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::budget::estimate::CostEstimate;
use crate::planner::ExecutionPlan;
use crate::schema::{Budget, GraphData};

/// Terminal and pre-terminal status of one step record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Retrying,
    Completed,
    Failed,
    Skipped,
    NotRun,
}

/// Why a step was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    ConditionNotMet,
    DependencyFailed,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::ConditionNotMet => "condition_not_met",
            SkipReason::DependencyFailed => "dependency_failed",
        }
    }
}

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    CompletedWithSkips,
    Failed,
    BudgetExceeded,
    Cancelled,
}

/// Output payload passed to dependent steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutput {
    pub agent_name: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured: Option<Value>,
}

/// One step execution record, in the persisted layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub node_id: String,
    pub name: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<StepOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub provider: String,
    pub model: String,
    pub tokens_prompt: u64,
    pub tokens_completion: u64,
    pub cost: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    pub retries: u32,
    pub is_fallback: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_for: Option<String>,
    pub execution_order: usize,
    pub parallel_group: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

/// Aggregate totals for a run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RunTotals {
    pub tokens_prompt: u64,
    pub tokens_completion: u64,
    pub cost: f64,
    pub duration_ms: u64,
    pub agents_completed: usize,
    pub agents_failed: usize,
    pub agents_skipped: usize,
    pub events_dropped: u64,
}

/// The frozen result of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: String,
    pub status: RunStatus,
    pub totals: RunTotals,
    pub steps: Vec<StepRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Persisted execution layout, assembled around a frozen outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: String,
    pub workflow_id: String,
    pub status: RunStatus,
    pub graph_snapshot: GraphData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<Budget>,
    pub totals: RunTotals,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_plan: Option<ExecutionPlan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub steps: Vec<StepRecord>,
}

impl ExecutionRecord {
    pub fn assemble(
        workflow_id: &str,
        graph: &GraphData,
        plan: &ExecutionPlan,
        estimate: &CostEstimate,
        budget: Budget,
        outcome: RunOutcome,
    ) -> Self {
        ExecutionRecord {
            id: outcome.run_id.clone(),
            workflow_id: workflow_id.to_string(),
            status: outcome.status,
            graph_snapshot: graph.clone(),
            budget: if budget.is_unbounded() {
                None
            } else {
                Some(budget)
            },
            totals: outcome.totals,
            estimated_cost: Some(estimate.total),
            execution_plan: Some(plan.clone()),
            error: outcome.error,
            steps: outcome.steps,
        }
    }
}

/// Mutable run state, owned by the driver.
pub struct RunState {
    pub run_id: String,
    records: Vec<StepRecord>,
    index: HashMap<String, usize>,
    effective_outputs: HashMap<String, StepOutput>,
}

impl RunState {
    /// Pre-create a pending record for every planned step.
    pub fn new(run_id: impl Into<String>, plan: &ExecutionPlan) -> Self {
        let mut records = Vec::with_capacity(plan.total_steps);
        let mut index = HashMap::with_capacity(plan.total_steps);
        for (order, (group, entry)) in plan.iter_entries().enumerate() {
            index.insert(entry.node_id.clone(), records.len());
            records.push(StepRecord {
                node_id: entry.node_id.clone(),
                name: entry.config.display_name(&entry.node_id).to_string(),
                status: StepStatus::Pending,
                input: None,
                output: None,
                error: None,
                provider: entry.config.provider.clone(),
                model: entry.config.model.clone(),
                tokens_prompt: 0,
                tokens_completion: 0,
                cost: 0.0,
                latency_ms: None,
                retries: 0,
                is_fallback: false,
                fallback_for: None,
                execution_order: order,
                parallel_group: group,
                started_at: None,
                completed_at: None,
            });
        }
        RunState {
            run_id: run_id.into(),
            records,
            index,
            effective_outputs: HashMap::new(),
        }
    }

    pub fn status(&self, node_id: &str) -> Option<StepStatus> {
        self.index
            .get(node_id)
            .map(|&idx| self.records[idx].status)
    }

    pub fn record(&self, node_id: &str) -> Option<&StepRecord> {
        self.index.get(node_id).map(|&idx| &self.records[idx])
    }

    fn record_mut(&mut self, node_id: &str) -> Option<&mut StepRecord> {
        let idx = *self.index.get(node_id)?;
        Some(&mut self.records[idx])
    }

    pub fn mark_running(&mut self, node_id: &str, input: Value, started_at: String) {
        if let Some(record) = self.record_mut(node_id) {
            record.status = StepStatus::Running;
            record.input = Some(input);
            record.started_at = Some(started_at);
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn mark_completed(
        &mut self,
        node_id: &str,
        output: StepOutput,
        tokens_prompt: u64,
        tokens_completion: u64,
        cost: f64,
        latency_ms: u64,
        retries: u32,
        completed_at: String,
    ) {
        if let Some(record) = self.record_mut(node_id) {
            record.status = StepStatus::Completed;
            record.output = Some(output.clone());
            record.tokens_prompt = tokens_prompt;
            record.tokens_completion = tokens_completion;
            record.cost = cost;
            record.latency_ms = Some(latency_ms);
            record.retries = retries;
            record.completed_at = Some(completed_at);
        }
        self.effective_outputs.insert(node_id.to_string(), output);
    }

    pub fn mark_failed(&mut self, node_id: &str, error: String, retries: u32, completed_at: String) {
        if let Some(record) = self.record_mut(node_id) {
            record.status = StepStatus::Failed;
            record.error = Some(error);
            record.retries = retries;
            record.completed_at = Some(completed_at);
        }
    }

    pub fn mark_skipped(&mut self, node_id: &str, reason: SkipReason) {
        if let Some(record) = self.record_mut(node_id) {
            record.status = StepStatus::Skipped;
            record.error = Some(format!("skipped: {}", reason.as_str()));
        }
    }

    /// A fallback execution gets its own record; the substituted output is
    /// credited to the original node for data passing downstream.
    pub fn push_fallback_record(&mut self, record: StepRecord, credited_output: Option<StepOutput>) {
        if let Some(output) = credited_output {
            if let Some(for_node) = &record.fallback_for {
                self.effective_outputs.insert(for_node.clone(), output);
            }
        }
        self.index
            .insert(record.node_id.clone(), self.records.len());
        self.records.push(record);
    }

    /// Mark every still-pending step `not_run`; returns their ids in record
    /// order.
    pub fn mark_remaining_not_run(&mut self) -> Vec<String> {
        let mut ids = Vec::new();
        for record in &mut self.records {
            if matches!(record.status, StepStatus::Pending | StepStatus::Running) {
                record.status = StepStatus::NotRun;
                ids.push(record.node_id.clone());
            }
        }
        ids
    }

    pub fn effective_output(&self, node_id: &str) -> Option<&StepOutput> {
        self.effective_outputs.get(node_id)
    }

    /// True when some step was skipped or failed without a compensating
    /// fallback output.
    pub fn has_degraded_steps(&self) -> bool {
        self.records.iter().any(|record| {
            record.status == StepStatus::Skipped
                || (record.status == StepStatus::Failed
                    && !record.is_fallback
                    && !self.effective_outputs.contains_key(&record.node_id))
        })
    }

    pub fn next_execution_order(&self) -> usize {
        self.records.len()
    }

    /// Column sums over the step records.
    pub fn totals(&self, duration_ms: u64, events_dropped: u64) -> RunTotals {
        let mut totals = RunTotals {
            duration_ms,
            events_dropped,
            ..Default::default()
        };
        for record in &self.records {
            totals.tokens_prompt += record.tokens_prompt;
            totals.tokens_completion += record.tokens_completion;
            totals.cost += record.cost;
            match record.status {
                StepStatus::Completed => totals.agents_completed += 1,
                StepStatus::Failed => totals.agents_failed += 1,
                StepStatus::Skipped => totals.agents_skipped += 1,
                _ => {}
            }
        }
        totals.cost = crate::llm::pricing::round6(totals.cost);
        totals
    }

    pub fn into_outcome(self, status: RunStatus, totals: RunTotals, error: Option<String>) -> RunOutcome {
        RunOutcome {
            run_id: self.run_id,
            status,
            totals,
            steps: self.records,
            error,
        }
    }
}
