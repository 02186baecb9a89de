//! Typed run events and the pub/sub publisher seam.
//!
//! One logical channel per run, identified by the run id. Events serialize
//! to UTF-8 JSON, one event per message, with an ISO-8601 millisecond UTC
//! timestamp in every envelope. Ordering guarantees are per-step only:
//! `started` precedes the rest of a step's events, and
//! `execution_completed` is the last message on the channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::budget::enforcer::BudgetUsage;
use crate::core::run_state::{RunStatus, RunTotals, SkipReason};
use crate::core::runtime_context::TimeProvider;
use crate::planner::PlanSummary;
use crate::schema::Budget;

/// Token counts on `agent_completed`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TokenCounts {
    pub prompt: u64,
    pub completion: u64,
}

/// Every state transition the engine announces.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    ExecutionStarted {
        plan: PlanSummary,
        timestamp: String,
    },
    AgentStarted {
        agent_id: String,
        agent_name: String,
        parallel_group: usize,
        timestamp: String,
    },
    AgentCompleted {
        agent_id: String,
        agent_name: String,
        tokens: TokenCounts,
        cost: f64,
        latency_ms: u64,
        timestamp: String,
    },
    AgentFailed {
        agent_id: String,
        error: String,
        will_retry: bool,
        retries_remaining: u32,
        timestamp: String,
    },
    AgentRetrying {
        agent_id: String,
        retry_number: u32,
        timestamp: String,
    },
    AgentFallback {
        original_agent_id: String,
        fallback_agent_id: String,
        reason: String,
        timestamp: String,
    },
    AgentSkipped {
        agent_id: String,
        reason: SkipReason,
        timestamp: String,
    },
    BudgetWarning {
        consumed: BudgetUsage,
        budget: Budget,
        percentage: u32,
        timestamp: String,
    },
    BudgetExceeded {
        consumed: BudgetUsage,
        budget: Budget,
        agents_not_run: Vec<String>,
        timestamp: String,
    },
    ExecutionCompleted {
        status: RunStatus,
        totals: RunTotals,
        timestamp: String,
    },
}

impl ExecutionEvent {
    /// Terminal events are never dropped under backpressure.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionEvent::ExecutionCompleted { .. } | ExecutionEvent::BudgetExceeded { .. }
        )
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            ExecutionEvent::ExecutionStarted { .. } => "execution_started",
            ExecutionEvent::AgentStarted { .. } => "agent_started",
            ExecutionEvent::AgentCompleted { .. } => "agent_completed",
            ExecutionEvent::AgentFailed { .. } => "agent_failed",
            ExecutionEvent::AgentRetrying { .. } => "agent_retrying",
            ExecutionEvent::AgentFallback { .. } => "agent_fallback",
            ExecutionEvent::AgentSkipped { .. } => "agent_skipped",
            ExecutionEvent::BudgetWarning { .. } => "budget_warning",
            ExecutionEvent::BudgetExceeded { .. } => "budget_exceeded",
            ExecutionEvent::ExecutionCompleted { .. } => "execution_completed",
        }
    }

    /// One event per message, UTF-8 JSON.
    pub fn to_message(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                "{{\"type\":\"{}\",\"serialization_error\":\"{e}\"}}",
                self.event_type()
            )
        })
    }
}

/// Whether a publish reached the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Acknowledged,
    Dropped,
}

/// Transport seam. Must be safe for concurrent callers.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, run_id: &str, event: ExecutionEvent) -> PublishOutcome;
}

/// Publisher that acknowledges and discards everything. Used when no
/// subscriber is attached.
#[derive(Default)]
pub struct NoopPublisher;

#[async_trait]
impl EventPublisher for NoopPublisher {
    async fn publish(&self, _run_id: &str, _event: ExecutionEvent) -> PublishOutcome {
        PublishOutcome::Acknowledged
    }
}

/// In-process pub/sub over bounded channels, one per run.
///
/// Non-terminal events are dropped when the subscriber cannot drain within
/// the deadline; terminal events wait. The channel closes after
/// `execution_completed`.
pub struct ChannelPublisher {
    channels: Mutex<HashMap<String, mpsc::Sender<String>>>,
    capacity: usize,
    publish_deadline: Duration,
}

impl ChannelPublisher {
    pub fn new(capacity: usize, publish_deadline: Duration) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity,
            publish_deadline,
        }
    }

    /// Open the channel for a run and hand back the receiving half.
    pub fn subscribe(&self, run_id: &str) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.channels.lock().insert(run_id.to_string(), tx);
        rx
    }

    fn sender(&self, run_id: &str) -> Option<mpsc::Sender<String>> {
        self.channels.lock().get(run_id).cloned()
    }

    fn close(&self, run_id: &str) {
        self.channels.lock().remove(run_id);
    }
}

#[async_trait]
impl EventPublisher for ChannelPublisher {
    async fn publish(&self, run_id: &str, event: ExecutionEvent) -> PublishOutcome {
        let Some(tx) = self.sender(run_id) else {
            return PublishOutcome::Dropped;
        };
        let is_final = matches!(event, ExecutionEvent::ExecutionCompleted { .. });
        let message = event.to_message();

        let outcome = if event.is_terminal() {
            match tx.send(message).await {
                Ok(()) => PublishOutcome::Acknowledged,
                Err(_) => PublishOutcome::Dropped,
            }
        } else {
            match tx.send_timeout(message, self.publish_deadline).await {
                Ok(()) => PublishOutcome::Acknowledged,
                Err(_) => PublishOutcome::Dropped,
            }
        };

        if is_final {
            self.close(run_id);
        }
        outcome
    }
}

/// Per-run sender used by the driver and its step workers. Counts events
/// the transport had to drop; the count lands in the completion totals.
#[derive(Clone)]
pub struct EventEmitter {
    run_id: String,
    publisher: Arc<dyn EventPublisher>,
    time: Arc<dyn TimeProvider>,
    dropped: Arc<AtomicU64>,
}

impl EventEmitter {
    pub fn new(
        run_id: impl Into<String>,
        publisher: Arc<dyn EventPublisher>,
        time: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            publisher,
            time,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn timestamp(&self) -> String {
        self.time.now_iso()
    }

    pub async fn emit(&self, event: ExecutionEvent) {
        if self.publisher.publish(&self.run_id, event).await == PublishOutcome::Dropped {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
