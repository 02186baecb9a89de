//! Shared test doubles: a scripted adapter and a collecting publisher.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use nexusflow::core::event_bus::{EventPublisher, ExecutionEvent, PublishOutcome};
use nexusflow::llm::{AdapterError, AdapterRegistry, CompletionRequest, CompletionResponse, LlmAdapter};
use nexusflow::schema::{EdgeSchema, GraphData, NodeData, NodeKind, NodeSchema, WorkflowDefinition};
use nexusflow::{EngineConfig, RuntimeContext, WorkflowRunner};

/// Scripted adapter. Replies are keyed by model id and consumed in order;
/// an exhausted script answers with a canned success.
pub struct MockAdapter {
    replies: Mutex<HashMap<String, VecDeque<Result<MockOk, AdapterError>>>>,
    requests: Mutex<Vec<CompletionRequest>>,
    delay: Option<Duration>,
}

#[derive(Clone)]
pub struct MockOk {
    pub text: String,
    pub tokens_prompt: u64,
    pub tokens_completion: u64,
    pub cost: f64,
}

impl Default for MockOk {
    fn default() -> Self {
        MockOk {
            text: "done".into(),
            tokens_prompt: 10,
            tokens_completion: 5,
            cost: 0.001,
        }
    }
}

impl MockAdapter {
    pub fn new() -> Self {
        MockAdapter {
            replies: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        MockAdapter {
            delay: Some(delay),
            ..MockAdapter::new()
        }
    }

    pub fn script_ok(&self, model: &str, text: &str) {
        self.script(model, Ok(MockOk {
            text: text.into(),
            ..MockOk::default()
        }));
    }

    pub fn script_ok_with_cost(&self, model: &str, text: &str, cost: f64) {
        self.script(model, Ok(MockOk {
            text: text.into(),
            cost,
            ..MockOk::default()
        }));
    }

    pub fn script_err(&self, model: &str, error: AdapterError) {
        self.script(model, Err(error));
    }

    fn script(&self, model: &str, reply: Result<MockOk, AdapterError>) {
        self.replies
            .lock()
            .entry(model.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Every request this adapter served, in arrival order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl LlmAdapter for MockAdapter {
    fn id(&self) -> &str {
        "mock"
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, AdapterError> {
        self.requests.lock().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let reply = self
            .replies
            .lock()
            .get_mut(&request.model)
            .and_then(|queue| queue.pop_front())
            .unwrap_or(Ok(MockOk::default()));
        reply.map(|ok| CompletionResponse {
            text: ok.text,
            tokens_prompt: ok.tokens_prompt,
            tokens_completion: ok.tokens_completion,
            model_used: request.model.clone(),
            latency_ms: 1,
            cost: ok.cost,
        })
    }
}

/// Publisher that stores every event for assertions.
#[derive(Default)]
pub struct CollectingPublisher {
    events: Mutex<Vec<ExecutionEvent>>,
}

impl CollectingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.events.lock().clone()
    }

    pub fn event_types(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(|e| e.event_type()).collect()
    }

    /// Index of the first event matching the predicate.
    pub fn position(&self, predicate: impl Fn(&ExecutionEvent) -> bool) -> Option<usize> {
        self.events.lock().iter().position(|e| predicate(e))
    }
}

#[async_trait]
impl EventPublisher for CollectingPublisher {
    async fn publish(&self, _run_id: &str, event: ExecutionEvent) -> PublishOutcome {
        self.events.lock().push(event);
        PublishOutcome::Acknowledged
    }
}

/// An agent node wired to the mock adapter; the model doubles as the script
/// key.
pub fn node(id: &str) -> NodeSchema {
    let mut data = NodeData::default();
    data.provider = "mock".into();
    data.model = format!("m-{id}");
    data.max_tokens = 100;
    data.max_retries = 0;
    NodeSchema {
        id: id.to_string(),
        kind: NodeKind::Agent,
        data,
    }
}

pub fn edge(source: &str, target: &str) -> EdgeSchema {
    EdgeSchema {
        id: String::new(),
        source: source.to_string(),
        target: target.to_string(),
        condition: None,
    }
}

pub fn cond_edge(source: &str, target: &str, condition: &str) -> EdgeSchema {
    EdgeSchema {
        id: String::new(),
        source: source.to_string(),
        target: target.to_string(),
        condition: Some(condition.to_string()),
    }
}

pub fn definition(nodes: Vec<NodeSchema>, edges: Vec<EdgeSchema>) -> WorkflowDefinition {
    WorkflowDefinition::new("test-workflow", GraphData { nodes, edges })
}

/// A runner wired to the given doubles, with deterministic time and ids.
pub fn runner(adapter: Arc<MockAdapter>, publisher: Arc<CollectingPublisher>) -> WorkflowRunner {
    let mut registry = AdapterRegistry::new();
    registry.register(adapter);
    WorkflowRunner::builder()
        .adapters(Arc::new(registry))
        .publisher(publisher)
        .config(EngineConfig::default())
        .context(RuntimeContext::fixed(1_700_000_000, "run"))
        .build()
}
