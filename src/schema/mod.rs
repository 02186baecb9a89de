//! Workflow definition schema.
//!
//! A workflow is a DAG of nodes (agent, tool, or conditional) connected by
//! edges that may carry a branch condition. The schema here is what the
//! editor persists and what [`plan`](crate::planner::plan) consumes; runtime
//! state lives in [`core::run_state`](crate::core::run_state).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WorkflowError;

/// Hard cap on graph size. Plans are rejected above this.
pub const MAX_WORKFLOW_NODES: usize = 50;

/// Policy cap on per-node retry counts.
pub const RETRY_POLICY_CAP: u32 = 5;

/// Node variant tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Agent,
    Tool,
    Conditional,
}

/// A node definition: stable id, variant tag, and configuration record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeSchema {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub data: NodeData,
}

/// Node configuration. Agent fields apply to every variant; tool and
/// conditional variants add their own optional fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeData {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub fallback_agent_id: Option<String>,
    #[serde(default)]
    pub memory_store_key: Option<String>,
    #[serde(default)]
    pub memory_recall_query: Option<String>,

    // tool variant
    #[serde(default)]
    pub tool_type: Option<String>,
    #[serde(default)]
    pub tool_config: Option<BTreeMap<String, Value>>,

    // conditional variant
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub branches: Option<BTreeMap<String, String>>,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_max_retries() -> u32 {
    2
}

fn default_timeout_seconds() -> u64 {
    60
}

impl Default for NodeData {
    fn default() -> Self {
        NodeData {
            name: String::new(),
            provider: default_provider(),
            model: default_model(),
            system_prompt: String::new(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_retries: default_max_retries(),
            timeout_seconds: default_timeout_seconds(),
            fallback_agent_id: None,
            memory_store_key: None,
            memory_recall_query: None,
            tool_type: None,
            tool_config: None,
            condition: None,
            branches: None,
        }
    }
}

impl NodeData {
    /// Display name: the configured name, or the node id when unset.
    pub fn display_name<'a>(&'a self, node_id: &'a str) -> &'a str {
        if self.name.is_empty() {
            node_id
        } else {
            &self.name
        }
    }

    /// Validate bounds on the configuration record.
    pub fn validate(&self, node_id: &str) -> Result<(), WorkflowError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(WorkflowError::InvalidNodeConfig {
                node_id: node_id.to_string(),
                reason: format!("temperature {} outside [0, 2]", self.temperature),
            });
        }
        if self.max_tokens == 0 {
            return Err(WorkflowError::InvalidNodeConfig {
                node_id: node_id.to_string(),
                reason: "max_tokens must be positive".to_string(),
            });
        }
        if self.max_retries > RETRY_POLICY_CAP {
            return Err(WorkflowError::InvalidNodeConfig {
                node_id: node_id.to_string(),
                reason: format!(
                    "max_retries {} exceeds the policy cap of {}",
                    self.max_retries, RETRY_POLICY_CAP
                ),
            });
        }
        if self.timeout_seconds == 0 {
            return Err(WorkflowError::InvalidNodeConfig {
                node_id: node_id.to_string(),
                reason: "timeout_seconds must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// An edge definition. The optional condition is one of `equals:<s>`,
/// `contains:<s>`, or `default`, evaluated against the source node's output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EdgeSchema {
    #[serde(default)]
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub condition: Option<String>,
}

impl EdgeSchema {
    /// Stable label for diagnostics: the edge id, or `source->target`.
    pub fn label(&self) -> String {
        if self.id.is_empty() {
            format!("{}->{}", self.source, self.target)
        } else {
            self.id.clone()
        }
    }
}

/// The raw graph payload: node list plus edge list.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GraphData {
    #[serde(default)]
    pub nodes: Vec<NodeSchema>,
    #[serde(default)]
    pub edges: Vec<EdgeSchema>,
}

/// A stored workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub graph: GraphData,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>, graph: GraphData) -> Self {
        let now = Utc::now();
        WorkflowDefinition {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            description: None,
            graph,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A user-supplied resource budget. Either ceiling may be absent; with both
/// absent the enforcer runs in reporting-only mode.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Budget {
    #[serde(default)]
    pub max_tokens: Option<u64>,
    #[serde(default)]
    pub max_cost: Option<f64>,
}

impl Budget {
    pub fn is_unbounded(&self) -> bool {
        self.max_tokens.is_none() && self.max_cost.is_none()
    }
}
