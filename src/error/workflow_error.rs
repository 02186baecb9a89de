//! Workflow-level error types.

use thiserror::Error;

use crate::budget::suggest::BudgetSuggestion;

/// Errors raised while validating, planning, or submitting a workflow.
///
/// Planning and estimation errors are fatal for the run and surface
/// synchronously from `submit`; step-level failures never appear here, they
/// are absorbed by the recovery layer and reported through the run outcome.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Workflow has no nodes")]
    EmptyWorkflow,
    #[error("Workflow has {count} nodes, exceeding the cap of {max}")]
    TooLarge { count: usize, max: usize },
    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),
    #[error("Edge '{edge}' references unknown node: {node}")]
    InvalidEdge { edge: String, node: String },
    #[error("Edge '{edge}' carries an invalid condition: {condition}")]
    InvalidCondition { edge: String, condition: String },
    #[error("Circular dependency detected involving: {}", nodes.join(", "))]
    CircularDependency { nodes: Vec<String> },
    #[error("Invalid configuration for node '{node_id}': {reason}")]
    InvalidNodeConfig { node_id: String, reason: String },
    #[error("Invalid fallback reference from '{node_id}' to '{fallback_id}': {reason}")]
    InvalidFallback {
        node_id: String,
        fallback_id: String,
        reason: String,
    },
    #[error("Estimated cost {estimated:.6} exceeds the cost budget {max_cost:.6}")]
    BudgetExceededEstimate {
        estimated: f64,
        max_cost: f64,
        suggestions: Vec<BudgetSuggestion>,
    },
    #[error("Pricing table error: {0}")]
    Pricing(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            WorkflowError::EmptyWorkflow.to_string(),
            "Workflow has no nodes"
        );
        assert_eq!(
            WorkflowError::TooLarge { count: 51, max: 50 }.to_string(),
            "Workflow has 51 nodes, exceeding the cap of 50"
        );
        let err = WorkflowError::CircularDependency {
            nodes: vec!["a".into(), "b".into()],
        };
        assert_eq!(
            err.to_string(),
            "Circular dependency detected involving: a, b"
        );
    }

    #[test]
    fn test_invalid_edge_display() {
        let err = WorkflowError::InvalidEdge {
            edge: "e1".into(),
            node: "ghost".into(),
        };
        assert!(err.to_string().contains("ghost"));
    }
}
