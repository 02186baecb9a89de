use petgraph::stable_graph::NodeIndex;

use crate::schema::{NodeData, NodeKind};

/// A node in the built DAG.
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub id: String,
    pub kind: NodeKind,
    pub config: NodeData,
}

/// A directed edge with its parsed condition.
#[derive(Debug, Clone)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub condition: Option<EdgeCondition>,
}

/// Parsed branch condition carried on an edge.
///
/// `Default` edges are only consulted after every non-default sibling edge
/// has been evaluated and rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeCondition {
    Equals(String),
    Contains(String),
    Default,
}

impl EdgeCondition {
    /// Parse a raw condition expression: `equals:<s>`, `contains:<s>`, or
    /// `default`.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw == "default" {
            return Some(EdgeCondition::Default);
        }
        if let Some(value) = raw.strip_prefix("equals:") {
            return Some(EdgeCondition::Equals(value.to_string()));
        }
        if let Some(value) = raw.strip_prefix("contains:") {
            return Some(EdgeCondition::Contains(value.to_string()));
        }
        None
    }

    /// Evaluate this condition against the source node's output text.
    pub fn matches(&self, text: &str) -> bool {
        match self {
            EdgeCondition::Equals(expected) => text == expected,
            EdgeCondition::Contains(needle) => text.contains(needle),
            EdgeCondition::Default => true,
        }
    }

    pub fn is_default(&self) -> bool {
        matches!(self, EdgeCondition::Default)
    }
}

/// Node id to petgraph NodeIndex mapping.
pub type NodeIndexMap = std::collections::HashMap<String, NodeIndex>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_condition_forms() {
        assert_eq!(
            EdgeCondition::parse("equals:approve"),
            Some(EdgeCondition::Equals("approve".into()))
        );
        assert_eq!(
            EdgeCondition::parse("contains:yes"),
            Some(EdgeCondition::Contains("yes".into()))
        );
        assert_eq!(EdgeCondition::parse("default"), Some(EdgeCondition::Default));
        assert_eq!(EdgeCondition::parse("regex:.*"), None);
    }

    #[test]
    fn test_matches() {
        assert!(EdgeCondition::Equals("ok".into()).matches("ok"));
        assert!(!EdgeCondition::Equals("ok".into()).matches("ok!"));
        assert!(EdgeCondition::Contains("ok".into()).matches("looks ok to me"));
        assert!(EdgeCondition::Default.matches("anything"));
    }
}
