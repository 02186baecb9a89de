//! DAG construction and structural validation.
//!
//! [`Dag::build`] turns raw [`GraphData`] into a petgraph-backed DAG,
//! rejecting oversized graphs, dangling edge endpoints, malformed
//! conditions, and bad fallback references. Cycle detection is deferred to
//! the planner, which reports the exact non-topologizable remainder.

use std::collections::{HashMap, HashSet};

use petgraph::stable_graph::StableDiGraph;
use petgraph::Direction;

use crate::error::WorkflowError;
use crate::schema::GraphData;

use super::types::{EdgeCondition, GraphEdge, GraphNode, NodeIndexMap};

/// A validated workflow DAG.
///
/// Fallback references are metadata only: they never become edges and the
/// referenced nodes ("reserve" nodes) are excluded from planning. A reserve
/// node executes only when the node it backs terminally fails.
#[derive(Debug)]
pub struct Dag {
    graph: StableDiGraph<GraphNode, GraphEdge>,
    index: NodeIndexMap,
    reserve: HashSet<String>,
}

impl Dag {
    pub fn build(data: &GraphData, max_nodes: usize) -> Result<Dag, WorkflowError> {
        if data.nodes.is_empty() {
            return Err(WorkflowError::EmptyWorkflow);
        }
        if data.nodes.len() > max_nodes {
            return Err(WorkflowError::TooLarge {
                count: data.nodes.len(),
                max: max_nodes,
            });
        }

        let mut graph = StableDiGraph::new();
        let mut index: NodeIndexMap = HashMap::new();

        for node in &data.nodes {
            if index.contains_key(&node.id) {
                return Err(WorkflowError::DuplicateNode(node.id.clone()));
            }
            node.data.validate(&node.id)?;
            let idx = graph.add_node(GraphNode {
                id: node.id.clone(),
                kind: node.kind,
                config: node.data.clone(),
            });
            index.insert(node.id.clone(), idx);
        }

        for edge in &data.edges {
            let source = *index
                .get(&edge.source)
                .ok_or_else(|| WorkflowError::InvalidEdge {
                    edge: edge.label(),
                    node: edge.source.clone(),
                })?;
            let target = *index
                .get(&edge.target)
                .ok_or_else(|| WorkflowError::InvalidEdge {
                    edge: edge.label(),
                    node: edge.target.clone(),
                })?;

            let condition = match &edge.condition {
                Some(raw) => Some(EdgeCondition::parse(raw).ok_or_else(|| {
                    WorkflowError::InvalidCondition {
                        edge: edge.label(),
                        condition: raw.clone(),
                    }
                })?),
                None => None,
            };

            graph.add_edge(
                source,
                target,
                GraphEdge {
                    source: edge.source.clone(),
                    target: edge.target.clone(),
                    condition,
                },
            );
        }

        let dag = Dag {
            graph,
            index,
            reserve: HashSet::new(),
        };
        let reserve = dag.validate_fallbacks()?;

        Ok(Dag { reserve, ..dag })
    }

    /// Validate fallback references and collect the reserve node set.
    ///
    /// A fallback must name an existing node other than its owner, and the
    /// target must be edge-free so that it carries no dependencies of its
    /// own when substituted.
    fn validate_fallbacks(&self) -> Result<HashSet<String>, WorkflowError> {
        let mut reserve = HashSet::new();
        for idx in self.graph.node_indices() {
            let node = &self.graph[idx];
            let Some(fallback_id) = &node.config.fallback_agent_id else {
                continue;
            };
            if fallback_id.is_empty() {
                continue;
            }
            let Some(&fb_idx) = self.index.get(fallback_id) else {
                return Err(WorkflowError::InvalidFallback {
                    node_id: node.id.clone(),
                    fallback_id: fallback_id.clone(),
                    reason: "no such node".to_string(),
                });
            };
            if fb_idx == idx {
                return Err(WorkflowError::InvalidFallback {
                    node_id: node.id.clone(),
                    fallback_id: fallback_id.clone(),
                    reason: "a node cannot be its own fallback".to_string(),
                });
            }
            let has_edges = self
                .graph
                .neighbors_directed(fb_idx, Direction::Incoming)
                .next()
                .is_some()
                || self
                    .graph
                    .neighbors_directed(fb_idx, Direction::Outgoing)
                    .next()
                    .is_some();
            if has_edges {
                return Err(WorkflowError::InvalidFallback {
                    node_id: node.id.clone(),
                    fallback_id: fallback_id.clone(),
                    reason: "fallback target must not participate in any edge".to_string(),
                });
            }
            reserve.insert(fallback_id.clone());
        }
        Ok(reserve)
    }

    pub fn node(&self, node_id: &str) -> Option<&GraphNode> {
        self.index.get(node_id).map(|&idx| &self.graph[idx])
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn is_reserve(&self, node_id: &str) -> bool {
        self.reserve.contains(node_id)
    }

    /// Node ids scheduled by the planner, sorted ascending. Reserve nodes
    /// are excluded; they run only through the fallback path.
    pub fn executable_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .graph
            .node_indices()
            .map(|idx| self.graph[idx].id.clone())
            .filter(|id| !self.reserve.contains(id))
            .collect();
        ids.sort();
        ids
    }

    /// Direct dependencies of a node, sorted ascending.
    pub fn deps_of(&self, node_id: &str) -> Vec<String> {
        self.neighbor_ids(node_id, Direction::Incoming)
    }

    /// Direct dependents of a node, sorted ascending.
    pub fn dependents_of(&self, node_id: &str) -> Vec<String> {
        self.neighbor_ids(node_id, Direction::Outgoing)
    }

    fn neighbor_ids(&self, node_id: &str, dir: Direction) -> Vec<String> {
        let Some(&idx) = self.index.get(node_id) else {
            return Vec::new();
        };
        let mut ids: Vec<String> = self
            .graph
            .neighbors_directed(idx, dir)
            .map(|n| self.graph[n].id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Outgoing edges of a node, sorted by target id.
    pub fn outgoing_edges(&self, node_id: &str) -> Vec<&GraphEdge> {
        if !self.index.contains_key(node_id) {
            return Vec::new();
        }
        let mut edges: Vec<&GraphEdge> = self
            .graph
            .edge_indices()
            .filter_map(|e| self.graph.edge_weight(e))
            .filter(|edge| edge.source == node_id)
            .collect();
        edges.sort_by(|a, b| a.target.cmp(&b.target));
        edges
    }

    /// Executable leaves: nodes without dependents. Terminal run status is
    /// judged on whether any of these produced output.
    pub fn leaf_ids(&self) -> Vec<String> {
        self.executable_ids()
            .into_iter()
            .filter(|id| self.dependents_of(id).is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EdgeSchema, NodeData, NodeKind, NodeSchema, MAX_WORKFLOW_NODES};

    fn node(id: &str) -> NodeSchema {
        NodeSchema {
            id: id.to_string(),
            kind: NodeKind::Agent,
            data: NodeData::default(),
        }
    }

    fn edge(source: &str, target: &str) -> EdgeSchema {
        EdgeSchema {
            id: String::new(),
            source: source.to_string(),
            target: target.to_string(),
            condition: None,
        }
    }

    fn graph(nodes: Vec<NodeSchema>, edges: Vec<EdgeSchema>) -> GraphData {
        GraphData { nodes, edges }
    }

    #[test]
    fn test_build_rejects_empty() {
        let err = Dag::build(&GraphData::default(), MAX_WORKFLOW_NODES).unwrap_err();
        assert!(matches!(err, WorkflowError::EmptyWorkflow));
    }

    #[test]
    fn test_build_rejects_oversized() {
        let nodes = (0..51).map(|i| node(&format!("n{i}"))).collect();
        let err = Dag::build(&graph(nodes, vec![]), MAX_WORKFLOW_NODES).unwrap_err();
        assert!(matches!(err, WorkflowError::TooLarge { count: 51, .. }));
    }

    #[test]
    fn test_build_rejects_unknown_endpoint() {
        let data = graph(vec![node("a")], vec![edge("a", "ghost")]);
        let err = Dag::build(&data, MAX_WORKFLOW_NODES).unwrap_err();
        match err {
            WorkflowError::InvalidEdge { node, .. } => assert_eq!(node, "ghost"),
            other => panic!("expected InvalidEdge, got {other:?}"),
        }
    }

    #[test]
    fn test_build_rejects_duplicate_node() {
        let data = graph(vec![node("a"), node("a")], vec![]);
        assert!(matches!(
            Dag::build(&data, MAX_WORKFLOW_NODES),
            Err(WorkflowError::DuplicateNode(_))
        ));
    }

    #[test]
    fn test_build_rejects_bad_condition() {
        let mut e = edge("a", "b");
        e.condition = Some("matches:foo".into());
        let data = graph(vec![node("a"), node("b")], vec![e]);
        assert!(matches!(
            Dag::build(&data, MAX_WORKFLOW_NODES),
            Err(WorkflowError::InvalidCondition { .. })
        ));
    }

    #[test]
    fn test_deps_and_dependents_sorted() {
        let data = graph(
            vec![node("a"), node("b"), node("c"), node("d")],
            vec![edge("c", "d"), edge("a", "d"), edge("b", "d")],
        );
        let dag = Dag::build(&data, MAX_WORKFLOW_NODES).unwrap();
        assert_eq!(dag.deps_of("d"), vec!["a", "b", "c"]);
        assert_eq!(dag.dependents_of("a"), vec!["d"]);
        assert!(dag.deps_of("a").is_empty());
    }

    #[test]
    fn test_fallback_target_becomes_reserve() {
        let mut primary = node("p");
        primary.data.fallback_agent_id = Some("q".into());
        let data = graph(vec![primary, node("q")], vec![]);
        let dag = Dag::build(&data, MAX_WORKFLOW_NODES).unwrap();
        assert!(dag.is_reserve("q"));
        assert_eq!(dag.executable_ids(), vec!["p"]);
    }

    #[test]
    fn test_fallback_with_edges_rejected() {
        let mut primary = node("p");
        primary.data.fallback_agent_id = Some("q".into());
        let data = graph(vec![primary, node("q"), node("r")], vec![edge("r", "q")]);
        assert!(matches!(
            Dag::build(&data, MAX_WORKFLOW_NODES),
            Err(WorkflowError::InvalidFallback { .. })
        ));
    }

    #[test]
    fn test_fallback_to_self_rejected() {
        let mut primary = node("p");
        primary.data.fallback_agent_id = Some("p".into());
        let data = graph(vec![primary], vec![]);
        assert!(matches!(
            Dag::build(&data, MAX_WORKFLOW_NODES),
            Err(WorkflowError::InvalidFallback { .. })
        ));
    }

    #[test]
    fn test_leaf_ids() {
        let data = graph(
            vec![node("a"), node("b"), node("c")],
            vec![edge("a", "b"), edge("a", "c")],
        );
        let dag = Dag::build(&data, MAX_WORKFLOW_NODES).unwrap();
        assert_eq!(dag.leaf_ids(), vec!["b", "c"]);
    }

    #[test]
    fn test_outgoing_edges_sorted_by_target() {
        let data = graph(
            vec![node("a"), node("z"), node("m")],
            vec![edge("a", "z"), edge("a", "m")],
        );
        let dag = Dag::build(&data, MAX_WORKFLOW_NODES).unwrap();
        let targets: Vec<&str> = dag
            .outgoing_edges("a")
            .iter()
            .map(|e| e.target.as_str())
            .collect();
        assert_eq!(targets, vec!["m", "z"]);
    }
}
