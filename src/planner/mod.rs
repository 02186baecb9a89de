//! DAG planner: topological ordering and parallel-group extraction.
//!
//! Planning is a pure function of the graph. Kahn's method orders the nodes
//! and names the exact cycle set on failure; the ASAP rule then places every
//! node in the earliest group its dependencies allow. Identical inputs yield
//! byte-identical serialized plans: the ready queue pops lexicographically,
//! group members and dependency lists are sorted by node id.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;
use crate::graph::Dag;
use crate::schema::{GraphData, NodeData, NodeKind, MAX_WORKFLOW_NODES};

/// One schedulable step: a node id with its resolved configuration and the
/// precomputed dependency list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanEntry {
    pub node_id: String,
    pub kind: NodeKind,
    pub config: NodeData,
    pub deps: Vec<String>,
}

/// A set of mutually independent steps scheduled together.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParallelGroup {
    pub group: usize,
    pub entries: Vec<PlanEntry>,
}

/// Compact plan metrics, carried on the `execution_started` event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanSummary {
    pub total_steps: usize,
    pub max_parallelism: usize,
    pub estimated_rounds: usize,
}

/// The immutable execution plan: groups in dependency order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionPlan {
    pub groups: Vec<ParallelGroup>,
    pub total_steps: usize,
    pub max_parallelism: usize,
    pub estimated_rounds: usize,
}

impl ExecutionPlan {
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            total_steps: self.total_steps,
            max_parallelism: self.max_parallelism,
            estimated_rounds: self.estimated_rounds,
        }
    }

    /// All entries in group order.
    pub fn iter_entries(&self) -> impl Iterator<Item = (usize, &PlanEntry)> {
        self.groups
            .iter()
            .flat_map(|g| g.entries.iter().map(move |e| (g.group, e)))
    }
}

/// Plan a raw graph with the default node cap.
pub fn plan(data: &GraphData) -> Result<ExecutionPlan, WorkflowError> {
    let dag = Dag::build(data, MAX_WORKFLOW_NODES)?;
    plan_dag(&dag)
}

/// Plan an already-built DAG.
pub fn plan_dag(dag: &Dag) -> Result<ExecutionPlan, WorkflowError> {
    let ids = dag.executable_ids();
    if ids.is_empty() {
        return Err(WorkflowError::EmptyWorkflow);
    }

    let order = topological_order(dag, &ids)?;
    let groups = extract_parallel_groups(dag, &order);

    let total_steps = groups.iter().map(|g| g.entries.len()).sum();
    let max_parallelism = groups.iter().map(|g| g.entries.len()).max().unwrap_or(0);
    let estimated_rounds = groups.len();

    Ok(ExecutionPlan {
        groups,
        total_steps,
        max_parallelism,
        estimated_rounds,
    })
}

/// Kahn's method with a lexicographic ready queue. Returns the topological
/// order, or the sorted cycle remainder on failure.
fn topological_order(dag: &Dag, ids: &[String]) -> Result<Vec<String>, WorkflowError> {
    let mut in_degree: HashMap<&str, usize> = ids
        .iter()
        .map(|id| (id.as_str(), dag.deps_of(id).len()))
        .collect();

    let mut ready: BinaryHeap<Reverse<&str>> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&id, _)| Reverse(id))
        .collect();

    let mut order = Vec::with_capacity(ids.len());
    while let Some(Reverse(id)) = ready.pop() {
        order.push(id.to_string());
        for dependent in dag.dependents_of(id) {
            if let Some(deg) = in_degree.get_mut(dependent.as_str()) {
                *deg -= 1;
                if *deg == 0 {
                    // `ids` is sorted; re-borrow so the entry outlives this loop
                    if let Ok(pos) = ids.binary_search(&dependent) {
                        ready.push(Reverse(ids[pos].as_str()));
                    }
                }
            }
        }
    }

    if order.len() != ids.len() {
        let mut cycle: Vec<String> = in_degree
            .iter()
            .filter(|(_, &deg)| deg > 0)
            .map(|(&id, _)| id.to_string())
            .collect();
        cycle.sort();
        return Err(WorkflowError::CircularDependency { nodes: cycle });
    }

    Ok(order)
}

/// ASAP schedule: each node lands in the earliest group its dependencies
/// permit.
fn extract_parallel_groups(dag: &Dag, order: &[String]) -> Vec<ParallelGroup> {
    let mut group_of: HashMap<&str, usize> = HashMap::new();
    let mut groups: BTreeMap<usize, Vec<PlanEntry>> = BTreeMap::new();

    for id in order {
        let deps = dag.deps_of(id);
        let group = if deps.is_empty() {
            0
        } else {
            1 + deps
                .iter()
                .filter_map(|d| group_of.get(d.as_str()))
                .copied()
                .max()
                .unwrap_or(0)
        };
        group_of.insert(id.as_str(), group);

        let node = dag.node(id).expect("planned node exists in the dag");
        groups.entry(group).or_default().push(PlanEntry {
            node_id: id.clone(),
            kind: node.kind,
            config: node.config.clone(),
            deps,
        });
    }

    groups
        .into_iter()
        .map(|(group, mut entries)| {
            entries.sort_by(|a, b| a.node_id.cmp(&b.node_id));
            ParallelGroup { group, entries }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EdgeSchema, NodeSchema};

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

    fn group_ids(plan: &ExecutionPlan, group: usize) -> Vec<&str> {
        plan.groups[group]
            .entries
            .iter()
            .map(|e| e.node_id.as_str())
            .collect()
    }

    #[test]
    fn test_single_node() {
        let plan = plan(&graph(vec![node("a")], vec![])).unwrap();
        assert_eq!(plan.total_steps, 1);
        assert_eq!(plan.estimated_rounds, 1);
        assert_eq!(group_ids(&plan, 0), vec!["a"]);
    }

    #[test]
    fn test_linear_chain() {
        let data = graph(
            vec![node("a"), node("b"), node("c")],
            vec![edge("a", "b"), edge("b", "c")],
        );
        let plan = plan(&data).unwrap();
        assert_eq!(plan.estimated_rounds, 3);
        assert_eq!(plan.max_parallelism, 1);
        assert_eq!(group_ids(&plan, 0), vec!["a"]);
        assert_eq!(group_ids(&plan, 1), vec!["b"]);
        assert_eq!(group_ids(&plan, 2), vec!["c"]);
    }

    #[test]
    fn test_independent_nodes_share_group_zero() {
        let data = graph(vec![node("c"), node("a"), node("b")], vec![]);
        let plan = plan(&data).unwrap();
        assert_eq!(plan.estimated_rounds, 1);
        assert_eq!(plan.max_parallelism, 3);
        assert_eq!(group_ids(&plan, 0), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_diamond_three_groups() {
        let data = graph(
            vec![node("a"), node("b"), node("c"), node("d")],
            vec![
                edge("a", "b"),
                edge("a", "c"),
                edge("b", "d"),
                edge("c", "d"),
            ],
        );
        let plan = plan(&data).unwrap();
        assert_eq!(plan.estimated_rounds, 3);
        assert_eq!(group_ids(&plan, 0), vec!["a"]);
        assert_eq!(group_ids(&plan, 1), vec!["b", "c"]);
        assert_eq!(group_ids(&plan, 2), vec!["d"]);
        let d = &plan.groups[2].entries[0];
        assert_eq!(d.deps, vec!["b", "c"]);
    }

    #[test]
    fn test_cycle_reports_exact_remainder() {
        let data = graph(
            vec![node("root"), node("a"), node("b"), node("c")],
            vec![
                edge("root", "a"),
                edge("a", "b"),
                edge("b", "c"),
                edge("c", "a"),
            ],
        );
        let err = plan(&data).unwrap_err();
        match err {
            WorkflowError::CircularDependency { nodes } => {
                assert_eq!(nodes, vec!["a", "b", "c"]);
            }
            other => panic!("expected CircularDependency, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_graph() {
        assert!(matches!(
            plan(&GraphData::default()),
            Err(WorkflowError::EmptyWorkflow)
        ));
    }

    #[test]
    fn test_wide_parallel() {
        let nodes = (0..10).map(|i| node(&format!("n{i}"))).collect();
        let plan = plan(&graph(nodes, vec![])).unwrap();
        assert_eq!(plan.total_steps, 10);
        assert_eq!(plan.max_parallelism, 10);
        assert_eq!(plan.estimated_rounds, 1);
    }

    #[test]
    fn test_reserve_fallback_excluded() {
        let mut primary = node("p");
        primary.data.fallback_agent_id = Some("q".into());
        let plan = plan(&graph(vec![primary, node("q")], vec![])).unwrap();
        assert_eq!(plan.total_steps, 1);
        assert_eq!(group_ids(&plan, 0), vec!["p"]);
    }

    #[test]
    fn test_plan_is_byte_stable() {
        let build = || {
            // declaration order shuffled between the two builds
            let data = graph(
                vec![node("b"), node("a"), node("d"), node("c")],
                vec![
                    edge("a", "c"),
                    edge("b", "c"),
                    edge("c", "d"),
                ],
            );
            plan(&data).unwrap()
        };
        let first = serde_json::to_vec(&build()).unwrap();
        let second = serde_json::to_vec(&build()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_plan_round_trips() {
        let data = graph(
            vec![node("a"), node("b")],
            vec![edge("a", "b")],
        );
        let original = plan(&data).unwrap();
        let json = serde_json::to_string(&original).unwrap();
        let restored: ExecutionPlan = serde_json::from_str(&json).unwrap();
        assert_eq!(original, restored);
    }

    #[test]
    fn test_group_edges_strictly_increase() {
        let data = graph(
            vec![node("a"), node("b"), node("c"), node("d"), node("e")],
            vec![
                edge("a", "b"),
                edge("a", "c"),
                edge("b", "d"),
                edge("c", "e"),
                edge("d", "e"),
            ],
        );
        let plan = plan(&data).unwrap();
        let mut group_of: HashMap<&str, usize> = HashMap::new();
        for (group, entry) in plan.iter_entries() {
            group_of.insert(entry.node_id.as_str(), group);
        }
        for (_, entry) in plan.iter_entries() {
            for dep in &entry.deps {
                assert!(group_of[dep.as_str()] < group_of[entry.node_id.as_str()]);
            }
        }
    }
}
