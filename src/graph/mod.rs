pub mod builder;
pub mod types;

pub use builder::Dag;
pub use types::{EdgeCondition, GraphEdge, GraphNode, NodeIndexMap};
