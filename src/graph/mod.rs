//! Flow graph model: static DAG description with branch and loop extensions.

pub mod builder;
pub mod types;
pub mod validator;

pub use builder::{build_graph, FlowGraph};
pub use types::{FlowDefinition, FlowEdge, FlowNode, NodePosition, SourceHandle};
pub use validator::validate_graph;
