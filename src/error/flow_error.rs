//! Flow-level error types.

use super::NodeError;
use thiserror::Error;

/// Flow-level errors
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Graph build error: {0}")]
    GraphBuildError(String),
    #[error("Graph validation error: {0}")]
    GraphValidationError(String),
    #[error("Cycle detected in graph")]
    CycleDetected,
    #[error("Unreachable node: {0}")]
    UnreachableNode(String),
    #[error("No trigger node found")]
    NoTriggerNode,
    #[error("Node not found: {0}")]
    NodeNotFound(String),
    #[error("Node runner not found for type: {0}")]
    RunnerNotFound(String),
    #[error("Loop node {0} has no matching loop-end")]
    UnterminatedLoop(String),
    #[error("Max loop iterations exceeded: {0}")]
    MaxLoopIterationsExceeded(usize),
    #[error("Max steps exceeded: {0}")]
    MaxStepsExceeded(i32),
    #[error("Node execution error: node={node_id}, error={error}")]
    NodeExecutionError { node_id: String, error: String },
    #[error("Log repository error: {0}")]
    LogRepositoryError(String),
    #[error("Archive error: {0}")]
    ArchiveError(String),
    #[error("Node error: {0}")]
    NodeError(Box<NodeError>),
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<NodeError> for FlowError {
    fn from(value: NodeError) -> Self {
        FlowError::NodeError(Box::new(value))
    }
}
