//! Node runner contract and built-in control-flow runners.

pub mod control_flow;
pub mod registry;
pub mod transform;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::ExecutionData;
use crate::error::NodeResult;
use crate::graph::FlowNode;

pub use registry::NodeRunnerRegistry;

/// Outcome of executing one node in one run. Created fresh per execution,
/// folded into the run's log, then discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VertexResult {
    pub node_id: String,
    pub success: bool,
    pub output: Value,
    pub error: Option<String>,
    /// For branch nodes: the single handle that fired this visit.
    pub selected_handle: Option<String>,
}

impl VertexResult {
    pub fn success(node_id: impl Into<String>, output: Value) -> Self {
        VertexResult {
            node_id: node_id.into(),
            success: true,
            output,
            error: None,
            selected_handle: None,
        }
    }

    pub fn failure(node_id: impl Into<String>, error: impl Into<String>) -> Self {
        VertexResult {
            node_id: node_id.into(),
            success: false,
            output: Value::Null,
            error: Some(error.into()),
            selected_handle: None,
        }
    }

    pub fn branch(node_id: impl Into<String>, handle: impl Into<String>) -> Self {
        let handle = handle.into();
        VertexResult {
            node_id: node_id.into(),
            success: true,
            output: serde_json::json!({ "selected": handle }),
            error: None,
            selected_handle: Some(handle),
        }
    }
}

/// Contract every node type implements, resolved by type tag through
/// [`NodeRunnerRegistry`].
///
/// A runner reports *business* outcomes only: `Err` or a failed
/// [`VertexResult`] routes through the node's declared error handle or
/// terminates the run. Infrastructure failures (crash, timeout) are handled
/// entirely outside the runner, by the breakpoint retry scheduler.
///
/// Replay restarts a run from the top, so a runner with external side
/// effects (sending a message, charging an API) must deduplicate on its own,
/// e.g. keyed by `(execute_id, node_id)`. The engine provides no
/// deduplication for free.
#[async_trait]
pub trait NodeRunner: Send + Sync {
    async fn run(
        &self,
        node: &FlowNode,
        data: &mut ExecutionData,
        upstream: &[VertexResult],
    ) -> NodeResult<VertexResult>;
}
