use std::collections::HashMap;
use std::sync::Arc;

use crate::context::ExpressionEvaluator;
use crate::error::{FlowError, FlowResult};
use crate::graph::FlowDefinition;

use super::control_flow::{BranchRunner, EndRunner, LoopEndRunner, LoopRunner, TriggerRunner};
use super::transform::VariableAssignRunner;
use super::NodeRunner;

/// Node type tag → runner. Capability dispatch, not inheritance: each node
/// type independently implements [`NodeRunner`].
///
/// The table is built once at process start and injected into the executor;
/// [`ensure_total`](NodeRunnerRegistry::ensure_total) makes the coverage
/// invariant a startup assertion instead of a runtime surprise.
pub struct NodeRunnerRegistry {
    runners: HashMap<String, Arc<dyn NodeRunner>>,
}

impl NodeRunnerRegistry {
    /// Registry pre-populated with the built-in control-flow runners.
    pub fn new(evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        let mut registry = NodeRunnerRegistry {
            runners: HashMap::new(),
        };
        registry.register("trigger", Arc::new(TriggerRunner));
        registry.register("end", Arc::new(EndRunner::new(evaluator.clone())));
        registry.register("branch", Arc::new(BranchRunner::new(evaluator.clone())));
        registry.register("loop", Arc::new(LoopRunner));
        registry.register("loop-end", Arc::new(LoopEndRunner::new(evaluator.clone())));
        registry.register(
            "variable-assign",
            Arc::new(VariableAssignRunner::new(evaluator)),
        );
        registry
    }

    pub fn register(&mut self, node_type: &str, runner: Arc<dyn NodeRunner>) {
        self.runners.insert(node_type.to_string(), runner);
    }

    pub fn get(&self, node_type: &str) -> Option<Arc<dyn NodeRunner>> {
        self.runners.get(node_type).cloned()
    }

    pub fn registered_types(&self) -> Vec<String> {
        self.runners.keys().cloned().collect()
    }

    /// Fail construction, not execution: every node type declared by the
    /// flow must have a runner before a run may start.
    pub fn ensure_total(&self, definition: &FlowDefinition) -> FlowResult<()> {
        for node in &definition.nodes {
            if !self.runners.contains_key(&node.node_type) {
                return Err(FlowError::RunnerNotFound(node.node_type.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::KeyPathEvaluator;
    use crate::graph::{FlowEdge, FlowNode};
    use serde_json::json;

    fn registry() -> NodeRunnerRegistry {
        NodeRunnerRegistry::new(Arc::new(KeyPathEvaluator::new()))
    }

    #[test]
    fn test_builtins_registered() {
        let registry = registry();
        for node_type in ["trigger", "end", "branch", "loop", "loop-end", "variable-assign"] {
            assert!(registry.get(node_type).is_some(), "{node_type} missing");
        }
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn test_ensure_total() {
        let registry = registry();
        let mut definition = FlowDefinition {
            id: "f".to_string(),
            name: String::new(),
            nodes: vec![
                FlowNode::new("trigger", "trigger", json!({})),
                FlowNode::new("end", "end", json!({})),
            ],
            edges: vec![FlowEdge::new("e1", "trigger", "end")],
        };
        assert!(registry.ensure_total(&definition).is_ok());

        definition
            .nodes
            .push(FlowNode::new("llm", "llm", json!({})));
        assert!(matches!(
            registry.ensure_total(&definition),
            Err(FlowError::RunnerNotFound(t)) if t == "llm"
        ));
    }
}
