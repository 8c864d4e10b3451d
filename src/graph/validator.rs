use std::collections::{HashSet, VecDeque};

use petgraph::Direction;

use crate::error::{FlowError, FlowResult};

use super::builder::FlowGraph;

/// Publish-time validation.
///
/// An unreachable node is a design-time rejection, never a runtime retry
/// case: nothing in here runs once a flow has been published.
pub fn validate_graph(graph: &FlowGraph) -> FlowResult<()> {
    // 1. DAG check: iteration is driven by the executor, so even loop
    //    bodies must not introduce back edges.
    if petgraph::algo::is_cyclic_directed(graph.inner()) {
        return Err(FlowError::CycleDetected);
    }

    // 2. Every node reachable from some trigger node.
    let mut reachable: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = VecDeque::new();

    for idx in graph.inner().node_indices() {
        if let Some(node) = graph.inner().node_weight(idx) {
            if node.node_type == "trigger" {
                queue.push_back(node.id.clone());
            }
        }
    }

    while let Some(node_id) = queue.pop_front() {
        if !reachable.insert(node_id.clone()) {
            continue;
        }
        for edge in graph.outgoing_edges(&node_id) {
            queue.push_back(edge.target);
        }
    }

    for idx in graph.inner().node_indices() {
        if let Some(node) = graph.inner().node_weight(idx) {
            if !reachable.contains(&node.id) {
                return Err(FlowError::UnreachableNode(node.id.clone()));
            }
        }
    }

    // 3. Branch nodes must declare their cases.
    for idx in graph.inner().node_indices() {
        if let Some(node) = graph.inner().node_weight(idx) {
            if node.node_type == "branch" {
                let has_cases = node
                    .params
                    .get("branches")
                    .and_then(|b| b.as_array())
                    .map(|a| !a.is_empty())
                    .unwrap_or(false);
                if !has_cases {
                    return Err(FlowError::GraphValidationError(format!(
                        "Branch node {} declares no branches",
                        node.id
                    )));
                }
                let out_degree = graph
                    .inner()
                    .neighbors_directed(idx, Direction::Outgoing)
                    .count();
                if out_degree == 0 {
                    return Err(FlowError::GraphValidationError(format!(
                        "Branch node {} has no outgoing edges",
                        node.id
                    )));
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::builder::build_graph;
    use crate::graph::types::{FlowDefinition, FlowEdge, FlowNode, SourceHandle};
    use serde_json::json;

    #[test]
    fn test_validate_linear_flow() {
        let definition = FlowDefinition {
            id: "f".to_string(),
            name: String::new(),
            nodes: vec![
                FlowNode::new("trigger", "trigger", json!({})),
                FlowNode::new("end", "end", json!({})),
            ],
            edges: vec![FlowEdge::new("e1", "trigger", "end")],
        };
        let graph = build_graph(&definition).unwrap();
        assert!(validate_graph(&graph).is_ok());
    }

    #[test]
    fn test_unreachable_node_rejected() {
        let definition = FlowDefinition {
            id: "f".to_string(),
            name: String::new(),
            nodes: vec![
                FlowNode::new("trigger", "trigger", json!({})),
                FlowNode::new("end", "end", json!({})),
                FlowNode::new("orphan", "llm", json!({})),
            ],
            edges: vec![FlowEdge::new("e1", "trigger", "end")],
        };
        let graph = build_graph(&definition).unwrap();
        assert!(matches!(
            validate_graph(&graph),
            Err(FlowError::UnreachableNode(id)) if id == "orphan"
        ));
    }

    #[test]
    fn test_cycle_rejected() {
        let definition = FlowDefinition {
            id: "f".to_string(),
            name: String::new(),
            nodes: vec![
                FlowNode::new("trigger", "trigger", json!({})),
                FlowNode::new("a", "llm", json!({})),
                FlowNode::new("b", "llm", json!({})),
            ],
            edges: vec![
                FlowEdge::new("e1", "trigger", "a"),
                FlowEdge::new("e2", "a", "b"),
                FlowEdge::new("e3", "b", "a"),
            ],
        };
        let graph = build_graph(&definition).unwrap();
        assert!(matches!(validate_graph(&graph), Err(FlowError::CycleDetected)));
    }

    #[test]
    fn test_branch_without_cases_rejected() {
        let definition = FlowDefinition {
            id: "f".to_string(),
            name: String::new(),
            nodes: vec![
                FlowNode::new("trigger", "trigger", json!({})),
                FlowNode::new("branch", "branch", json!({})),
                FlowNode::new("end", "end", json!({})),
            ],
            edges: vec![
                FlowEdge::new("e1", "trigger", "branch"),
                FlowEdge::new("e2", "branch", "end")
                    .with_handle(SourceHandle::Branch("b1".to_string())),
            ],
        };
        let graph = build_graph(&definition).unwrap();
        assert!(matches!(
            validate_graph(&graph),
            Err(FlowError::GraphValidationError(_))
        ));
    }
}
