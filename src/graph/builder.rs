use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::stable_graph::StableDiGraph;
use petgraph::Direction;

use crate::error::{FlowError, FlowResult};

use super::types::{FlowDefinition, FlowEdge, FlowNode, NodeIndexMap, SourceHandle};

/// Runtime view of one flow definition: the petgraph DAG plus the indexes the
/// executor walks with.
///
/// The loop containment index (`loop node id → ordered owned node ids`) is
/// built once here from the edges, not recomputed by traversal on every run.
pub struct FlowGraph {
    graph: StableDiGraph<FlowNode, FlowEdge>,
    index: NodeIndexMap,
    trigger_id: String,
    loop_members: HashMap<String, Vec<String>>,
    loop_end: HashMap<String, String>,
}

/// Build a [`FlowGraph`] from a persisted definition.
///
/// Structural errors (duplicate ids, dangling edges, missing trigger,
/// unterminated loops) are rejected here, before any run starts.
pub fn build_graph(definition: &FlowDefinition) -> FlowResult<FlowGraph> {
    let mut graph = StableDiGraph::new();
    let mut index: NodeIndexMap = HashMap::new();

    for node in &definition.nodes {
        if index.contains_key(&node.id) {
            return Err(FlowError::GraphBuildError(format!(
                "Duplicate node id: {}",
                node.id
            )));
        }
        let idx = graph.add_node(node.clone());
        index.insert(node.id.clone(), idx);
    }

    for edge in &definition.edges {
        let source = *index
            .get(&edge.source)
            .ok_or_else(|| FlowError::NodeNotFound(edge.source.clone()))?;
        let target = *index
            .get(&edge.target)
            .ok_or_else(|| FlowError::NodeNotFound(edge.target.clone()))?;
        graph.add_edge(source, target, edge.clone());
    }

    let trigger_id = definition
        .nodes
        .iter()
        .find(|n| n.node_type == "trigger")
        .map(|n| n.id.clone())
        .ok_or(FlowError::NoTriggerNode)?;

    let mut flow_graph = FlowGraph {
        graph,
        index,
        trigger_id,
        loop_members: HashMap::new(),
        loop_end: HashMap::new(),
    };
    flow_graph.build_loop_index(definition)?;
    Ok(flow_graph)
}

impl FlowGraph {
    /// Id of the trigger node every walk starts from.
    pub fn trigger_id(&self) -> &str {
        &self.trigger_id
    }

    pub fn node(&self, node_id: &str) -> Option<&FlowNode> {
        self.index
            .get(node_id)
            .and_then(|idx| self.graph.node_weight(*idx))
    }

    /// Record the most recent output of a node. The only node mutation
    /// allowed while a run is in flight.
    pub fn set_debug_result(&mut self, node_id: &str, result: serde_json::Value) {
        if let Some(idx) = self.index.get(node_id) {
            if let Some(node) = self.graph.node_weight_mut(*idx) {
                node.debug_result = Some(result);
            }
        }
    }

    /// Successor lookup: target node ids of edges leaving `node_id` through
    /// `handle`, in edge declaration order.
    pub fn next_nodes(&self, node_id: &str, handle: &SourceHandle) -> Vec<String> {
        let Some(idx) = self.index.get(node_id) else {
            return Vec::new();
        };
        let mut edges: Vec<&FlowEdge> = self
            .graph
            .edges_directed(*idx, Direction::Outgoing)
            .map(|e| e.weight())
            .filter(|e| &e.source_handle == handle)
            .collect();
        edges.sort_by(|a, b| a.id.cmp(&b.id));
        edges.into_iter().map(|e| e.target.clone()).collect()
    }

    /// All outgoing edges of a node, regardless of handle.
    pub fn outgoing_edges(&self, node_id: &str) -> Vec<FlowEdge> {
        let Some(idx) = self.index.get(node_id) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(*idx, Direction::Outgoing)
            .map(|e| e.weight().clone())
            .collect()
    }

    /// All incoming edges of a node.
    pub fn incoming_edges(&self, node_id: &str) -> Vec<FlowEdge> {
        let Some(idx) = self.index.get(node_id) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(*idx, Direction::Incoming)
            .map(|e| e.weight().clone())
            .collect()
    }

    /// Source node ids of edges entering `node_id`.
    pub fn predecessors(&self, node_id: &str) -> Vec<String> {
        let Some(idx) = self.index.get(node_id) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(*idx, Direction::Incoming)
            .map(|e| e.weight().source.clone())
            .collect()
    }

    /// Owned body of a loop node, in discovery order. Empty for non-loop ids.
    pub fn loop_members(&self, loop_id: &str) -> &[String] {
        self.loop_members
            .get(loop_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// The loop-end node delimiting a loop node's body.
    pub fn loop_end_of(&self, loop_id: &str) -> Option<&str> {
        self.loop_end.get(loop_id).map(|s| s.as_str())
    }

    pub(crate) fn inner(&self) -> &StableDiGraph<FlowNode, FlowEdge> {
        &self.graph
    }

    /// Walk each loop node's body from its `loop-body` edge to the matching
    /// `loop-end`, tracking nesting depth so inner loop/loop-end pairs stay
    /// matched to each other.
    fn build_loop_index(&mut self, definition: &FlowDefinition) -> FlowResult<()> {
        for node in &definition.nodes {
            if node.node_type != "loop" {
                continue;
            }

            let mut members: Vec<String> = Vec::new();
            let mut end_id: Option<String> = None;
            let mut visited: HashSet<String> = HashSet::new();
            let mut queue: VecDeque<(String, usize)> = self
                .next_nodes(&node.id, &SourceHandle::LoopBody)
                .into_iter()
                .map(|id| (id, 0))
                .collect();

            if queue.is_empty() {
                return Err(FlowError::GraphBuildError(format!(
                    "Loop node {} has no loop-body edge",
                    node.id
                )));
            }

            while let Some((current_id, depth)) = queue.pop_front() {
                if !visited.insert(current_id.clone()) {
                    continue;
                }
                let current = self
                    .node(&current_id)
                    .ok_or_else(|| FlowError::NodeNotFound(current_id.clone()))?;

                match current.node_type.as_str() {
                    "loop-end" if depth == 0 => {
                        if let Some(existing) = &end_id {
                            if existing != &current_id {
                                return Err(FlowError::GraphBuildError(format!(
                                    "Loop node {} closed by both {} and {}",
                                    node.id, existing, current_id
                                )));
                            }
                        }
                        end_id = Some(current_id);
                        // Matching end: do not traverse past it.
                    }
                    "loop-end" => {
                        members.push(current_id.clone());
                        for next in self.all_successors(&current_id) {
                            queue.push_back((next, depth - 1));
                        }
                    }
                    "loop" => {
                        members.push(current_id.clone());
                        for next in self.all_successors(&current_id) {
                            queue.push_back((next, depth + 1));
                        }
                    }
                    _ => {
                        members.push(current_id.clone());
                        for next in self.all_successors(&current_id) {
                            queue.push_back((next, depth));
                        }
                    }
                }
            }

            let end_id = end_id.ok_or_else(|| FlowError::UnterminatedLoop(node.id.clone()))?;
            self.loop_members.insert(node.id.clone(), members);
            self.loop_end.insert(node.id.clone(), end_id);
        }
        Ok(())
    }

    fn all_successors(&self, node_id: &str) -> Vec<String> {
        let Some(idx) = self.index.get(node_id) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(*idx, Direction::Outgoing)
            .map(|e| e.weight().target.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::types::{FlowEdge, FlowNode};
    use serde_json::json;

    fn linear_definition() -> FlowDefinition {
        FlowDefinition {
            id: "flow-1".to_string(),
            name: "linear".to_string(),
            nodes: vec![
                FlowNode::new("trigger", "trigger", json!({})),
                FlowNode::new("mid", "llm", json!({})),
                FlowNode::new("end", "end", json!({})),
            ],
            edges: vec![
                FlowEdge::new("e1", "trigger", "mid"),
                FlowEdge::new("e2", "mid", "end"),
            ],
        }
    }

    #[test]
    fn test_build_linear() {
        let graph = build_graph(&linear_definition()).unwrap();
        assert_eq!(graph.trigger_id(), "trigger");
        assert_eq!(
            graph.next_nodes("trigger", &SourceHandle::Default),
            vec!["mid"]
        );
        assert_eq!(graph.predecessors("end"), vec!["mid"]);
    }

    #[test]
    fn test_missing_trigger_rejected() {
        let definition = FlowDefinition {
            id: "flow-2".to_string(),
            name: String::new(),
            nodes: vec![FlowNode::new("only", "llm", json!({}))],
            edges: vec![],
        };
        assert!(matches!(
            build_graph(&definition),
            Err(FlowError::NoTriggerNode)
        ));
    }

    #[test]
    fn test_dangling_edge_rejected() {
        let mut definition = linear_definition();
        definition.edges.push(FlowEdge::new("e3", "mid", "ghost"));
        assert!(matches!(
            build_graph(&definition),
            Err(FlowError::NodeNotFound(id)) if id == "ghost"
        ));
    }

    #[test]
    fn test_loop_containment_index() {
        let definition = FlowDefinition {
            id: "flow-loop".to_string(),
            name: String::new(),
            nodes: vec![
                FlowNode::new("trigger", "trigger", json!({})),
                FlowNode::new("loop", "loop", json!({"source_variable": "items"})),
                FlowNode::new("body", "llm", json!({})),
                FlowNode::new("loop-end", "loop-end", json!({})),
                FlowNode::new("end", "end", json!({})),
            ],
            edges: vec![
                FlowEdge::new("e1", "trigger", "loop"),
                FlowEdge::new("e2", "loop", "body").with_handle(SourceHandle::LoopBody),
                FlowEdge::new("e3", "body", "loop-end"),
                FlowEdge::new("e4", "loop-end", "end"),
            ],
        };

        let graph = build_graph(&definition).unwrap();
        assert_eq!(graph.loop_members("loop"), &["body".to_string()]);
        assert_eq!(graph.loop_end_of("loop"), Some("loop-end"));
    }

    #[test]
    fn test_nested_loop_pairing() {
        let definition = FlowDefinition {
            id: "flow-nested".to_string(),
            name: String::new(),
            nodes: vec![
                FlowNode::new("trigger", "trigger", json!({})),
                FlowNode::new("outer", "loop", json!({"source_variable": "rows"})),
                FlowNode::new("inner", "loop", json!({"source_variable": "cols"})),
                FlowNode::new("cell", "llm", json!({})),
                FlowNode::new("inner-end", "loop-end", json!({})),
                FlowNode::new("outer-end", "loop-end", json!({})),
                FlowNode::new("end", "end", json!({})),
            ],
            edges: vec![
                FlowEdge::new("e1", "trigger", "outer"),
                FlowEdge::new("e2", "outer", "inner").with_handle(SourceHandle::LoopBody),
                FlowEdge::new("e3", "inner", "cell").with_handle(SourceHandle::LoopBody),
                FlowEdge::new("e4", "cell", "inner-end"),
                FlowEdge::new("e5", "inner-end", "outer-end"),
                FlowEdge::new("e6", "outer-end", "end"),
            ],
        };

        let graph = build_graph(&definition).unwrap();
        assert_eq!(graph.loop_end_of("outer"), Some("outer-end"));
        assert_eq!(graph.loop_end_of("inner"), Some("inner-end"));
        let outer_members = graph.loop_members("outer");
        assert!(outer_members.contains(&"inner".to_string()));
        assert!(outer_members.contains(&"inner-end".to_string()));
        assert!(!outer_members.contains(&"outer-end".to_string()));
    }

    #[test]
    fn test_unterminated_loop_rejected() {
        let definition = FlowDefinition {
            id: "flow-bad-loop".to_string(),
            name: String::new(),
            nodes: vec![
                FlowNode::new("trigger", "trigger", json!({})),
                FlowNode::new("loop", "loop", json!({})),
                FlowNode::new("body", "llm", json!({})),
            ],
            edges: vec![
                FlowEdge::new("e1", "trigger", "loop"),
                FlowEdge::new("e2", "loop", "body").with_handle(SourceHandle::LoopBody),
            ],
        };
        assert!(matches!(
            build_graph(&definition),
            Err(FlowError::UnterminatedLoop(id)) if id == "loop"
        ));
    }
}
