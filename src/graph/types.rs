use petgraph::stable_graph::NodeIndex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Canvas position of a node. Layout only, never consulted at run time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct NodePosition {
    pub x: f64,
    pub y: f64,
}

/// One configured step in a flow.
///
/// Created at design time and immutable during execution, except for
/// `debug_result` which records the output of the most recent run of the node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowNode {
    /// Node ID (unique within the flow)
    pub id: String,

    /// Node type tag (llm, branch, loop, variable-assign, ...)
    pub node_type: String,

    /// Type-specific params
    #[serde(default)]
    pub params: Value,

    /// Declared input schema
    #[serde(default)]
    pub input_schema: Value,

    /// Declared output schema
    #[serde(default)]
    pub output_schema: Value,

    /// Output of the most recent execution of this node
    #[serde(default)]
    pub debug_result: Option<Value>,

    /// Canvas layout position
    #[serde(default)]
    pub position: Option<NodePosition>,
}

impl FlowNode {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>, params: Value) -> Self {
        FlowNode {
            id: id.into(),
            node_type: node_type.into(),
            params,
            input_schema: Value::Null,
            output_schema: Value::Null,
            debug_result: None,
            position: None,
        }
    }
}

/// Exit slot an edge leaves its source node through.
///
/// Branch handles are keyed by branch id; fan-out is expressed by declaring
/// multiple edges on the same handle. Persisted definitions carry the raw
/// handle string the design tool emitted; `""`, `"error"` and `"loop-body"`
/// are reserved, anything else names a branch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceHandle {
    /// Ordinary forward edge
    Default,
    /// Branch exit, keyed by the branch id declared on the node
    Branch(String),
    /// Declared error handle for business failures
    Error,
    /// Loop node → first node of the owned body
    LoopBody,
}

impl SourceHandle {
    /// Parse the handle string carried by a flow definition edge.
    pub fn from_handle(handle: &Option<String>) -> Self {
        match handle.as_deref() {
            None | Some("") => SourceHandle::Default,
            Some("error") => SourceHandle::Error,
            Some("loop-body") => SourceHandle::LoopBody,
            Some(other) => SourceHandle::Branch(other.to_string()),
        }
    }

    pub fn as_handle_str(&self) -> &str {
        match self {
            SourceHandle::Default => "",
            SourceHandle::Error => "error",
            SourceHandle::LoopBody => "loop-body",
            SourceHandle::Branch(id) => id,
        }
    }
}

impl Serialize for SourceHandle {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_handle_str())
    }
}

impl<'de> Deserialize<'de> for SourceHandle {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(SourceHandle::from_handle(&raw))
    }
}

/// Directed connection between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowEdge {
    pub id: String,

    /// Source node ID
    pub source: String,

    /// Target node ID
    pub target: String,

    /// Exit slot on the source node
    #[serde(default = "default_handle")]
    pub source_handle: SourceHandle,

    /// Entry slot on the target node
    #[serde(default)]
    pub target_handle: Option<String>,
}

fn default_handle() -> SourceHandle {
    SourceHandle::Default
}

impl FlowEdge {
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        FlowEdge {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            source_handle: SourceHandle::Default,
            target_handle: None,
        }
    }

    pub fn with_handle(mut self, handle: SourceHandle) -> Self {
        self.source_handle = handle;
        self
    }
}

/// Persisted flow definition: the static DAG description one run executes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub nodes: Vec<FlowNode>,
    pub edges: Vec<FlowEdge>,
}

/// Node ID → petgraph NodeIndex mapping
pub type NodeIndexMap = std::collections::HashMap<String, NodeIndex>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_handle_parse() {
        assert_eq!(SourceHandle::from_handle(&None), SourceHandle::Default);
        assert_eq!(
            SourceHandle::from_handle(&Some("".to_string())),
            SourceHandle::Default
        );
        assert_eq!(
            SourceHandle::from_handle(&Some("error".to_string())),
            SourceHandle::Error
        );
        assert_eq!(
            SourceHandle::from_handle(&Some("loop-body".to_string())),
            SourceHandle::LoopBody
        );
        assert_eq!(
            SourceHandle::from_handle(&Some("case-high".to_string())),
            SourceHandle::Branch("case-high".to_string())
        );
    }

    #[test]
    fn test_definition_serde_roundtrip() {
        let definition = FlowDefinition {
            id: "flow-1".to_string(),
            name: "demo".to_string(),
            nodes: vec![
                FlowNode::new("trigger", "trigger", serde_json::json!({})),
                FlowNode::new("end", "end", serde_json::json!({})),
            ],
            edges: vec![
                FlowEdge::new("e1", "trigger", "end"),
                FlowEdge::new("e2", "trigger", "end")
                    .with_handle(SourceHandle::Branch("case-a".to_string())),
            ],
        };

        let json = serde_json::to_string(&definition).unwrap();
        let back: FlowDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(back.nodes.len(), 2);
        assert_eq!(back.edges[0].source_handle, SourceHandle::Default);
        assert_eq!(
            back.edges[1].source_handle,
            SourceHandle::Branch("case-a".to_string())
        );
    }

    #[test]
    fn test_edges_accept_raw_handle_strings() {
        let json = serde_json::json!({
            "id": "e1",
            "source": "branch",
            "target": "end",
            "source_handle": "case-high"
        });
        let edge: FlowEdge = serde_json::from_value(json).unwrap();
        assert_eq!(
            edge.source_handle,
            SourceHandle::Branch("case-high".to_string())
        );
    }
}
