use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Boundary input that starts a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerInput {
    pub trigger_payload: Value,
    pub organization_code: String,
    pub operator: String,
    pub conversation_id: String,
    pub topic_id: String,
}

/// Mutable per-run state threaded through every node runner.
///
/// Everything in here is part of the object the executor serializes into the
/// Execution Archive on each write-through checkpoint. A mutation that is not
/// visible here is a mutation replay silently loses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionData {
    pub execute_id: String,
    pub organization_code: String,
    pub operator: String,
    pub conversation_id: String,
    pub topic_id: String,
    pub trigger_payload: Value,

    /// One flat namespace shared by the whole run, including across loop
    /// iterations. Loop-local scoping is the loop node's own responsibility.
    variables: HashMap<String, Value>,

    /// Per-node saved context, addressed downstream as `"{node_id}.{field}"`.
    node_context: HashMap<String, Map<String, Value>>,

    /// Progress markers, cleared by `rewind`.
    completed_nodes: Vec<String>,
    cursor: Option<String>,

    /// Node ids whose context changed since the last durable checkpoint.
    #[serde(default)]
    dirty_nodes: HashSet<String>,
}

impl ExecutionData {
    pub fn new(execute_id: impl Into<String>, input: TriggerInput) -> Self {
        ExecutionData {
            execute_id: execute_id.into(),
            organization_code: input.organization_code,
            operator: input.operator,
            conversation_id: input.conversation_id,
            topic_id: input.topic_id,
            trigger_payload: input.trigger_payload,
            variables: HashMap::new(),
            node_context: HashMap::new(),
            completed_nodes: Vec::new(),
            cursor: None,
            dirty_nodes: HashSet::new(),
        }
    }

    /// Merge fields under the node's context key. Idempotent for repeated
    /// saves of the same node id: same fields, same resulting context.
    pub fn save_node_context(&mut self, node_id: &str, fields: Map<String, Value>) {
        let entry = self.node_context.entry(node_id.to_string()).or_default();
        for (k, v) in fields {
            entry.insert(k, v);
        }
        self.dirty_nodes.insert(node_id.to_string());
    }

    /// Remove individual fields from a node's context entry.
    pub fn clear_node_context_fields(&mut self, node_id: &str, fields: &[&str]) {
        if let Some(entry) = self.node_context.get_mut(node_id) {
            for field in fields {
                entry.remove(*field);
            }
            self.dirty_nodes.insert(node_id.to_string());
        }
    }

    pub fn node_context(&self, node_id: &str) -> Option<&Map<String, Value>> {
        self.node_context.get(node_id)
    }

    pub fn variable_save(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    pub fn variables(&self) -> &HashMap<String, Value> {
        &self.variables
    }

    pub fn get_variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn mark_completed(&mut self, node_id: &str) {
        self.completed_nodes.push(node_id.to_string());
        self.cursor = Some(node_id.to_string());
    }

    pub fn completed_nodes(&self) -> &[String] {
        &self.completed_nodes
    }

    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    /// Called by the executor after each durable upsert: from here on, new
    /// context entries count as unconfirmed progress.
    pub fn mark_checkpoint(&mut self) {
        self.dirty_nodes.clear();
    }

    /// Prepare the run for replay: reset the current position and drop
    /// context entries created strictly after the last durable checkpoint.
    ///
    /// Identity (execute id, trigger payload, organization) is preserved.
    /// This is the only legal way to ready an archived run for re-execution.
    pub fn rewind(&mut self) {
        for node_id in self.dirty_nodes.drain() {
            self.node_context.remove(&node_id);
        }
        self.completed_nodes.clear();
        self.cursor = None;
    }

    /// Flatten the run state into the dictionary expression lookups address:
    /// `"{node_id}.{field}"` for upstream node context, bare names for
    /// variables. Never positional.
    pub fn expression_context(&self) -> Map<String, Value> {
        let mut ctx = Map::new();
        for (name, value) in &self.variables {
            ctx.insert(name.clone(), value.clone());
        }
        for (node_id, fields) in &self.node_context {
            for (field, value) in fields {
                ctx.insert(format!("{}.{}", node_id, field), value.clone());
            }
        }
        ctx
    }
}
