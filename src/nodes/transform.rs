//! Variable mutation runner.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::context::{ExecutionData, ExpressionEvaluator};
use crate::error::{NodeError, NodeResult};
use crate::graph::FlowNode;

use super::control_flow::parse_params;
use super::{NodeRunner, VertexResult};

#[derive(Debug, Deserialize)]
struct Assignment {
    name: String,
    #[serde(default)]
    expression: Option<String>,
    #[serde(default)]
    value: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct VariableAssignParams {
    assignments: Vec<Assignment>,
}

/// Writes into the run's flat variable namespace. Each assignment is either
/// a literal `value` or an `expression` over upstream state.
pub struct VariableAssignRunner {
    evaluator: Arc<dyn ExpressionEvaluator>,
}

impl VariableAssignRunner {
    pub fn new(evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        VariableAssignRunner { evaluator }
    }
}

#[async_trait]
impl NodeRunner for VariableAssignRunner {
    async fn run(
        &self,
        node: &FlowNode,
        data: &mut ExecutionData,
        _upstream: &[VertexResult],
    ) -> NodeResult<VertexResult> {
        let params: VariableAssignParams = parse_params(&node.params)?;
        let ctx = data.expression_context();

        let mut assigned = Map::new();
        for assignment in &params.assignments {
            let value = match (&assignment.value, &assignment.expression) {
                (Some(literal), _) => literal.clone(),
                (None, Some(expression)) => self.evaluator.evaluate(expression, &ctx)?,
                (None, None) => {
                    return Err(NodeError::ConfigError(format!(
                        "Assignment {} has neither value nor expression",
                        assignment.name
                    )))
                }
            };
            data.variable_save(assignment.name.clone(), value.clone());
            assigned.insert(assignment.name.clone(), value);
        }

        data.save_node_context(&node.id, assigned.clone());
        Ok(VertexResult::success(&node.id, Value::Object(assigned)))
    }
}
