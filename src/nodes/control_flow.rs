//! Built-in control-flow runners: trigger, end, branch, loop, loop-end.
//!
//! Loop iteration itself is driven by the executor; the loop/loop-end
//! runners only resolve the iterable and the break condition.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::context::{ExecutionData, ExpressionEvaluator};
use crate::error::{NodeError, NodeResult};
use crate::graph::FlowNode;

use super::{NodeRunner, VertexResult};

/// Entry node: folds the trigger payload into its own context slot so
/// downstream expressions can address it as `"{trigger_id}.{field}"`.
pub struct TriggerRunner;

#[async_trait]
impl NodeRunner for TriggerRunner {
    async fn run(
        &self,
        node: &FlowNode,
        data: &mut ExecutionData,
        _upstream: &[VertexResult],
    ) -> NodeResult<VertexResult> {
        let payload = data.trigger_payload.clone();
        let fields = match &payload {
            Value::Object(map) => map.clone(),
            other => {
                let mut map = Map::new();
                map.insert("payload".to_string(), other.clone());
                map
            }
        };
        data.save_node_context(&node.id, fields);
        Ok(VertexResult::success(&node.id, payload))
    }
}

#[derive(Debug, Deserialize, Default)]
struct EndParams {
    #[serde(default)]
    outputs: Map<String, Value>,
}

/// Terminal node: evaluates the declared output mapping against upstream
/// state and records it as the run's final output.
pub struct EndRunner {
    evaluator: Arc<dyn ExpressionEvaluator>,
}

impl EndRunner {
    pub fn new(evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        EndRunner { evaluator }
    }
}

#[async_trait]
impl NodeRunner for EndRunner {
    async fn run(
        &self,
        node: &FlowNode,
        data: &mut ExecutionData,
        _upstream: &[VertexResult],
    ) -> NodeResult<VertexResult> {
        let params: EndParams = parse_params(&node.params)?;
        let ctx = data.expression_context();

        let mut outputs = Map::new();
        for (name, source) in &params.outputs {
            let value = match source {
                Value::String(expression) => self.evaluator.evaluate(expression, &ctx)?,
                literal => literal.clone(),
            };
            outputs.insert(name.clone(), value);
        }

        data.save_node_context(&node.id, outputs.clone());
        Ok(VertexResult::success(&node.id, Value::Object(outputs)))
    }
}

#[derive(Debug, Deserialize)]
struct BranchCase {
    id: String,
    #[serde(default)]
    expression: String,
}

#[derive(Debug, Deserialize)]
struct BranchParams {
    branches: Vec<BranchCase>,
}

/// Conditional node: one handle per declared condition, evaluated in
/// declaration order. The first true condition fires; the last declared
/// branch is the default/else and fires unconditionally when reached, so
/// exactly one handle fires per visit.
pub struct BranchRunner {
    evaluator: Arc<dyn ExpressionEvaluator>,
}

impl BranchRunner {
    pub fn new(evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        BranchRunner { evaluator }
    }
}

#[async_trait]
impl NodeRunner for BranchRunner {
    async fn run(
        &self,
        node: &FlowNode,
        data: &mut ExecutionData,
        _upstream: &[VertexResult],
    ) -> NodeResult<VertexResult> {
        let params: BranchParams = parse_params(&node.params)?;
        if params.branches.is_empty() {
            return Err(NodeError::ConfigError(format!(
                "Branch node {} declares no branches",
                node.id
            )));
        }

        let ctx = data.expression_context();
        let last = params.branches.len() - 1;
        for (i, case) in params.branches.iter().enumerate() {
            if i == last {
                return Ok(VertexResult::branch(&node.id, &case.id));
            }
            let value = self.evaluator.evaluate(&case.expression, &ctx)?;
            if is_truthy(&value) {
                return Ok(VertexResult::branch(&node.id, &case.id));
            }
        }
        unreachable!("last branch is unconditional");
    }
}

#[derive(Debug, Deserialize)]
struct LoopParams {
    source_variable: String,
}

/// Loop head: resolves the iterable from the run's flat variable namespace.
/// The executor drives the per-element body walk.
pub struct LoopRunner;

#[async_trait]
impl NodeRunner for LoopRunner {
    async fn run(
        &self,
        node: &FlowNode,
        data: &mut ExecutionData,
        _upstream: &[VertexResult],
    ) -> NodeResult<VertexResult> {
        let params: LoopParams = parse_params(&node.params)?;
        let value = data
            .get_variable(&params.source_variable)
            .ok_or_else(|| NodeError::VariableNotFound(params.source_variable.clone()))?;
        if !value.is_array() {
            return Err(NodeError::TypeError(format!(
                "Loop source {} is not an array",
                params.source_variable
            )));
        }
        Ok(VertexResult::success(&node.id, value.clone()))
    }
}

#[derive(Debug, Deserialize, Default)]
struct LoopEndParams {
    #[serde(default)]
    break_expression: Option<String>,
}

/// Loop delimiter: evaluates the optional break condition after each
/// iteration. Output `{"break": bool}` is read by the executor.
pub struct LoopEndRunner {
    evaluator: Arc<dyn ExpressionEvaluator>,
}

impl LoopEndRunner {
    pub fn new(evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        LoopEndRunner { evaluator }
    }
}

#[async_trait]
impl NodeRunner for LoopEndRunner {
    async fn run(
        &self,
        node: &FlowNode,
        data: &mut ExecutionData,
        _upstream: &[VertexResult],
    ) -> NodeResult<VertexResult> {
        let params: LoopEndParams = parse_params(&node.params)?;
        let should_break = match &params.break_expression {
            Some(expression) => {
                let ctx = data.expression_context();
                is_truthy(&self.evaluator.evaluate(expression, &ctx)?)
            }
            None => false,
        };
        Ok(VertexResult::success(
            &node.id,
            serde_json::json!({ "break": should_break }),
        ))
    }
}

pub(crate) fn parse_params<T: serde::de::DeserializeOwned>(params: &Value) -> NodeResult<T> {
    let value = if params.is_null() {
        Value::Object(Map::new())
    } else {
        params.clone()
    };
    serde_json::from_value(value).map_err(|e| NodeError::ConfigError(e.to_string()))
}

pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
