//! Expression evaluation boundary.
//!
//! The real rule compiler lives outside the engine; the engine consumes it
//! through [`ExpressionEvaluator`] alone. Evaluation failures are node
//! business failures, never infrastructure failures.

use serde_json::{Map, Value};

use crate::error::{NodeError, NodeResult};

/// Narrow interface to the external expression/rule evaluator.
///
/// `context` is the flat dictionary produced by
/// [`ExecutionData::expression_context`](crate::context::ExecutionData::expression_context):
/// upstream node state under `"{node_id}.{field}"` keys, run variables under
/// their bare names.
pub trait ExpressionEvaluator: Send + Sync {
    fn evaluate(&self, expression: &str, context: &Map<String, Value>) -> NodeResult<Value>;
}

/// Default evaluator: `{key.path}` references, JSON literals, and binary
/// comparisons. Enough for branch conditions and variable assignments; richer
/// rule languages plug in behind the same trait.
#[derive(Debug, Default)]
pub struct KeyPathEvaluator;

impl KeyPathEvaluator {
    pub fn new() -> Self {
        KeyPathEvaluator
    }

    fn eval_term(&self, term: &str, context: &Map<String, Value>) -> Value {
        let term = term.trim();
        if let Some(key) = term.strip_prefix('{').and_then(|t| t.strip_suffix('}')) {
            return context.get(key.trim()).cloned().unwrap_or(Value::Null);
        }
        if let Ok(literal) = serde_json::from_str::<Value>(term) {
            return literal;
        }
        Value::String(term.to_string())
    }

    fn compare(&self, op: &str, lhs: &Value, rhs: &Value) -> NodeResult<bool> {
        match op {
            "==" => Ok(values_equal(lhs, rhs)),
            "!=" => Ok(!values_equal(lhs, rhs)),
            "contains" => match (lhs, rhs) {
                (Value::String(s), Value::String(needle)) => Ok(s.contains(needle.as_str())),
                (Value::Array(items), needle) => Ok(items.iter().any(|v| values_equal(v, needle))),
                _ => Err(NodeError::TypeError(format!(
                    "contains expects string or array, got {lhs} / {rhs}"
                ))),
            },
            _ => {
                let (a, b) = match (as_number(lhs), as_number(rhs)) {
                    (Some(a), Some(b)) => (a, b),
                    _ => {
                        return Err(NodeError::TypeError(format!(
                            "cannot order {lhs} {op} {rhs}"
                        )))
                    }
                };
                Ok(match op {
                    ">" => a > b,
                    ">=" => a >= b,
                    "<" => a < b,
                    "<=" => a <= b,
                    _ => return Err(NodeError::ExpressionError(format!("unknown operator {op}"))),
                })
            }
        }
    }
}

impl ExpressionEvaluator for KeyPathEvaluator {
    fn evaluate(&self, expression: &str, context: &Map<String, Value>) -> NodeResult<Value> {
        let expression = expression.trim();
        if expression.is_empty() {
            return Ok(Value::Bool(true));
        }

        // Binary comparison, checked longest-operator-first so ">=" is not
        // split as ">".
        for op in ["==", "!=", ">=", "<=", ">", "<", " contains "] {
            if let Some(pos) = find_top_level(expression, op) {
                let lhs = self.eval_term(&expression[..pos], context);
                let rhs = self.eval_term(&expression[pos + op.len()..], context);
                return self
                    .compare(op.trim(), &lhs, &rhs)
                    .map(Value::Bool);
            }
        }

        Ok(self.eval_term(expression, context))
    }
}

/// Locate an operator outside `{...}` references and string quotes.
fn find_top_level(expression: &str, op: &str) -> Option<usize> {
    let bytes = expression.as_bytes();
    let op_bytes = op.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut i = 0;
    while i + op_bytes.len() <= bytes.len() {
        match bytes[i] {
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => depth = depth.saturating_sub(1),
            b'"' => in_string = !in_string,
            _ => {}
        }
        if depth == 0 && !in_string && bytes[i..].starts_with(op_bytes) {
            return Some(i);
        }
        i += 1;
    }
    None
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    if let (Some(a), Some(b)) = (as_number(lhs), as_number(rhs)) {
        return (a - b).abs() < 1e-10;
    }
    lhs == rhs
}
