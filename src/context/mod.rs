//! Execution context: mutable per-run state plus the expression boundary.

pub mod execution_data;
pub mod expression;

pub use execution_data::{ExecutionData, TriggerInput};
pub use expression::{ExpressionEvaluator, KeyPathEvaluator};
