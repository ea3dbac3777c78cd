//! Per-run variable scope, input resolution, and condition evaluation.

pub mod condition;
pub mod resolver;
mod variables;

pub use condition::{evaluate, ConditionError};
pub use resolver::{resolve, resolve_inputs};
pub use variables::VariableScope;
