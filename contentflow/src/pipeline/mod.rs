//! Pipeline execution.
//!
//! This module provides:
//! - The pipeline engine and request type
//! - The step executor (conditions, fan-out, retries)
//! - Run records and metering
//! - Free-text pipeline matching

mod engine;
mod executor;
mod matcher;
mod metering;
mod retry;
mod run;

#[cfg(test)]
mod integration_tests;

pub use engine::{build_scope, ExecutionRequest, PipelineEngine, StepCallback};
pub use executor::{RunContext, StepExecutor, StepOutcome};
pub use matcher::{score, PipelineMatch, PipelineMatcher, NAME_WEIGHT, TRIGGER_WEIGHT, WORD_WEIGHT};
pub use metering::{Metering, ModelUsage, UNKNOWN_MODEL};
pub use retry::{
    with_retry, BackoffConfig, BackoffStrategy, JitterStrategy, RetryOutcome, RetryPolicy,
};
pub use run::{PipelineRun, StepRun};
