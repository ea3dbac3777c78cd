//! # Contentflow
//!
//! Pipeline execution engine and asynchronous run lifecycle for skill-based
//! content generation.
//!
//! Contentflow provides:
//!
//! - **Declarative pipelines**: ordered steps loaded from JSON or YAML files
//! - **Step execution**: templated inputs, conditions, retries with backoff,
//!   and parallel fan-out with ordered aggregation
//! - **Run records**: per-step status and usage metering grouped by model
//! - **Background runs**: a worker pool with cooperative cancellation,
//!   retention, and replayable per-run event streams
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use contentflow::prelude::*;
//!
//! let skills = Arc::new(SkillRegistry::new().with(MyWriter::new()));
//! let (engine, _events) = PipelineEngine::from_config(&EngineConfig::from_env(), skills);
//!
//! let run = engine
//!     .execute(ExecutionRequest::new("blog-post").with_input("topic", json!("Rust")))
//!     .await;
//!
//! let manager = AsyncRunManager::new(&EngineConfig::default());
//! let queued = manager
//!     .enqueue("blog-post", None, engine_job(engine, request))
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod core;
pub mod definition;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod runs;
pub mod scope;
pub mod skills;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::EngineConfig;
    pub use crate::core::{RunEvent, RunEventKind, RunStatus};
    pub use crate::definition::{
        InputSpec, PipelineDefinition, PipelineRegistry, PipelineStep, StepConfig,
    };
    pub use crate::errors::{DefinitionError, EngineError, RunError, SkillError};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink, RunEventHub};
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::pipeline::{
        BackoffStrategy, ExecutionRequest, PipelineEngine, PipelineMatcher, PipelineRun,
        RetryPolicy, StepRun,
    };
    pub use crate::runs::{engine_job, AsyncRun, AsyncRunManager, JobError, RunFilter, RunHandle};
    pub use crate::scope::VariableScope;
    pub use crate::skills::{
        BrandProfile, FnSkill, Services, Skill, SkillContext, SkillRegistry, SkillResult,
    };
    pub use crate::utils::{generate_run_id, iso_timestamp, Timestamp};
}
