//! Pipeline definitions: the declarative model, file loader, and registry.

pub mod loader;
mod model;
mod registry;

pub use loader::{DefinitionFormat, LoadEvent, LoadedDefinition};
pub use model::{
    InputSpec, OutputSpec, PipelineDefinition, PipelineStep, StepConfig, TriggerConfig,
};
pub use registry::{PipelineRegistry, RegisteredPipeline, ReloadOutcome};
