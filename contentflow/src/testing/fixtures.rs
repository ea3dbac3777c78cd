//! Sample definitions and ready-made engines.

use crate::definition::{InputSpec, PipelineDefinition, PipelineRegistry, PipelineStep};
use crate::pipeline::{BackoffConfig, PipelineEngine};
use crate::skills::SkillRegistry;
use serde_json::json;
use std::sync::Arc;

use super::mocks::EchoSkill;

/// Two steps where the second consumes the first's output.
///
/// `step1` runs `skill-a` on `${inputs.text}` and binds `first_result`;
/// `step2` runs `skill-b` on `$first_result` and binds `second_result`.
#[must_use]
pub fn chained_pipeline() -> PipelineDefinition {
    PipelineDefinition::new("test-chained", "Test Chained")
        .with_description("Two chained steps for end to end testing")
        .with_input("text", InputSpec::required())
        .with_step(
            PipelineStep::new("step1", "skill-a")
                .with_input("text", json!("${inputs.text}"))
                .with_output("first_result"),
        )
        .with_step(
            PipelineStep::new("step2", "skill-b")
                .with_input("previous", json!("$first_result"))
                .with_output("second_result"),
        )
}

/// `steps` sequential steps on `skill`, ids `step1..stepN`, each binding `outN`.
#[must_use]
pub fn linear_pipeline(id: &str, skill: &str, steps: usize) -> PipelineDefinition {
    (1..=steps).fold(PipelineDefinition::new(id, id), |def, i| {
        def.with_step(
            PipelineStep::new(format!("step{i}"), skill)
                .with_input("index", json!(i))
                .with_output(format!("out{i}")),
        )
    })
}

/// Backoff used by test engines so retries stay fast.
#[must_use]
pub fn fast_backoff() -> BackoffConfig {
    BackoffConfig::new().with_base_delay_ms(1).with_max_delay_ms(5)
}

/// An engine over the given definitions and skills with [`fast_backoff`].
///
/// # Panics
///
/// Panics when a definition is invalid.
#[must_use]
pub fn engine_with(definitions: Vec<PipelineDefinition>, skills: SkillRegistry) -> PipelineEngine {
    let registry = PipelineRegistry::new();
    for definition in definitions {
        if let Err(e) = registry.register(definition) {
            panic!("invalid fixture definition: {e}");
        }
    }
    PipelineEngine::new(Arc::new(registry), Arc::new(skills)).with_backoff(fast_backoff())
}

/// An engine with [`chained_pipeline`] and echoing `skill-a`/`skill-b`.
#[must_use]
pub fn test_engine() -> PipelineEngine {
    engine_with(
        vec![chained_pipeline()],
        SkillRegistry::new()
            .with(EchoSkill::new("skill-a"))
            .with(EchoSkill::new("skill-b")),
    )
}
