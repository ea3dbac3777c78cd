//! Declarative pipeline definitions.
//!
//! # Example (YAML)
//!
//! ```yaml
//! id: blog-post
//! name: Blog Post
//! description: Draft and polish a blog post
//! trigger:
//!   type: manual
//!   pattern: "blog|article"
//! inputs:
//!   topic: { type: string, required: true }
//!   tone: { type: string, default: friendly }
//! steps:
//!   - id: outline
//!     skill: outline-writer
//!     inputs: { topic: "${inputs.topic}" }
//!     output: outline
//!   - id: drafts
//!     skill: draft-writer
//!     inputs: { outline: "$outline" }
//!     config: { parallel: true, count: 3 }
//!     retry: { max: 2, backoff: exponential }
//!     output: drafts
//! ```

use crate::errors::DefinitionError;
use crate::pipeline::{BackoffStrategy, RetryPolicy};
use crate::scope::condition;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use tracing::warn;

/// A complete pipeline definition. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineDefinition {
    /// Unique pipeline id.
    pub id: String,

    /// Display name.
    #[serde(default)]
    pub name: String,

    /// Human-readable description, also used for matching.
    #[serde(default)]
    pub description: String,

    /// Definition version.
    #[serde(default = "default_version", deserialize_with = "string_or_number")]
    pub version: String,

    /// How the pipeline is triggered.
    #[serde(default)]
    pub trigger: TriggerConfig,

    /// Declared inputs.
    #[serde(default)]
    pub inputs: BTreeMap<String, InputSpec>,

    /// Ordered steps.
    pub steps: Vec<PipelineStep>,

    /// Output declarations, carried through untouched.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<OutputSpec>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a version string, got {other}"
        ))),
    }
}

/// Trigger declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Trigger type, `manual` unless stated otherwise.
    #[serde(rename = "type", default = "default_trigger_type")]
    pub kind: String,

    /// Regex matched against free-text task descriptions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

fn default_trigger_type() -> String {
    "manual".to_string()
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            kind: default_trigger_type(),
            pattern: None,
        }
    }
}

/// A declared pipeline input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputSpec {
    /// Informational type name (`string`, `number`, ...).
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Whether callers must supply it when there is no default.
    #[serde(default)]
    pub required: bool,

    /// Value used when the caller omits the input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl InputSpec {
    /// A required input.
    #[must_use]
    pub fn required() -> Self {
        Self {
            required: true,
            ..Self::default()
        }
    }

    /// An optional input with a default.
    #[must_use]
    pub fn with_default(value: Value) -> Self {
        Self {
            default: Some(value),
            ..Self::default()
        }
    }
}

/// One step of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStep {
    /// Step id, unique within the pipeline.
    pub id: String,

    /// Skill id to invoke.
    pub skill: String,

    /// Literal, `$name`, `${path}` template, or `{"$ref": path}` inputs.
    #[serde(default)]
    pub inputs: Map<String, Value>,

    /// Condition expression; the step is skipped when it evaluates false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    /// Retry policy on skill failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,

    /// Fan-out and skill-specific options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<StepConfig>,

    /// Scope name for the step result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl PipelineStep {
    /// Creates a step invoking `skill`.
    #[must_use]
    pub fn new(id: impl Into<String>, skill: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            skill: skill.into(),
            inputs: Map::new(),
            condition: None,
            retry: None,
            config: None,
            output: None,
        }
    }

    /// Adds an input.
    #[must_use]
    pub fn with_input(mut self, name: impl Into<String>, value: Value) -> Self {
        self.inputs.insert(name.into(), value);
        self
    }

    /// Sets the output binding name.
    #[must_use]
    pub fn with_output(mut self, name: impl Into<String>) -> Self {
        self.output = Some(name.into());
        self
    }

    /// Sets the condition.
    #[must_use]
    pub fn with_condition(mut self, expression: impl Into<String>) -> Self {
        self.condition = Some(expression.into());
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, max: u32, backoff: BackoffStrategy) -> Self {
        self.retry = Some(RetryPolicy::new(max, backoff));
        self
    }

    /// Runs the step as `count` parallel invocations.
    #[must_use]
    pub fn with_parallel(mut self, count: usize) -> Self {
        let config = self.config.get_or_insert_with(StepConfig::default);
        config.parallel = true;
        config.count = Some(count);
        self
    }

    /// Adds a skill-specific option.
    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config
            .get_or_insert_with(StepConfig::default)
            .options
            .insert(key.into(), value);
        self
    }

    /// Number of invocations this step makes.
    #[must_use]
    pub fn fanout(&self) -> usize {
        self.config.as_ref().map_or(1, StepConfig::fanout)
    }

    /// Returns true if the step fans out.
    #[must_use]
    pub fn is_parallel(&self) -> bool {
        self.config.as_ref().is_some_and(|c| c.parallel)
    }

    /// Skill-specific options.
    #[must_use]
    pub fn options(&self) -> Map<String, Value> {
        self.config
            .as_ref()
            .map(|c| c.options.clone())
            .unwrap_or_default()
    }
}

/// Step configuration: fan-out plus free-form skill options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepConfig {
    /// Run `count` invocations concurrently.
    #[serde(default)]
    pub parallel: bool,

    /// Invocation count when parallel (default 1).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,

    /// Everything else, handed to the skill.
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl StepConfig {
    /// Number of invocations.
    #[must_use]
    pub fn fanout(&self) -> usize {
        if self.parallel {
            self.count.unwrap_or(1)
        } else {
            1
        }
    }
}

/// Output declaration (platform and format), not interpreted by the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputSpec {
    /// Target platform.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,

    /// Output format.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    /// Other declared fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PipelineDefinition {
    /// Creates a definition with no steps.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            version: default_version(),
            trigger: TriggerConfig::default(),
            inputs: BTreeMap::new(),
            steps: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the trigger pattern.
    #[must_use]
    pub fn with_trigger_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.trigger.pattern = Some(pattern.into());
        self
    }

    /// Declares an input.
    #[must_use]
    pub fn with_input(mut self, name: impl Into<String>, spec: InputSpec) -> Self {
        self.inputs.insert(name.into(), spec);
        self
    }

    /// Appends a step.
    #[must_use]
    pub fn with_step(mut self, step: PipelineStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Returns a step by id.
    #[must_use]
    pub fn step(&self, id: &str) -> Option<&PipelineStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Checks structural validity.
    ///
    /// Malformed conditions are only warned about: they evaluate to false at
    /// run time and disable their step.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::Invalid`] on an empty id, no steps,
    /// duplicate step ids, an empty skill reference, or a zero fan-out count.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        if self.id.trim().is_empty() {
            return Err(DefinitionError::invalid(&self.id, "Pipeline id cannot be empty"));
        }
        if self.steps.is_empty() {
            return Err(DefinitionError::invalid(
                &self.id,
                "Pipeline must have at least one step",
            ));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.id.trim().is_empty() {
                return Err(DefinitionError::invalid(&self.id, "Step id cannot be empty"));
            }
            if !seen.insert(step.id.as_str()) {
                return Err(DefinitionError::invalid(
                    &self.id,
                    format!("Duplicate step id: {}", step.id),
                ));
            }
            if step.skill.trim().is_empty() {
                return Err(DefinitionError::invalid(
                    &self.id,
                    format!("Step '{}' has no skill", step.id),
                ));
            }
            if step.is_parallel() && step.fanout() == 0 {
                return Err(DefinitionError::invalid(
                    &self.id,
                    format!("Step '{}' has a parallel count of 0", step.id),
                ));
            }
            if let Some(expression) = &step.condition {
                if let Err(e) = condition::parse(expression) {
                    warn!(
                        pipeline = %self.id,
                        step = %step.id,
                        error = %e,
                        "Step condition does not parse and will always skip"
                    );
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const YAML: &str = r#"
id: blog-post
name: Blog Post
description: Draft and polish a blog post
version: 2
trigger:
  pattern: "blog|article"
inputs:
  topic: { type: string, required: true }
  tone: { type: string, default: friendly }
steps:
  - id: outline
    skill: outline-writer
    inputs: { topic: "${inputs.topic}" }
    output: outline
  - id: drafts
    skill: draft-writer
    inputs: { outline: "$outline" }
    config: { parallel: true, count: 3, temperature: 0.7 }
    retry: { max: 2, backoff: linear }
    output: drafts
outputs:
  - platform: blog
    format: markdown
"#;

    #[test]
    fn test_parse_yaml() {
        let def: PipelineDefinition = serde_yml::from_str(YAML).unwrap();
        assert_eq!(def.id, "blog-post");
        assert_eq!(def.version, "2");
        assert_eq!(def.trigger.kind, "manual");
        assert_eq!(def.trigger.pattern.as_deref(), Some("blog|article"));
        assert!(def.inputs["topic"].required);
        assert_eq!(def.inputs["tone"].default, Some(json!("friendly")));

        let drafts = def.step("drafts").unwrap();
        assert_eq!(drafts.fanout(), 3);
        assert_eq!(drafts.options()["temperature"], json!(0.7));
        assert_eq!(drafts.retry, Some(RetryPolicy::new(2, BackoffStrategy::Linear)));
        assert_eq!(def.outputs[0].format.as_deref(), Some("markdown"));
        def.validate().unwrap();
    }

    #[test]
    fn test_fanout_defaults() {
        let step = PipelineStep::new("s", "k");
        assert_eq!(step.fanout(), 1);
        let config: StepConfig = serde_json::from_value(json!({ "parallel": true })).unwrap();
        assert_eq!(config.fanout(), 1);
        let config: StepConfig = serde_json::from_value(json!({ "count": 4 })).unwrap();
        assert_eq!(config.fanout(), 1);
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let def = PipelineDefinition::new("p", "P")
            .with_step(PipelineStep::new("a", "k"))
            .with_step(PipelineStep::new("a", "k"));
        let err = def.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate step id: a"));
    }

    #[test]
    fn test_validate_rejects_empty() {
        assert!(PipelineDefinition::new("p", "P").validate().is_err());
        let def = PipelineDefinition::new("p", "P").with_step(PipelineStep::new("a", ""));
        assert!(def.validate().is_err());
        let def = PipelineDefinition::new("p", "P").with_step(PipelineStep::new("a", "k").with_parallel(0));
        assert!(def.validate().is_err());
    }

    #[test]
    fn test_malformed_condition_is_not_fatal() {
        let def = PipelineDefinition::new("p", "P")
            .with_step(PipelineStep::new("a", "k").with_condition("ctx.a ==="));
        assert!(def.validate().is_ok());
    }
}
