//! Skills: the pluggable units of work steps delegate to.

mod context;
mod registry;

pub use context::{BrandProfile, Services, SkillContext};
pub use registry::SkillRegistry;

use crate::errors::SkillError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;

/// What a skill returns on success.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillResult {
    /// The produced content.
    pub output: serde_json::Value,
    /// Tokens consumed.
    #[serde(default)]
    pub tokens_used: u64,
    /// Cost in provider-neutral units.
    #[serde(default)]
    pub cost_units: f64,
    /// The model used, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
    /// Self-reported duration; the executor measures wall time when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl SkillResult {
    /// Creates a result with only an output.
    #[must_use]
    pub fn new(output: serde_json::Value) -> Self {
        Self {
            output,
            ..Self::default()
        }
    }

    /// Sets token usage and cost.
    #[must_use]
    pub fn with_usage(mut self, tokens_used: u64, cost_units: f64) -> Self {
        self.tokens_used = tokens_used;
        self.cost_units = cost_units;
        self
    }

    /// Sets the model identifier.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model_used = Some(model.into());
        self
    }

    /// Sets the reported duration.
    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

/// A unit of work a pipeline step delegates to.
#[async_trait]
pub trait Skill: Send + Sync {
    /// The identifier steps reference.
    fn id(&self) -> &str;

    /// A short human-readable description.
    fn description(&self) -> &str {
        ""
    }

    /// Runs the skill once.
    ///
    /// Returning an error signals a retryable failure.
    async fn execute(&self, ctx: &SkillContext) -> Result<SkillResult, SkillError>;
}

/// A skill backed by an async closure.
pub struct FnSkill<F> {
    id: String,
    description: String,
    func: F,
}

impl<F, Fut> FnSkill<F>
where
    F: Fn(SkillContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<SkillResult, SkillError>> + Send,
{
    /// Creates a closure-backed skill.
    pub fn new(id: impl Into<String>, func: F) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            func,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

impl<F> fmt::Debug for FnSkill<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnSkill").field("id", &self.id).finish()
    }
}

#[async_trait]
impl<F, Fut> Skill for FnSkill<F>
where
    F: Fn(SkillContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<SkillResult, SkillError>> + Send,
{
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn execute(&self, ctx: &SkillContext) -> Result<SkillResult, SkillError> {
        (self.func)(ctx.clone()).await
    }
}
