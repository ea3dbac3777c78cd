//! Mock skills for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::errors::SkillError;
use crate::skills::{Skill, SkillContext, SkillResult};

#[derive(Debug, Default)]
struct MockState {
    calls: AtomicUsize,
    contexts: Mutex<Vec<SkillContext>>,
    failures_left: Mutex<u32>,
}

/// A scriptable skill that records every call.
///
/// Clones share call tracking, so a clone can be registered while the
/// original is kept for assertions. By default it succeeds with
/// `{ "skill", "invocation", "attempt", "inputs" }`.
#[derive(Debug, Clone)]
pub struct MockSkill {
    id: String,
    state: Arc<MockState>,
    output: Option<Value>,
    always_fail: bool,
    failing_invocations: HashSet<usize>,
    latencies: Vec<Duration>,
    latency: Option<Duration>,
    tokens: u64,
    cost: f64,
    model: Option<String>,
}

impl MockSkill {
    /// Creates a mock that always succeeds.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: Arc::new(MockState::default()),
            output: None,
            always_fail: false,
            failing_invocations: HashSet::new(),
            latencies: Vec::new(),
            latency: None,
            tokens: 0,
            cost: 0.0,
            model: None,
        }
    }

    /// Returns `output` instead of the default echo.
    #[must_use]
    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }

    /// Fails the first `n` calls, then succeeds.
    #[must_use]
    pub fn failing_times(self, n: u32) -> Self {
        *self.state.failures_left.lock() = n;
        self
    }

    /// Fails every call.
    #[must_use]
    pub fn always_failing(mut self) -> Self {
        self.always_fail = true;
        self
    }

    /// Fails every call made for fan-out invocation `index`.
    #[must_use]
    pub fn failing_invocation(mut self, index: usize) -> Self {
        self.failing_invocations.insert(index);
        self
    }

    /// Sleeps `latencies[i]` before answering invocation `i`.
    #[must_use]
    pub fn with_latencies(mut self, latencies: Vec<Duration>) -> Self {
        self.latencies = latencies;
        self
    }

    /// Sleeps `latency` before answering invocations without a specific latency.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Reports usage on success.
    #[must_use]
    pub fn with_usage(mut self, tokens: u64, cost: f64, model: Option<&str>) -> Self {
        self.tokens = tokens;
        self.cost = cost;
        self.model = model.map(str::to_string);
        self
    }

    /// Number of calls so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    /// The context of every call, in call order.
    #[must_use]
    pub fn recorded_contexts(&self) -> Vec<SkillContext> {
        self.state.contexts.lock().clone()
    }

    /// Clears call tracking.
    pub fn reset(&self) {
        self.state.calls.store(0, Ordering::SeqCst);
        self.state.contexts.lock().clear();
    }

    fn should_fail(&self, ctx: &SkillContext) -> bool {
        if self.always_fail || self.failing_invocations.contains(&ctx.invocation) {
            return true;
        }
        let mut left = self.state.failures_left.lock();
        if *left > 0 {
            *left -= 1;
            return true;
        }
        false
    }
}

#[async_trait]
impl Skill for MockSkill {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        "Scripted test skill"
    }

    async fn execute(&self, ctx: &SkillContext) -> Result<SkillResult, SkillError> {
        self.state.calls.fetch_add(1, Ordering::SeqCst);
        self.state.contexts.lock().push(ctx.clone());

        if let Some(latency) = self.latencies.get(ctx.invocation).copied().or(self.latency) {
            tokio::time::sleep(latency).await;
        }

        if self.should_fail(ctx) {
            return Err(SkillError::failed(format!(
                "{} failed on attempt {}",
                self.id, ctx.attempt
            )));
        }

        let output = self.output.clone().unwrap_or_else(|| {
            json!({
                "skill": self.id,
                "invocation": ctx.invocation,
                "attempt": ctx.attempt,
                "inputs": ctx.inputs,
            })
        });
        let mut result = SkillResult::new(output).with_usage(self.tokens, self.cost);
        if let Some(model) = &self.model {
            result = result.with_model(model.clone());
        }
        Ok(result)
    }
}

/// A skill that returns its resolved inputs as its output.
#[derive(Debug, Clone)]
pub struct EchoSkill {
    id: String,
    duration_ms: Option<u64>,
    model: Option<String>,
    tokens: u64,
}

impl EchoSkill {
    /// Creates an echo skill.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            duration_ms: None,
            model: None,
            tokens: 0,
        }
    }

    /// Reports a fixed duration.
    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Reports a model and token count.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>, tokens: u64) -> Self {
        self.model = Some(model.into());
        self.tokens = tokens;
        self
    }
}

#[async_trait]
impl Skill for EchoSkill {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        "Echoes its inputs"
    }

    async fn execute(&self, ctx: &SkillContext) -> Result<SkillResult, SkillError> {
        let mut result = SkillResult::new(Value::Object(ctx.inputs.clone())).with_usage(self.tokens, 0.0);
        if let Some(model) = &self.model {
            result = result.with_model(model.clone());
        }
        if let Some(duration) = self.duration_ms {
            result = result.with_duration_ms(duration);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn ctx(invocation: usize) -> SkillContext {
        let mut ctx = SkillContext::new("s", Map::new());
        ctx.invocation = invocation;
        ctx
    }

    #[tokio::test]
    async fn test_mock_failing_times_then_succeeds() {
        let mock = MockSkill::new("m").failing_times(2);
        let shared = mock.clone();
        assert!(mock.execute(&ctx(0)).await.is_err());
        assert!(mock.execute(&ctx(0)).await.is_err());
        let ok = mock.execute(&ctx(0)).await.unwrap();
        assert_eq!(ok.output["skill"], "m");
        assert_eq!(shared.calls(), 3);

        shared.reset();
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test]
    async fn test_mock_failing_invocation_and_usage() {
        let mock = MockSkill::new("m")
            .failing_invocation(1)
            .with_usage(10, 0.5, Some("gpt"));
        assert!(mock.execute(&ctx(1)).await.is_err());
        let ok = mock.execute(&ctx(2)).await.unwrap();
        assert_eq!(ok.tokens_used, 10);
        assert_eq!(ok.model_used.as_deref(), Some("gpt"));
        assert_eq!(ok.output["invocation"], 2);
    }

    #[tokio::test]
    async fn test_echo_returns_inputs() {
        let mut inputs = Map::new();
        inputs.insert("text".into(), json!("hi"));
        let result = EchoSkill::new("echo")
            .execute(&SkillContext::new("s", inputs))
            .await
            .unwrap();
        assert_eq!(result.output, json!({ "text": "hi" }));
        assert!(result.duration_ms.is_none());
    }
}
