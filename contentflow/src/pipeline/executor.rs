//! Executes one pipeline step: condition, input resolution, fan-out, retries.

use super::retry::{with_retry, BackoffConfig};
use super::StepRun;
use crate::definition::PipelineStep;
use crate::errors::EngineError;
use crate::observability::step_span;
use crate::scope::{self, VariableScope};
use crate::skills::{BrandProfile, Services, Skill, SkillContext, SkillRegistry};
use crate::utils::elapsed_ms;
use futures::future::join_all;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn, Instrument};

/// Per-run values shared by every skill invocation.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    /// The run id.
    pub run_id: String,
    /// Brand profile, when supplied.
    pub brand: Option<Arc<BrandProfile>>,
    /// Collaborator services.
    pub services: Arc<Services>,
}

/// Result of executing one step.
#[derive(Debug)]
pub enum StepOutcome {
    /// The condition evaluated false. No step records are produced.
    Skipped,
    /// Every invocation succeeded.
    Completed {
        /// One record per invocation, in index order.
        runs: Vec<StepRun>,
        /// The single result, or an index-ordered array for fan-out steps.
        binding: Value,
    },
    /// The step failed fatally or exhausted its retries.
    Failed {
        /// Records of all settled invocations.
        runs: Vec<StepRun>,
        /// The error that fails the run.
        error: EngineError,
    },
}

/// Runs steps against a skill registry.
#[derive(Debug, Clone)]
pub struct StepExecutor {
    skills: Arc<SkillRegistry>,
    backoff: BackoffConfig,
}

impl StepExecutor {
    /// Creates an executor.
    #[must_use]
    pub fn new(skills: Arc<SkillRegistry>, backoff: BackoffConfig) -> Self {
        Self { skills, backoff }
    }

    /// The backoff parameters in use.
    #[must_use]
    pub fn backoff(&self) -> &BackoffConfig {
        &self.backoff
    }

    /// Executes a step against the current scope.
    ///
    /// Fan-out invocations run concurrently and are joined in full before
    /// the outcome is decided; a failed invocation does not cancel its
    /// siblings.
    pub async fn execute(
        &self,
        step: &PipelineStep,
        scope: &VariableScope,
        ctx: &RunContext,
    ) -> StepOutcome {
        if let Some(condition) = &step.condition {
            if !scope::evaluate(condition, scope) {
                debug!(step = %step.id, condition = %condition, "Condition false, skipping step");
                return StepOutcome::Skipped;
            }
        }

        let inputs = scope::resolve_inputs(&step.inputs, scope);

        let Some(skill) = self.skills.get(&step.skill) else {
            let error = EngineError::SkillNotFound(step.skill.clone());
            warn!(step = %step.id, skill = %step.skill, "Skill not found");
            return StepOutcome::Failed {
                runs: vec![StepRun::failed(&step.id, error.to_string(), 0, 0)],
                error,
            };
        };

        let runs = if step.is_parallel() {
            let count = step.fanout();
            debug!(step = %step.id, count, "Fanning out step");
            let invocations = (0..count).map(|index| {
                self.invoke(
                    &skill,
                    step,
                    format!("{}[{index}]", step.id),
                    index,
                    inputs.clone(),
                    ctx,
                )
            });
            join_all(invocations).await
        } else {
            vec![self.invoke(&skill, step, step.id.clone(), 0, inputs, ctx).await]
        };

        if let Some(failed) = runs.iter().find(|r| !r.is_completed()) {
            let error = EngineError::step_failed(
                failed.step_id.clone(),
                failed.error.clone().unwrap_or_default(),
            );
            return StepOutcome::Failed { runs, error };
        }

        let binding = if step.is_parallel() {
            Value::Array(
                runs.iter()
                    .map(|r| r.output.clone().unwrap_or(Value::Null))
                    .collect(),
            )
        } else {
            runs.first()
                .and_then(|r| r.output.clone())
                .unwrap_or(Value::Null)
        };

        StepOutcome::Completed { runs, binding }
    }

    async fn invoke(
        &self,
        skill: &Arc<dyn Skill>,
        step: &PipelineStep,
        instance_id: String,
        invocation: usize,
        inputs: Map<String, Value>,
        ctx: &RunContext,
    ) -> StepRun {
        let base = SkillContext {
            run_id: ctx.run_id.clone(),
            step_id: step.id.clone(),
            invocation,
            attempt: 1,
            inputs,
            config: step.options(),
            brand: ctx.brand.clone(),
            services: ctx.services.clone(),
        };

        let started = Instant::now();
        let outcome = with_retry(step.retry.as_ref(), &self.backoff, &instance_id, |attempt| {
            let mut attempt_ctx = base.clone();
            attempt_ctx.attempt = attempt;
            let skill = skill.clone();
            async move { skill.execute(&attempt_ctx).await }
        })
        .instrument(step_span(&instance_id, &step.skill))
        .await;
        let elapsed = elapsed_ms(started);

        match outcome.result {
            Ok(result) => {
                let duration = result.duration_ms.unwrap_or(elapsed);
                info!(
                    step = %instance_id,
                    skill = %step.skill,
                    attempts = outcome.attempts,
                    tokens = result.tokens_used,
                    duration_ms = duration,
                    "Step completed"
                );
                StepRun::completed(instance_id, &result, duration, outcome.attempts)
            }
            Err(e) => {
                warn!(
                    step = %instance_id,
                    skill = %step.skill,
                    attempts = outcome.attempts,
                    error = %e,
                    "Step failed"
                );
                StepRun::failed(instance_id, e.to_string(), elapsed, outcome.attempts)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RunStatus;
    use crate::errors::SkillError;
    use crate::pipeline::BackoffStrategy;
    use crate::skills::{FnSkill, SkillResult};
    use crate::testing::{EchoSkill, MockSkill};
    use serde_json::json;
    use std::time::Duration;

    fn executor(skills: SkillRegistry) -> StepExecutor {
        StepExecutor::new(Arc::new(skills), BackoffConfig::new().with_base_delay_ms(1))
    }

    #[tokio::test]
    async fn test_condition_false_skips() {
        let mock = MockSkill::new("k");
        let exec = executor(SkillRegistry::new().with(mock.clone()));
        let step = PipelineStep::new("s", "k").with_condition("ctx.enabled");
        let outcome = exec.execute(&step, &VariableScope::new(), &RunContext::default()).await;
        assert!(matches!(outcome, StepOutcome::Skipped));
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test]
    async fn test_resolved_inputs_reach_skill() {
        let mock = MockSkill::new("k");
        let exec = executor(SkillRegistry::new().with(mock.clone()));
        let mut scope = VariableScope::new();
        scope.insert("inputs.text", json!("hello")).unwrap();
        let step = PipelineStep::new("s", "k")
            .with_input("prompt", json!("Say ${inputs.text}"))
            .with_option("temperature", json!(0.2));

        let outcome = exec.execute(&step, &scope, &RunContext::default()).await;

        assert!(matches!(outcome, StepOutcome::Completed { .. }));
        let seen = mock.recorded_contexts();
        assert_eq!(seen[0].inputs["prompt"], json!("Say hello"));
        assert_eq!(seen[0].config["temperature"], json!(0.2));
    }

    #[tokio::test]
    async fn test_missing_skill_is_fatal() {
        let exec = executor(SkillRegistry::new());
        let step = PipelineStep::new("s", "ghost").with_retry(3, BackoffStrategy::Linear);
        match exec.execute(&step, &VariableScope::new(), &RunContext::default()).await {
            StepOutcome::Failed { runs, error } => {
                assert!(matches!(error, EngineError::SkillNotFound(ref id) if id == "ghost"));
                assert_eq!(runs.len(), 1);
                assert_eq!(runs[0].attempts, 0);
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_parallel_binding_in_index_order() {
        // Later invocations finish first.
        let mock = MockSkill::new("k").with_latencies(vec![
            Duration::from_millis(30),
            Duration::from_millis(15),
            Duration::from_millis(1),
        ]);
        let exec = executor(SkillRegistry::new().with(mock.clone()));
        let step = PipelineStep::new("fan", "k").with_parallel(3);

        match exec.execute(&step, &VariableScope::new(), &RunContext::default()).await {
            StepOutcome::Completed { runs, binding } => {
                let ids: Vec<_> = runs.iter().map(|r| r.step_id.as_str()).collect();
                assert_eq!(ids, vec!["fan[0]", "fan[1]", "fan[2]"]);
                let invocations: Vec<_> = binding
                    .as_array()
                    .unwrap()
                    .iter()
                    .map(|v| v["invocation"].as_u64().unwrap())
                    .collect();
                assert_eq!(invocations, vec![0, 1, 2]);
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_parallel_invocations_overlap() {
        // Each invocation waits until all four are in flight at once.
        let barrier = Arc::new(tokio::sync::Barrier::new(4));
        let skill = FnSkill::new("gate", move |ctx: SkillContext| {
            let barrier = barrier.clone();
            async move {
                tokio::time::timeout(Duration::from_secs(5), barrier.wait())
                    .await
                    .map_err(|_| SkillError::failed("invocations ran one at a time"))?;
                Ok::<_, SkillError>(SkillResult::new(json!(ctx.invocation)))
            }
        });
        let exec = executor(SkillRegistry::new().with(skill));
        let step = PipelineStep::new("fan", "gate").with_parallel(4);

        match exec.execute(&step, &VariableScope::new(), &RunContext::default()).await {
            StepOutcome::Completed { binding, .. } => assert_eq!(binding, json!([0, 1, 2, 3])),
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_parallel_latency_is_not_summed() {
        let mock = MockSkill::new("k").with_latency(Duration::from_millis(100));
        let exec = executor(SkillRegistry::new().with(mock.clone()));
        let step = PipelineStep::new("fan", "k").with_parallel(4);

        let started = Instant::now();
        let outcome = exec.execute(&step, &VariableScope::new(), &RunContext::default()).await;
        let elapsed = started.elapsed();

        assert!(matches!(outcome, StepOutcome::Completed { .. }));
        assert_eq!(mock.calls(), 4);
        assert!(elapsed < Duration::from_millis(300), "fan-out took {elapsed:?}");
    }

    #[tokio::test]
    async fn test_parallel_failure_waits_for_siblings() {
        let mock = MockSkill::new("k").failing_invocation(1);
        let exec = executor(SkillRegistry::new().with(mock.clone()));
        let step = PipelineStep::new("fan", "k").with_parallel(3);

        match exec.execute(&step, &VariableScope::new(), &RunContext::default()).await {
            StepOutcome::Failed { runs, error } => {
                assert_eq!(runs.len(), 3);
                assert_eq!(runs[1].status, RunStatus::Failed);
                assert!(runs[0].is_completed() && runs[2].is_completed());
                assert!(error.to_string().starts_with("Step 'fan[1]' failed"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(mock.calls(), 3);
    }

    #[tokio::test]
    async fn test_reported_duration_preferred() {
        let exec = executor(SkillRegistry::new().with(EchoSkill::new("echo").with_duration_ms(1234)));
        let step = PipelineStep::new("s", "echo");
        match exec.execute(&step, &VariableScope::new(), &RunContext::default()).await {
            StepOutcome::Completed { runs, .. } => assert_eq!(runs[0].duration_ms, 1234),
            other => panic!("expected completion, got {other:?}"),
        }
    }
}
