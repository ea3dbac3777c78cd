//! Pipeline and step run records.

use super::Metering;
use crate::core::RunStatus;
use crate::skills::SkillResult;
use crate::utils::{generate_run_id, now_utc, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The record of one step invocation (one per fan-out index).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRun {
    /// Step id, suffixed `[i]` for fan-out invocations.
    pub step_id: String,
    /// `Completed` or `Failed`.
    pub status: RunStatus,
    /// When the first attempt started.
    pub started_at: Timestamp,
    /// When the last attempt settled.
    pub completed_at: Option<Timestamp>,
    /// Skill output on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Last error on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Tokens consumed.
    pub tokens_used: u64,
    /// Cost units.
    pub cost_units: f64,
    /// Duration in milliseconds.
    pub duration_ms: u64,
    /// Model the skill reported using.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
    /// Skill invocations made, `0` when the skill could not be found.
    pub attempts: u32,
}

fn started_before(duration_ms: u64) -> (Timestamp, Timestamp) {
    let completed_at = now_utc();
    let elapsed = i64::try_from(duration_ms)
        .ok()
        .and_then(chrono::Duration::try_milliseconds)
        .unwrap_or_else(chrono::Duration::zero);
    (completed_at - elapsed, completed_at)
}

impl StepRun {
    /// Records a successful invocation.
    #[must_use]
    pub fn completed(
        step_id: impl Into<String>,
        result: &SkillResult,
        duration_ms: u64,
        attempts: u32,
    ) -> Self {
        let (started_at, completed_at) = started_before(duration_ms);
        Self {
            step_id: step_id.into(),
            status: RunStatus::Completed,
            started_at,
            completed_at: Some(completed_at),
            output: Some(result.output.clone()),
            error: None,
            tokens_used: result.tokens_used,
            cost_units: result.cost_units,
            duration_ms,
            model_used: result.model_used.clone(),
            attempts,
        }
    }

    /// Records a failed invocation.
    #[must_use]
    pub fn failed(
        step_id: impl Into<String>,
        error: impl Into<String>,
        duration_ms: u64,
        attempts: u32,
    ) -> Self {
        let (started_at, completed_at) = started_before(duration_ms);
        Self {
            step_id: step_id.into(),
            status: RunStatus::Failed,
            started_at,
            completed_at: Some(completed_at),
            output: None,
            error: Some(error.into()),
            tokens_used: 0,
            cost_units: 0.0,
            duration_ms,
            model_used: None,
            attempts,
        }
    }

    /// Returns true if the invocation succeeded.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

/// The record of one pipeline execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRun {
    /// Run id.
    pub id: String,
    /// The executed pipeline.
    pub pipeline_id: String,
    /// Tenant brand.
    pub brand_id: Option<String>,
    /// Lifecycle status.
    pub status: RunStatus,
    /// Caller inputs as supplied.
    pub inputs: Map<String, Value>,
    /// Step records in execution order.
    pub steps: Vec<StepRun>,
    /// Values bound by steps declaring an `output`.
    pub outputs: Map<String, Value>,
    /// When execution began.
    pub started_at: Option<Timestamp>,
    /// When the run reached a terminal status.
    pub completed_at: Option<Timestamp>,
    /// Terminating error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Aggregate usage.
    pub metering: Metering,
}

impl PipelineRun {
    /// Creates a queued run.
    #[must_use]
    pub fn new(
        pipeline_id: impl Into<String>,
        brand_id: Option<String>,
        inputs: Map<String, Value>,
    ) -> Self {
        Self {
            id: generate_run_id(),
            pipeline_id: pipeline_id.into(),
            brand_id,
            status: RunStatus::Queued,
            inputs,
            steps: Vec::new(),
            outputs: Map::new(),
            started_at: None,
            completed_at: None,
            error: None,
            metering: Metering::new(),
        }
    }

    /// Overrides the generated id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    fn transition(&mut self, next: RunStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        if next == RunStatus::Running {
            self.started_at = Some(now_utc());
        } else if next.is_terminal() {
            self.completed_at = Some(now_utc());
        }
        true
    }

    /// Moves to `Running`.
    pub fn start(&mut self) -> bool {
        self.transition(RunStatus::Running)
    }

    /// Moves to `Completed`.
    pub fn complete(&mut self) -> bool {
        self.transition(RunStatus::Completed)
    }

    /// Moves to `Failed` with an error.
    pub fn fail(&mut self, error: impl Into<String>) -> bool {
        let applied = self.transition(RunStatus::Failed);
        if applied {
            self.error = Some(error.into());
        }
        applied
    }

    /// Moves to `Cancelled` with a reason.
    pub fn cancel(&mut self, reason: impl Into<String>) -> bool {
        let applied = self.transition(RunStatus::Cancelled);
        if applied {
            self.error = Some(reason.into());
        }
        applied
    }

    /// Appends a step record and folds it into metering.
    pub fn push_step(&mut self, step: StepRun) {
        self.metering.record(&step);
        self.steps.push(step);
    }

    /// Id of the last step record that completed.
    #[must_use]
    pub fn last_completed_step(&self) -> Option<&str> {
        self.steps
            .iter()
            .rev()
            .find(|s| s.is_completed())
            .map(|s| s.step_id.as_str())
    }

    /// Returns true once the run is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Wall time between start and completion.
    #[must_use]
    pub fn duration_ms(&self) -> Option<u64> {
        let elapsed = self.completed_at? - self.started_at?;
        u64::try_from(elapsed.num_milliseconds()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lifecycle() {
        let mut run = PipelineRun::new("p", Some("b".into()), Map::new());
        assert_eq!(run.status, RunStatus::Queued);
        assert!(run.start());
        assert!(run.started_at.is_some());
        assert!(run.complete());
        assert!(run.completed_at.is_some());
        assert!(!run.fail("late"));
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.error.is_none());
    }

    #[test]
    fn test_fail_from_queued() {
        let mut run = PipelineRun::new("p", None, Map::new());
        assert!(run.fail("Pipeline not found: p"));
        assert_eq!(run.error.as_deref(), Some("Pipeline not found: p"));
        assert!(run.steps.is_empty());
    }

    #[test]
    fn test_last_completed_step() {
        let mut run = PipelineRun::new("p", None, Map::new());
        run.push_step(StepRun::completed("a", &SkillResult::new(json!(1)), 5, 1));
        run.push_step(StepRun::failed("b", "boom", 5, 3));
        assert_eq!(run.last_completed_step(), Some("a"));
        assert_eq!(run.metering.by_model["unknown"].calls, 2);
    }

    #[test]
    fn test_serialization_is_camel_case() {
        let mut run = PipelineRun::new("p", None, Map::new());
        run.push_step(StepRun::completed("a", &SkillResult::new(json!("x")).with_usage(3, 0.1), 7, 1));
        let json = serde_json::to_value(&run).unwrap();
        assert_eq!(json["pipelineId"], "p");
        assert_eq!(json["steps"][0]["stepId"], "a");
        assert_eq!(json["steps"][0]["tokensUsed"], 3);
        assert_eq!(json["metering"]["totalTokens"], 3);
        let back: PipelineRun = serde_json::from_value(json).unwrap();
        assert_eq!(back.steps.len(), 1);
    }
}
