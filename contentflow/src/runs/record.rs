//! Async run records, filters and counters.

use crate::core::{RunEvent, RunStatus};
use crate::utils::{generate_run_id, now_utc, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The API-facing handle of a background run.
///
/// Distinct from the [`PipelineRun`](crate::pipeline::PipelineRun) payload it
/// may carry in `result`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsyncRun {
    /// Run id.
    pub id: String,

    /// Lifecycle status.
    pub status: RunStatus,

    /// Pipeline (or quick action) being run.
    pub pipeline_id: String,

    /// Tenant brand.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand_id: Option<String>,

    /// When the run was enqueued.
    pub created_at: Timestamp,

    /// When a worker picked the run up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,

    /// When the run reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Timestamp>,

    /// Job result, usually a serialized pipeline run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Failure message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Why the run was cancelled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
}

impl AsyncRun {
    /// Creates a queued run with a fresh id.
    #[must_use]
    pub fn new(pipeline_id: impl Into<String>, brand_id: Option<String>) -> Self {
        Self {
            id: generate_run_id(),
            status: RunStatus::Queued,
            pipeline_id: pipeline_id.into(),
            brand_id,
            created_at: now_utc(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            cancel_reason: None,
        }
    }

    /// Returns true once the run can no longer change.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn transition(&mut self, next: RunStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        if next == RunStatus::Running {
            self.started_at = Some(now_utc());
        }
        if next.is_terminal() {
            self.completed_at = Some(now_utc());
        }
        true
    }

    pub(crate) fn mark_running(&mut self) -> bool {
        self.transition(RunStatus::Running)
    }

    pub(crate) fn mark_completed(&mut self, result: Value) -> bool {
        if !self.transition(RunStatus::Completed) {
            return false;
        }
        self.result = Some(result);
        true
    }

    pub(crate) fn mark_failed(&mut self, error: String, result: Option<Value>) -> bool {
        if !self.transition(RunStatus::Failed) {
            return false;
        }
        self.error = Some(error);
        self.result = result;
        true
    }

    pub(crate) fn mark_cancelled(&mut self, reason: String) -> bool {
        if !self.transition(RunStatus::Cancelled) {
            return false;
        }
        self.cancel_reason = Some(reason);
        true
    }

    /// The event announcing this run's terminal status, if it has one.
    #[must_use]
    pub fn terminal_event(&self) -> Option<RunEvent> {
        match self.status {
            RunStatus::Completed => Some(RunEvent::complete(&self.id, self.result.clone())),
            RunStatus::Failed => Some(RunEvent::error(
                &self.id,
                self.error.as_deref().unwrap_or("Run failed"),
            )),
            RunStatus::Cancelled => Some(RunEvent::status(
                &self.id,
                RunStatus::Cancelled,
                self.cancel_reason.as_deref(),
            )),
            RunStatus::Queued | RunStatus::Running => None,
        }
    }
}

/// Selects runs in [`AsyncRunManager::list`](super::AsyncRunManager::list).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunFilter {
    /// Only runs in this status.
    #[serde(default)]
    pub status: Option<RunStatus>,
    /// Only runs of this pipeline.
    #[serde(default)]
    pub pipeline_id: Option<String>,
    /// Only runs for this brand.
    #[serde(default)]
    pub brand_id: Option<String>,
    /// At most this many runs.
    #[serde(default)]
    pub limit: Option<usize>,
}

impl RunFilter {
    /// Matches everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts to a status.
    #[must_use]
    pub fn with_status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Restricts to a pipeline.
    #[must_use]
    pub fn with_pipeline(mut self, pipeline_id: impl Into<String>) -> Self {
        self.pipeline_id = Some(pipeline_id.into());
        self
    }

    /// Restricts to a brand.
    #[must_use]
    pub fn with_brand(mut self, brand_id: impl Into<String>) -> Self {
        self.brand_id = Some(brand_id.into());
        self
    }

    /// Caps the result count.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns true if `run` passes every set criterion.
    #[must_use]
    pub fn matches(&self, run: &AsyncRun) -> bool {
        self.status.map_or(true, |s| run.status == s)
            && self
                .pipeline_id
                .as_ref()
                .map_or(true, |p| &run.pipeline_id == p)
            && self
                .brand_id
                .as_ref()
                .map_or(true, |b| run.brand_id.as_ref() == Some(b))
    }
}

/// Counts of tracked runs plus lifetime counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    /// Tracked runs waiting for a worker.
    pub queued: usize,
    /// Tracked runs executing.
    pub running: usize,
    /// Tracked completed runs.
    pub completed: usize,
    /// Tracked failed runs.
    pub failed: usize,
    /// Tracked cancelled runs.
    pub cancelled: usize,
    /// Jobs never started because their run was cancelled first.
    pub skipped: u64,
    /// Job results dropped because their run was cancelled meanwhile.
    pub discarded: u64,
    /// Runs removed by retention.
    pub evicted: u64,
}

impl RunStats {
    /// Total tracked runs.
    #[must_use]
    pub fn total(&self) -> usize {
        self.queued + self.running + self.completed + self.failed + self.cancelled
    }

    pub(crate) fn count(&mut self, status: RunStatus) {
        match status {
            RunStatus::Queued => self.queued += 1,
            RunStatus::Running => self.running += 1,
            RunStatus::Completed => self.completed += 1,
            RunStatus::Failed => self.failed += 1,
            RunStatus::Cancelled => self.cancelled += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RunEventKind;
    use serde_json::json;

    #[test]
    fn test_lifecycle_sets_timestamps() {
        let mut run = AsyncRun::new("blog", Some("acme".into()));
        assert_eq!(run.status, RunStatus::Queued);
        assert!(run.started_at.is_none());

        assert!(run.mark_running());
        assert!(run.started_at.is_some());

        assert!(run.mark_completed(json!({ "ok": true })));
        assert!(run.completed_at.is_some());
        assert!(run.is_terminal());
    }

    #[test]
    fn test_terminal_runs_do_not_change() {
        let mut run = AsyncRun::new("blog", None);
        assert!(run.mark_cancelled("user request".into()));
        assert!(!run.mark_completed(json!(1)));
        assert!(!run.mark_failed("late".into(), None));
        assert_eq!(run.status, RunStatus::Cancelled);
        assert!(run.result.is_none());
        assert_eq!(run.cancel_reason.as_deref(), Some("user request"));
    }

    #[test]
    fn test_terminal_event() {
        let mut run = AsyncRun::new("blog", None);
        assert!(run.terminal_event().is_none());
        run.mark_failed("boom".into(), None);
        let event = run.terminal_event().unwrap();
        assert_eq!(event.kind, RunEventKind::Error);
        assert_eq!(event.data["error"], "boom");
    }

    #[test]
    fn test_filter_matches() {
        let mut run = AsyncRun::new("blog", Some("acme".into()));
        run.mark_running();

        assert!(RunFilter::new().matches(&run));
        assert!(RunFilter::new().with_status(RunStatus::Running).matches(&run));
        assert!(!RunFilter::new().with_status(RunStatus::Queued).matches(&run));
        assert!(RunFilter::new().with_pipeline("blog").with_brand("acme").matches(&run));
        assert!(!RunFilter::new().with_brand("other").matches(&run));
    }

    #[test]
    fn test_serialization_is_camel_case() {
        let run = AsyncRun::new("blog", None);
        let json = serde_json::to_value(&run).unwrap();
        assert_eq!(json["pipelineId"], "blog");
        assert_eq!(json["status"], "queued");
        assert!(json.get("createdAt").is_some());
        assert!(json.get("brandId").is_none());
    }
}
