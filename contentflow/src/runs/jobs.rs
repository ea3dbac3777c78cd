//! Work items executed by the run manager.

use crate::cancellation::CancellationToken;
use crate::core::RunStatus;
use crate::pipeline::{ExecutionRequest, PipelineEngine, StepRun};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Publishes a `step` event for a run.
pub(crate) type StepEmitter = Arc<dyn Fn(&str, Value) + Send + Sync>;

/// A job's failure, optionally carrying a partial result.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct JobError {
    /// What went wrong.
    pub message: String,
    /// Whatever the job produced before failing.
    pub result: Option<Value>,
}

impl JobError {
    /// Creates an error without a result.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            result: None,
        }
    }

    /// Attaches a partial result.
    #[must_use]
    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }
}

impl From<String> for JobError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for JobError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// What a job receives when a worker starts it.
#[derive(Clone)]
pub struct RunHandle {
    run_id: String,
    token: Arc<CancellationToken>,
    emitter: StepEmitter,
}

impl fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunHandle")
            .field("run_id", &self.run_id)
            .field("cancelled", &self.token.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl RunHandle {
    pub(crate) fn new(run_id: String, token: Arc<CancellationToken>, emitter: StepEmitter) -> Self {
        Self {
            run_id,
            token,
            emitter,
        }
    }

    /// A handle not attached to any manager; step events go nowhere.
    #[must_use]
    pub fn detached(run_id: impl Into<String>) -> Self {
        Self::new(
            run_id.into(),
            Arc::new(CancellationToken::new()),
            Arc::new(|_: &str, _: Value| {}),
        )
    }

    /// The async run id.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// The run's cancellation token.
    #[must_use]
    pub fn token(&self) -> &Arc<CancellationToken> {
        &self.token
    }

    /// Returns true once the run was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Publishes a progress record as a `step` event.
    ///
    /// Dropped once the run is cancelled.
    pub fn emit_step<T: Serialize>(&self, step: &T) {
        if self.is_cancelled() {
            return;
        }
        match serde_json::to_value(step) {
            Ok(data) => (self.emitter)(&self.run_id, data),
            Err(e) => warn!(run_id = %self.run_id, error = %e, "Unserializable step event"),
        }
    }
}

/// A type-erased job.
pub(crate) type BoxedJob =
    Box<dyn FnOnce(RunHandle) -> BoxFuture<'static, Result<Value, JobError>> + Send>;

pub(crate) fn boxed<F, Fut>(execute_fn: F) -> BoxedJob
where
    F: FnOnce(RunHandle) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Value, JobError>> + Send + 'static,
{
    Box::new(move |handle| execute_fn(handle).boxed())
}

/// Builds a job that runs a pipeline on `engine`.
///
/// The pipeline run takes the async run's id and cancellation token, each
/// appended [`StepRun`] is forwarded as a `step` event, and the serialized
/// [`PipelineRun`](crate::pipeline::PipelineRun) becomes the job result. A
/// pipeline run that does not complete fails the job with its error message,
/// still carrying the run as the result.
pub fn engine_job(
    engine: PipelineEngine,
    request: ExecutionRequest,
) -> impl FnOnce(RunHandle) -> BoxFuture<'static, Result<Value, JobError>> + Send + 'static {
    move |handle: RunHandle| {
        async move {
            let progress = handle.clone();
            let request = request
                .with_run_id(handle.run_id())
                .with_cancellation(handle.token().clone())
                .on_step_complete(move |step: &StepRun| progress.emit_step(step));

            let run = engine.execute(request).await;
            let payload = serde_json::to_value(&run).map_err(|e| JobError::new(e.to_string()))?;
            match run.status {
                RunStatus::Completed => Ok(payload),
                status => {
                    let message = run
                        .error
                        .clone()
                        .unwrap_or_else(|| format!("Pipeline run {status}"));
                    Err(JobError::new(message).with_result(payload))
                }
            }
        }
        .boxed()
    }
}
