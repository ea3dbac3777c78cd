//! Pipeline engine: runs a registered pipeline end to end.

use super::executor::{RunContext, StepExecutor, StepOutcome};
use super::matcher::PipelineMatcher;
use super::retry::BackoffConfig;
use super::{PipelineRun, StepRun};
use crate::cancellation::CancellationToken;
use crate::config::EngineConfig;
use crate::definition::{LoadEvent, PipelineDefinition, PipelineRegistry};
use crate::errors::EngineError;
use crate::observability::pipeline_span;
use crate::scope::VariableScope;
use crate::skills::{BrandProfile, Services, SkillRegistry};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn, Instrument};

/// Callback observing each step record right after it is appended.
pub type StepCallback = Arc<dyn Fn(&StepRun) + Send + Sync>;

/// Everything needed to execute one pipeline.
#[derive(Clone, Default)]
pub struct ExecutionRequest {
    /// The pipeline to run.
    pub pipeline_id: String,
    /// The tenant brand id.
    pub brand_id: Option<String>,
    /// Caller inputs, bound as `inputs.*`.
    pub inputs: Map<String, Value>,
    /// Brand profile, bound as `brand.*` and passed to skills.
    pub brand: Option<Arc<BrandProfile>>,
    /// Collaborator services passed to skills.
    pub services: Arc<Services>,
    /// Run id to use instead of a generated one.
    pub run_id: Option<String>,
    /// Progress observer.
    pub on_step_complete: Option<StepCallback>,
    /// Checked between steps; a tripped token cancels the run.
    pub cancellation: Option<Arc<CancellationToken>>,
}

impl fmt::Debug for ExecutionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionRequest")
            .field("pipeline_id", &self.pipeline_id)
            .field("brand_id", &self.brand_id)
            .field("inputs", &self.inputs)
            .field("run_id", &self.run_id)
            .field("has_callback", &self.on_step_complete.is_some())
            .finish_non_exhaustive()
    }
}

impl ExecutionRequest {
    /// Creates a request for a pipeline.
    #[must_use]
    pub fn new(pipeline_id: impl Into<String>) -> Self {
        Self {
            pipeline_id: pipeline_id.into(),
            ..Self::default()
        }
    }

    /// Replaces all inputs.
    #[must_use]
    pub fn with_inputs(mut self, inputs: Map<String, Value>) -> Self {
        self.inputs = inputs;
        self
    }

    /// Adds one input.
    #[must_use]
    pub fn with_input(mut self, name: impl Into<String>, value: Value) -> Self {
        self.inputs.insert(name.into(), value);
        self
    }

    /// Sets the brand id.
    #[must_use]
    pub fn with_brand_id(mut self, brand_id: impl Into<String>) -> Self {
        self.brand_id = Some(brand_id.into());
        self
    }

    /// Sets the brand profile, and the brand id if not already set.
    #[must_use]
    pub fn with_brand(mut self, brand: BrandProfile) -> Self {
        if self.brand_id.is_none() {
            self.brand_id = Some(brand.id.clone());
        }
        self.brand = Some(Arc::new(brand));
        self
    }

    /// Sets the services.
    #[must_use]
    pub fn with_services(mut self, services: Services) -> Self {
        self.services = Arc::new(services);
        self
    }

    /// Fixes the run id.
    #[must_use]
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Registers a progress observer.
    #[must_use]
    pub fn on_step_complete<F>(mut self, callback: F) -> Self
    where
        F: Fn(&StepRun) + Send + Sync + 'static,
    {
        self.on_step_complete = Some(Arc::new(callback));
        self
    }

    /// Attaches a cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// Seeds a scope from input defaults, caller inputs, and the brand profile.
///
/// Inputs are bound both as flat `inputs.<name>` keys and as an `inputs`
/// object; the brand likewise as `brand.<field>` and `brand`.
///
/// # Errors
///
/// Returns [`EngineError::MissingInput`] when a required input has neither a
/// caller value nor a default.
pub fn build_scope(
    definition: &PipelineDefinition,
    inputs: &Map<String, Value>,
    brand: Option<&BrandProfile>,
) -> Result<VariableScope, EngineError> {
    let mut effective = Map::new();
    for (name, spec) in &definition.inputs {
        if let Some(default) = &spec.default {
            effective.insert(name.clone(), default.clone());
        }
    }
    for (name, value) in inputs {
        effective.insert(name.clone(), value.clone());
    }
    for (name, spec) in &definition.inputs {
        if spec.required && !effective.contains_key(name) {
            return Err(EngineError::MissingInput(name.clone()));
        }
    }

    let mut scope = VariableScope::new();
    for (name, value) in &effective {
        scope.insert(format!("inputs.{name}"), value.clone())?;
    }
    scope.insert("inputs", Value::Object(effective))?;

    if let Some(brand) = brand {
        let value = serde_json::to_value(brand).unwrap_or_default();
        if let Value::Object(fields) = &value {
            for (field, v) in fields {
                scope.insert(format!("brand.{field}"), v.clone())?;
            }
        }
        scope.insert("brand", value)?;
    }

    Ok(scope)
}

/// Executes pipelines from a definition registry against a skill registry.
#[derive(Debug, Clone)]
pub struct PipelineEngine {
    pipelines: Arc<PipelineRegistry>,
    skills: Arc<SkillRegistry>,
    executor: StepExecutor,
}

impl PipelineEngine {
    /// Creates an engine with default backoff.
    #[must_use]
    pub fn new(pipelines: Arc<PipelineRegistry>, skills: Arc<SkillRegistry>) -> Self {
        let executor = StepExecutor::new(skills.clone(), BackoffConfig::default());
        Self {
            pipelines,
            skills,
            executor,
        }
    }

    /// Creates an engine from configuration.
    ///
    /// Definitions are loaded from `pipelines_dir` when set; the returned
    /// events report each file loaded or rejected.
    #[must_use]
    pub fn from_config(config: &EngineConfig, skills: Arc<SkillRegistry>) -> (Self, Vec<LoadEvent>) {
        let pipelines = PipelineRegistry::new();
        let events = config
            .pipelines_dir
            .as_deref()
            .map(|dir| pipelines.load_dir(dir))
            .unwrap_or_default();
        let engine = Self::new(Arc::new(pipelines), skills).with_backoff(config.backoff());
        (engine, events)
    }

    /// Replaces the backoff parameters.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.executor = StepExecutor::new(self.skills.clone(), backoff);
        self
    }

    /// The definition registry.
    #[must_use]
    pub fn pipelines(&self) -> &Arc<PipelineRegistry> {
        &self.pipelines
    }

    /// The skill registry.
    #[must_use]
    pub fn skills(&self) -> &Arc<SkillRegistry> {
        &self.skills
    }

    /// A matcher over this engine's definitions.
    #[must_use]
    pub fn matcher(&self) -> PipelineMatcher {
        PipelineMatcher::new(self.pipelines.clone())
    }

    /// Executes a pipeline.
    ///
    /// Never returns an error: fatal conditions are recorded on the returned
    /// run as `status = failed` with a message.
    pub async fn execute(&self, request: ExecutionRequest) -> PipelineRun {
        let mut run = PipelineRun::new(
            request.pipeline_id.clone(),
            request.brand_id.clone(),
            request.inputs.clone(),
        );
        if let Some(id) = &request.run_id {
            run = run.with_id(id.clone());
        }
        let span = pipeline_span(&run.pipeline_id, &run.id);
        self.run_steps(run, request).instrument(span).await
    }

    async fn run_steps(&self, mut run: PipelineRun, request: ExecutionRequest) -> PipelineRun {
        let Some(definition) = self.pipelines.get(&request.pipeline_id) else {
            let err = EngineError::PipelineNotFound(request.pipeline_id.clone());
            error!(error = %err, "Pipeline run failed");
            run.fail(err.to_string());
            return run;
        };

        let mut scope = match build_scope(&definition, &request.inputs, request.brand.as_deref()) {
            Ok(scope) => scope,
            Err(err) => {
                error!(error = %err, "Pipeline run failed");
                run.fail(err.to_string());
                return run;
            }
        };

        let ctx = RunContext {
            run_id: run.id.clone(),
            brand: request.brand.clone(),
            services: request.services.clone(),
        };

        run.start();
        info!(steps = definition.steps.len(), "Pipeline run started");

        for step in &definition.steps {
            if let Some(token) = &request.cancellation {
                if token.is_cancelled() {
                    let reason = token.reason().unwrap_or_else(|| "cancelled".to_string());
                    info!(reason = %reason, "Pipeline run cancelled");
                    run.cancel(reason);
                    return run;
                }
            }

            match self.executor.execute(step, &scope, &ctx).await {
                StepOutcome::Skipped => {}
                StepOutcome::Completed { runs, binding } => {
                    for step_run in runs {
                        append_step(&mut run, step_run, request.on_step_complete.as_ref());
                    }
                    if let Some(name) = &step.output {
                        if scope.bind_output(name.clone(), binding.clone()).is_some() {
                            debug!(output = %name, step = %step.id, "Output shadows an earlier binding");
                        }
                        run.outputs.insert(name.clone(), binding);
                    }
                }
                StepOutcome::Failed { runs, error: err } => {
                    for step_run in runs {
                        append_step(&mut run, step_run, request.on_step_complete.as_ref());
                    }
                    error!(step = %step.id, error = %err, "Pipeline run failed");
                    run.fail(err.to_string());
                    return run;
                }
            }
        }

        run.complete();
        info!(
            steps = run.steps.len(),
            total_tokens = run.metering.total_tokens,
            "Pipeline run completed"
        );
        run
    }
}

fn append_step(run: &mut PipelineRun, step: StepRun, callback: Option<&StepCallback>) {
    run.push_step(step);
    let (Some(callback), Some(last)) = (callback, run.steps.last()) else {
        return;
    };
    if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(last))) {
        warn!(step = %last.step_id, "Step callback panicked: {:?}", e);
    }
}
