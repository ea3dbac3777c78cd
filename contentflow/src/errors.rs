//! Error types for the contentflow engine.
//!
//! Errors fall into three groups:
//!
//! - **Fatal**: pipeline not found, skill not found, missing required input.
//!   These terminate a run immediately and are never retried.
//! - **Retryable**: a skill's own execution failure, retried per step policy.
//! - **Lifecycle**: async run manager errors surfaced to callers
//!   (unknown run, cancelling a finished run, closed queue).
//!
//! Soft failures (unresolved templates, malformed conditions) are not errors
//! and never appear here.

use crate::core::RunStatus;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// The main error type for pipeline execution.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The requested pipeline is not registered.
    #[error("Pipeline not found: {0}")]
    PipelineNotFound(String),

    /// A step references a skill that is not registered.
    #[error("Skill not found: {0}")]
    SkillNotFound(String),

    /// A required pipeline input was neither supplied nor defaulted.
    #[error("Missing required input: {0}")]
    MissingInput(String),

    /// A step exhausted its retries.
    #[error("Step '{step}' failed: {message}")]
    StepFailed {
        /// The step id (with fan-out suffix when applicable).
        step: String,
        /// The last error reported by the skill.
        message: String,
    },

    /// A variable was bound twice without explicit shadowing.
    #[error("{0}")]
    DataConflict(#[from] DataConflictError),

    /// A pipeline definition could not be loaded.
    #[error("{0}")]
    Definition(#[from] DefinitionError),
}

impl EngineError {
    /// Creates a step failure error.
    #[must_use]
    pub fn step_failed(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StepFailed {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Returns true if the error terminates a run without any retry.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::StepFailed { .. })
    }

    /// Returns a stable machine-readable code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::PipelineNotFound(_) => "PIPELINE_NOT_FOUND",
            Self::SkillNotFound(_) => "SKILL_NOT_FOUND",
            Self::MissingInput(_) => "MISSING_INPUT",
            Self::StepFailed { .. } => "STEP_FAILED",
            Self::DataConflict(_) => "DATA_CONFLICT",
            Self::Definition(_) => "INVALID_DEFINITION",
        }
    }
}

/// Error raised when binding a scope key that already exists.
#[derive(Debug, Clone, Error)]
#[error("Data conflict: variable '{key}' is already bound")]
pub struct DataConflictError {
    /// The conflicting key.
    pub key: String,
}

impl DataConflictError {
    /// Creates a new data conflict error.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

/// Errors reported by skills.
#[derive(Debug, Clone, Error)]
pub enum SkillError {
    /// The skill ran and failed.
    #[error("{0}")]
    Failed(String),

    /// The skill rejected one of its inputs.
    #[error("Invalid input '{field}': {reason}")]
    InvalidInput {
        /// The offending input name.
        field: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A collaborator service the skill requires was not provided.
    #[error("Missing service: {0}")]
    MissingService(String),
}

impl SkillError {
    /// Creates a generic failure.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Creates an invalid input error.
    #[must_use]
    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while loading or validating pipeline definitions.
#[derive(Debug, Error)]
pub enum DefinitionError {
    /// The definition file could not be read.
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        /// The file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The definition file could not be parsed.
    #[error("Failed to parse {}: {message}", path.display())]
    Parse {
        /// The file path.
        path: PathBuf,
        /// The parser message.
        message: String,
    },

    /// The file extension is not a supported definition format.
    #[error("Unsupported definition format: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    /// The definition parsed but is structurally invalid.
    #[error("Invalid pipeline '{id}': {message}")]
    Invalid {
        /// The pipeline id.
        id: String,
        /// What is wrong with it.
        message: String,
    },

    /// Reload was requested for a pipeline registered without a source file.
    #[error("Pipeline '{0}' was not loaded from a file")]
    NotReloadable(String),

    /// Reload was requested for an unknown pipeline.
    #[error("Pipeline not found: {0}")]
    NotFound(String),
}

impl DefinitionError {
    /// Creates an invalid definition error.
    #[must_use]
    pub fn invalid(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            id: id.into(),
            message: message.into(),
        }
    }
}

/// Errors returned by the async run manager.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    /// No run with this id is tracked.
    #[error("Run not found: {0}")]
    NotFound(String),

    /// The run already reached a terminal status.
    #[error("Run already {status}")]
    AlreadyTerminal {
        /// The run id.
        id: String,
        /// The terminal status it holds.
        status: RunStatus,
    },

    /// The work queue no longer accepts jobs.
    #[error("Run queue is closed")]
    QueueClosed,

    /// Waiting for the run timed out.
    #[error("Timed out waiting for run {0}")]
    Timeout(String),
}

impl RunError {
    /// Returns the HTTP-equivalent status code for the error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::AlreadyTerminal { .. } => 409,
            Self::QueueClosed => 503,
            Self::Timeout(_) => 504,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(EngineError::PipelineNotFound("p".into()).is_fatal());
        assert!(EngineError::SkillNotFound("s".into()).is_fatal());
        assert!(EngineError::MissingInput("text".into()).is_fatal());
        assert!(!EngineError::step_failed("step1", "boom").is_fatal());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            EngineError::PipelineNotFound("missing".into()).to_string(),
            "Pipeline not found: missing"
        );
        assert_eq!(
            EngineError::step_failed("draft[1]", "timeout").to_string(),
            "Step 'draft[1]' failed: timeout"
        );
    }

    #[test]
    fn test_already_terminal_message() {
        let err = RunError::AlreadyTerminal {
            id: "r1".into(),
            status: RunStatus::Completed,
        };
        assert_eq!(err.to_string(), "Run already completed");
        assert_eq!(err.status_code(), 409);
    }

    #[test]
    fn test_data_conflict_converts() {
        let err: EngineError = DataConflictError::new("inputs.text").into();
        assert_eq!(err.code(), "DATA_CONFLICT");
        assert!(err.to_string().contains("inputs.text"));
    }

    #[test]
    fn test_skill_error_helpers() {
        let err = SkillError::invalid_input("topic", "must not be empty");
        assert_eq!(err.to_string(), "Invalid input 'topic': must not be empty");
    }
}
