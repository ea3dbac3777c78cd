//! Run event type streamed to subscribers.

use super::RunStatus;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of a run event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunEventKind {
    /// A lifecycle status transition.
    Status,
    /// A step finished (completed or failed).
    Step,
    /// The run completed with a result.
    Complete,
    /// The run failed.
    Error,
}

impl fmt::Display for RunEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status => write!(f, "status"),
            Self::Step => write!(f, "step"),
            Self::Complete => write!(f, "complete"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// An event addressed to a single run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunEvent {
    /// The run this event belongs to.
    pub run_id: String,

    /// The event kind.
    #[serde(rename = "type")]
    pub kind: RunEventKind,

    /// When the event occurred (ISO 8601).
    pub timestamp: String,

    /// The event payload.
    #[serde(default)]
    pub data: serde_json::Value,

    /// Set on events synthesized for late subscribers.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub synthetic: bool,
}

impl RunEvent {
    /// Creates a new run event.
    #[must_use]
    pub fn new(run_id: impl Into<String>, kind: RunEventKind, data: serde_json::Value) -> Self {
        Self {
            run_id: run_id.into(),
            kind,
            timestamp: crate::utils::iso_timestamp(),
            data,
            synthetic: false,
        }
    }

    /// Creates a `status` event.
    #[must_use]
    pub fn status(run_id: impl Into<String>, status: RunStatus, reason: Option<&str>) -> Self {
        let mut data = serde_json::json!({ "status": status });
        if let Some(reason) = reason {
            data["reason"] = serde_json::json!(reason);
        }
        Self::new(run_id, RunEventKind::Status, data)
    }

    /// Creates a `step` event from a serialized step record.
    #[must_use]
    pub fn step(run_id: impl Into<String>, step: serde_json::Value) -> Self {
        Self::new(run_id, RunEventKind::Step, step)
    }

    /// Creates a `complete` event.
    #[must_use]
    pub fn complete(run_id: impl Into<String>, result: Option<serde_json::Value>) -> Self {
        Self::new(
            run_id,
            RunEventKind::Complete,
            serde_json::json!({ "status": RunStatus::Completed, "result": result }),
        )
    }

    /// Creates an `error` event.
    #[must_use]
    pub fn error(run_id: impl Into<String>, message: &str) -> Self {
        Self::new(
            run_id,
            RunEventKind::Error,
            serde_json::json!({ "status": RunStatus::Failed, "error": message }),
        )
    }

    /// Marks the event as synthesized rather than observed.
    #[must_use]
    pub fn into_synthetic(mut self) -> Self {
        self.synthetic = true;
        self
    }

    /// Returns true if no further events follow this one.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        match self.kind {
            RunEventKind::Complete | RunEventKind::Error => true,
            RunEventKind::Step => false,
            RunEventKind::Status => self
                .data
                .get("status")
                .and_then(|s| serde_json::from_value::<RunStatus>(s.clone()).ok())
                .is_some_and(|s| s.is_terminal()),
        }
    }

    /// Renders the event as a server-sent event frame.
    #[must_use]
    pub fn to_sse(&self) -> String {
        let payload = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        format!("event: {}\nid: {}\ndata: {}\n\n", self.kind, self.run_id, payload)
    }
}
