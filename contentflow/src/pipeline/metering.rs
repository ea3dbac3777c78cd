//! Resource usage aggregation for a run.

use super::StepRun;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key used for steps whose skill reports no model.
pub const UNKNOWN_MODEL: &str = "unknown";

/// Usage attributed to one model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelUsage {
    /// Tokens consumed.
    pub tokens: u64,
    /// Cost units.
    pub cost_units: f64,
    /// Step invocations attributed.
    pub calls: u64,
    /// Summed step duration.
    pub duration_ms: u64,
}

/// Aggregate usage of a pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metering {
    /// Total tokens across all steps.
    pub total_tokens: u64,
    /// Total cost units across all steps.
    pub total_cost_units: f64,
    /// Summed step durations.
    pub total_duration_ms: u64,
    /// Breakdown by reported model.
    pub by_model: BTreeMap<String, ModelUsage>,
}

impl Metering {
    /// Creates empty metering.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one step run.
    pub fn record(&mut self, step: &StepRun) {
        self.total_tokens = self.total_tokens.saturating_add(step.tokens_used);
        self.total_cost_units += step.cost_units;
        self.total_duration_ms = self.total_duration_ms.saturating_add(step.duration_ms);

        let model = step.model_used.as_deref().unwrap_or(UNKNOWN_MODEL);
        let usage = self.by_model.entry(model.to_string()).or_default();
        usage.tokens = usage.tokens.saturating_add(step.tokens_used);
        usage.cost_units += step.cost_units;
        usage.calls += 1;
        usage.duration_ms = usage.duration_ms.saturating_add(step.duration_ms);
    }
}
