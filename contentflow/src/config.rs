//! Engine and run manager configuration.

use crate::pipeline::{BackoffConfig, JitterStrategy};
use crate::runs::RetentionPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Prefix of the environment variables read by [`EngineConfig::from_env`].
pub const ENV_PREFIX: &str = "CONTENTFLOW_";

/// Tunables for the pipeline engine and the async run manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of worker tasks draining the run queue.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Jobs the queue holds before `enqueue` waits.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Seconds a finished run is kept.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    /// Most runs tracked at once.
    #[serde(default = "default_max_runs")]
    pub max_runs: usize,
    /// Seconds between background retention sweeps.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Events buffered per run for late subscribers.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    /// Retry backoff base.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Retry backoff cap.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Retry jitter.
    #[serde(default)]
    pub jitter: JitterStrategy,
    /// Directory of pipeline definitions loaded at startup.
    #[serde(default)]
    pub pipelines_dir: Option<PathBuf>,
}

fn default_worker_count() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    256
}

fn default_retention_secs() -> u64 {
    3600
}

fn default_max_runs() -> usize {
    500
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_event_buffer() -> usize {
    256
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            queue_capacity: default_queue_capacity(),
            retention_secs: default_retention_secs(),
            max_runs: default_max_runs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            event_buffer: default_event_buffer(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: JitterStrategy::default(),
            pipelines_dir: None,
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with `CONTENTFLOW_*` environment variables.
    ///
    /// Recognized: `WORKER_COUNT`, `QUEUE_CAPACITY`, `RETENTION_SECS`,
    /// `MAX_RUNS`, `SWEEP_INTERVAL_SECS`, `EVENT_BUFFER`, `BASE_DELAY_MS`,
    /// `MAX_DELAY_MS`, `JITTER` (`none`, `full`, `equal`), `PIPELINES_DIR`.
    /// Unparsable values are logged and ignored.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));
        let mut config = Self::default();

        overlay(&var, "WORKER_COUNT", &mut config.worker_count);
        overlay(&var, "QUEUE_CAPACITY", &mut config.queue_capacity);
        overlay(&var, "RETENTION_SECS", &mut config.retention_secs);
        overlay(&var, "MAX_RUNS", &mut config.max_runs);
        overlay(&var, "SWEEP_INTERVAL_SECS", &mut config.sweep_interval_secs);
        overlay(&var, "EVENT_BUFFER", &mut config.event_buffer);
        overlay(&var, "BASE_DELAY_MS", &mut config.base_delay_ms);
        overlay(&var, "MAX_DELAY_MS", &mut config.max_delay_ms);

        if let Some(raw) = var("JITTER") {
            match serde_json::from_value(serde_json::Value::String(raw.to_lowercase())) {
                Ok(jitter) => config.jitter = jitter,
                Err(_) => warn!(variable = "JITTER", value = %raw, "Ignoring invalid setting"),
            }
        }
        if let Some(dir) = var("PIPELINES_DIR").filter(|d| !d.is_empty()) {
            config.pipelines_dir = Some(PathBuf::from(dir));
        }
        config
    }

    /// Sets the worker count.
    #[must_use]
    pub fn with_worker_count(mut self, workers: usize) -> Self {
        self.worker_count = workers;
        self
    }

    /// Sets the queue capacity.
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the retention window.
    #[must_use]
    pub fn with_retention_secs(mut self, secs: u64) -> Self {
        self.retention_secs = secs;
        self
    }

    /// Sets the tracked-run cap.
    #[must_use]
    pub fn with_max_runs(mut self, max_runs: usize) -> Self {
        self.max_runs = max_runs;
        self
    }

    /// Sets the sweep interval.
    #[must_use]
    pub fn with_sweep_interval_secs(mut self, secs: u64) -> Self {
        self.sweep_interval_secs = secs;
        self
    }

    /// Sets the per-run event buffer.
    #[must_use]
    pub fn with_event_buffer(mut self, events: usize) -> Self {
        self.event_buffer = events;
        self
    }

    /// Sets the backoff base and cap.
    #[must_use]
    pub fn with_backoff(mut self, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Sets the definitions directory.
    #[must_use]
    pub fn with_pipelines_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.pipelines_dir = Some(dir.into());
        self
    }

    /// The retention policy.
    #[must_use]
    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy::new(Duration::from_secs(self.retention_secs), self.max_runs)
    }

    /// The sweep interval, at least one second.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    /// The retry backoff parameters.
    #[must_use]
    pub fn backoff(&self) -> BackoffConfig {
        BackoffConfig::default()
            .with_base_delay_ms(self.base_delay_ms)
            .with_max_delay_ms(self.max_delay_ms)
            .with_jitter(self.jitter)
    }
}

fn overlay<T, F>(var: &F, name: &str, target: &mut T)
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = var(name) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *target = value,
        Err(_) => warn!(variable = name, value = %raw, "Ignoring invalid setting"),
    }
}
