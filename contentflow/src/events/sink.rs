//! Event sink trait and implementations.

use crate::core::{RunEvent, RunEventKind};
use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, Level};

/// Receives run events.
///
/// The run manager calls [`EventSink::try_emit`] from inside its state
/// transitions, so implementations must not block and must never panic.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event asynchronously.
    async fn emit(&self, event: RunEvent) {
        self.try_emit(&event);
    }

    /// Emits an event without blocking. Failures are logged and suppressed.
    fn try_emit(&self, event: &RunEvent);
}

/// Discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    fn try_emit(&self, _event: &RunEvent) {}
}

/// Mirrors run events into the `tracing` log.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::DEBUG }
    }
}

impl LoggingEventSink {
    /// Creates a sink logging at `level` (`INFO` or `DEBUG`).
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// A debug-level sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    /// An info-level sink.
    #[must_use]
    pub fn info() -> Self {
        Self::new(Level::INFO)
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    fn try_emit(&self, event: &RunEvent) {
        if self.level == Level::DEBUG {
            debug!(run_id = %event.run_id, kind = %event.kind, data = %event.data, "Run event");
        } else {
            info!(run_id = %event.run_id, kind = %event.kind, data = %event.data, "Run event");
        }
    }
}

/// Collects events in memory, for tests.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<RunEvent>>,
}

impl CollectingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All collected events.
    #[must_use]
    pub fn events(&self) -> Vec<RunEvent> {
        self.events.read().clone()
    }

    /// Events for one run.
    #[must_use]
    pub fn events_for(&self, run_id: &str) -> Vec<RunEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.run_id == run_id)
            .cloned()
            .collect()
    }

    /// Kinds of the events for one run, in order.
    #[must_use]
    pub fn kinds_for(&self, run_id: &str) -> Vec<RunEventKind> {
        self.events_for(run_id).iter().map(|e| e.kind).collect()
    }

    /// Number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Drops everything collected so far.
    pub fn clear(&self) {
        self.events.write().clear();
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    fn try_emit(&self, event: &RunEvent) {
        self.events.write().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RunStatus;

    #[tokio::test]
    async fn test_noop_and_logging_sinks() {
        let event = RunEvent::status("r1", RunStatus::Queued, None);
        NoOpEventSink.emit(event.clone()).await;
        LoggingEventSink::info().emit(event.clone()).await;
        LoggingEventSink::debug().try_emit(&event);
    }

    #[tokio::test]
    async fn test_collecting_sink() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        sink.emit(RunEvent::status("r1", RunStatus::Queued, None)).await;
        sink.try_emit(&RunEvent::status("r2", RunStatus::Queued, None));
        sink.try_emit(&RunEvent::complete("r1", None));

        assert_eq!(sink.len(), 3);
        assert_eq!(
            sink.kinds_for("r1"),
            vec![RunEventKind::Status, RunEventKind::Complete]
        );

        sink.clear();
        assert!(sink.is_empty());
    }
}
