//! Per-run publish/subscribe channels with replay.

use super::EventSink;
use crate::core::RunEvent;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, Stream};
use std::collections::VecDeque;
use tokio::sync::broadcast;
use tracing::warn;

struct RunChannel {
    sender: broadcast::Sender<RunEvent>,
    history: VecDeque<RunEvent>,
}

impl RunChannel {
    fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            history: VecDeque::new(),
        }
    }
}

/// Event channels addressable by run id.
///
/// Each run keeps a bounded history so subscribers that connect late
/// receive everything published so far (up to the buffer size) followed by
/// live events. Publishing and subscribing take the same per-run lock, so a
/// subscriber never misses or duplicates an event at the seam.
pub struct RunEventHub {
    channels: DashMap<String, RunChannel>,
    buffer: usize,
}

impl std::fmt::Debug for RunEventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunEventHub")
            .field("runs", &self.channels.len())
            .field("buffer", &self.buffer)
            .finish()
    }
}

impl Default for RunEventHub {
    fn default() -> Self {
        Self::new(256)
    }
}

impl RunEventHub {
    /// Creates a hub keeping up to `buffer` events per run.
    #[must_use]
    pub fn new(buffer: usize) -> Self {
        Self {
            channels: DashMap::new(),
            buffer: buffer.max(1),
        }
    }

    /// Publishes an event to its run's channel.
    pub fn publish(&self, event: &RunEvent) {
        let mut channel = self
            .channels
            .entry(event.run_id.clone())
            .or_insert_with(|| RunChannel::new(self.buffer));
        if channel.history.len() >= self.buffer {
            channel.history.pop_front();
        }
        channel.history.push_back(event.clone());
        // No receivers is fine: the history still serves late subscribers.
        let _ = channel.sender.send(event.clone());
    }

    /// Subscribes to a run, replaying its buffered history first.
    #[must_use]
    pub fn subscribe(&self, run_id: &str) -> RunSubscription {
        let channel = self
            .channels
            .entry(run_id.to_string())
            .or_insert_with(|| RunChannel::new(self.buffer));
        RunSubscription {
            replay: channel.history.clone(),
            receiver: Some(channel.sender.subscribe()),
            done: false,
        }
    }

    /// Buffered events of a run.
    #[must_use]
    pub fn history(&self, run_id: &str) -> Vec<RunEvent> {
        self.channels
            .get(run_id)
            .map(|c| c.history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns true if the run's buffered history ends with a terminal event.
    #[must_use]
    pub fn has_terminal(&self, run_id: &str) -> bool {
        self.channels
            .get(run_id)
            .is_some_and(|c| c.history.back().is_some_and(RunEvent::is_terminal))
    }

    /// Drops a run's channel. Live subscribers see the stream end.
    pub fn remove(&self, run_id: &str) {
        self.channels.remove(run_id);
    }

    /// Number of runs with a channel.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Returns true if no run has a channel.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[async_trait]
impl EventSink for RunEventHub {
    fn try_emit(&self, event: &RunEvent) {
        self.publish(event);
    }
}

/// A subscriber's view of one run: replayed history, then live events.
///
/// The subscription ends after a terminal event.
#[derive(Debug)]
pub struct RunSubscription {
    replay: VecDeque<RunEvent>,
    receiver: Option<broadcast::Receiver<RunEvent>>,
    done: bool,
}

impl RunSubscription {
    /// A subscription that yields exactly `events` and then ends.
    #[must_use]
    pub fn from_events(events: impl IntoIterator<Item = RunEvent>) -> Self {
        Self {
            replay: events.into_iter().collect(),
            receiver: None,
            done: false,
        }
    }

    /// The next event, or `None` once the run is over.
    pub async fn next(&mut self) -> Option<RunEvent> {
        if self.done {
            return None;
        }
        if let Some(event) = self.replay.pop_front() {
            self.done = event.is_terminal();
            return Some(event);
        }
        let Some(receiver) = self.receiver.as_mut() else {
            self.done = true;
            return None;
        };
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    self.done = event.is_terminal();
                    return Some(event);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Run event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.done = true;
                    return None;
                }
            }
        }
    }

    /// Converts into a stream of events.
    pub fn into_stream(self) -> impl Stream<Item = RunEvent> + Send {
        stream::unfold(self, |mut sub| async move {
            let event = sub.next().await?;
            Some((event, sub))
        })
    }

    /// Converts into a stream of server-sent event frames.
    pub fn into_sse_stream(self) -> impl Stream<Item = String> + Send {
        use futures::StreamExt;
        self.into_stream().map(|event| event.to_sse())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{RunEventKind, RunStatus};
    use futures::StreamExt;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_late_subscriber_gets_replay_then_live() {
        let hub = RunEventHub::new(16);
        hub.publish(&RunEvent::status("r1", RunStatus::Queued, None));
        hub.publish(&RunEvent::status("r1", RunStatus::Running, None));

        let mut sub = hub.subscribe("r1");
        hub.publish(&RunEvent::step("r1", json!({ "stepId": "a" })));
        hub.publish(&RunEvent::complete("r1", Some(json!({ "ok": true }))));

        let kinds: Vec<_> = sub_kinds(&mut sub).await;
        assert_eq!(
            kinds,
            vec![
                RunEventKind::Status,
                RunEventKind::Status,
                RunEventKind::Step,
                RunEventKind::Complete
            ]
        );
        assert!(sub.next().await.is_none());
    }

    async fn sub_kinds(sub: &mut RunSubscription) -> Vec<RunEventKind> {
        let mut kinds = Vec::new();
        while let Ok(Some(event)) = tokio::time::timeout(Duration::from_secs(1), sub.next()).await {
            kinds.push(event.kind);
        }
        kinds
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let hub = RunEventHub::new(2);
        for i in 0..5 {
            hub.publish(&RunEvent::step("r1", json!({ "i": i })));
        }
        let history = hub.history("r1");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].data["i"], 3);
    }

    #[tokio::test]
    async fn test_runs_are_isolated() {
        let hub = RunEventHub::default();
        hub.publish(&RunEvent::error("a", "boom"));
        hub.publish(&RunEvent::complete("b", None));
        assert!(hub.has_terminal("a"));
        let events: Vec<_> = hub.subscribe("a").into_stream().collect().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, RunEventKind::Error);
    }

    #[tokio::test]
    async fn test_from_events_and_sse() {
        let sub = RunSubscription::from_events([RunEvent::complete("r", None).into_synthetic()]);
        let frames: Vec<_> = sub.into_sse_stream().collect().await;
        assert_eq!(frames.len(), 1);
        assert!(frames[0].starts_with("event: complete\n"));
        assert!(frames[0].contains("\"synthetic\":true"));
    }

    #[tokio::test]
    async fn test_remove_ends_live_subscription() {
        let hub = RunEventHub::default();
        let mut sub = hub.subscribe("r1");
        hub.remove("r1");
        let next = tokio::time::timeout(Duration::from_secs(1), sub.next()).await.unwrap();
        assert!(next.is_none());
    }
}
