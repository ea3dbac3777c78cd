//! Background run lifecycle: queue, workers, cancellation and retention.

use super::jobs::{boxed, BoxedJob, StepEmitter};
use super::{AsyncRun, JobError, RetentionPolicy, RunFilter, RunHandle, RunStats};
use crate::cancellation::CancellationToken;
use crate::config::EngineConfig;
use crate::core::{RunEvent, RunStatus};
use crate::errors::RunError;
use crate::events::{EventSink, NoOpEventSink, RunEventHub, RunSubscription};
use crate::utils::now_utc;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct Job {
    run_id: String,
    execute: BoxedJob,
}

struct RunEntry {
    run: AsyncRun,
    token: Arc<CancellationToken>,
}

struct ManagerInner {
    runs: RwLock<HashMap<String, RunEntry>>,
    hub: Arc<RunEventHub>,
    sink: Arc<dyn EventSink>,
    policy: RetentionPolicy,
    skipped: AtomicU64,
    discarded: AtomicU64,
    evicted: AtomicU64,
}

impl ManagerInner {
    /// Publishes to the hub. Called with the run registry lock held so
    /// event order matches transition order.
    fn publish(&self, event: RunEvent) -> RunEvent {
        self.hub.publish(&event);
        event
    }

    /// Hands a published event to the extra sink. Must be called after the
    /// run registry lock is released.
    fn forward(&self, event: &RunEvent) {
        let sink = &self.sink;
        if let Err(e) = std::panic::catch_unwind(AssertUnwindSafe(|| sink.try_emit(event))) {
            warn!(run_id = %event.run_id, "Event sink panicked: {:?}", e);
        }
    }

    fn emit_step(&self, run_id: &str, data: Value) {
        let event = {
            let runs = self.runs.read();
            runs.get(run_id)
                .is_some_and(|entry| entry.run.status == RunStatus::Running)
                .then(|| self.publish(RunEvent::step(run_id, data)))
        };
        if let Some(event) = event {
            self.forward(&event);
        }
    }

    /// Moves a queued run to running. `None` means the job must not run.
    fn begin(&self, run_id: &str) -> Option<Arc<CancellationToken>> {
        let (token, event) = {
            let mut runs = self.runs.write();
            let Some(entry) = runs.get_mut(run_id) else {
                debug!(run_id, "Run evicted before start");
                return None;
            };
            if entry.run.status == RunStatus::Cancelled || entry.token.is_cancelled() {
                self.skipped.fetch_add(1, Ordering::Relaxed);
                info!(run_id, "Skipping cancelled run");
                return None;
            }
            if !entry.run.mark_running() {
                return None;
            }
            let event = self.publish(RunEvent::status(run_id, RunStatus::Running, None));
            info!(run_id, pipeline_id = %entry.run.pipeline_id, "Run started");
            (entry.token.clone(), event)
        };
        self.forward(&event);
        Some(token)
    }

    /// Writes the terminal status unless the run was cancelled meanwhile.
    fn finish(&self, run_id: &str, outcome: Result<Value, JobError>) {
        let event = {
            let mut runs = self.runs.write();
            let Some(entry) = runs.get_mut(run_id) else {
                warn!(run_id, "Run evicted before its result arrived");
                return;
            };
            if entry.run.is_terminal() {
                self.discarded.fetch_add(1, Ordering::Relaxed);
                info!(run_id, status = %entry.run.status, "Discarding late result");
                return;
            }
            match outcome {
                Ok(result) => {
                    entry.run.mark_completed(result.clone());
                    info!(run_id, "Run completed");
                    self.publish(RunEvent::complete(run_id, Some(result)))
                }
                Err(err) => {
                    entry.run.mark_failed(err.message.clone(), err.result);
                    warn!(run_id, error = %err.message, "Run failed");
                    self.publish(RunEvent::error(run_id, &err.message))
                }
            }
        };
        self.forward(&event);
    }

    async fn run_job(self: &Arc<Self>, job: Job) {
        let Job { run_id, execute } = job;
        let Some(token) = self.begin(&run_id) else {
            return;
        };

        let weak = Arc::downgrade(self);
        let emitter: StepEmitter = Arc::new(move |id: &str, data: Value| {
            if let Some(inner) = weak.upgrade() {
                inner.emit_step(id, data);
            }
        });
        let handle = RunHandle::new(run_id.clone(), token, emitter);

        let outcome = AssertUnwindSafe(async move { execute(handle).await })
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(JobError::new(format!(
                    "Job panicked: {}",
                    panic_message(&*panic)
                )))
            });

        self.finish(&run_id, outcome);
        self.sweep();
    }

    fn sweep(&self) -> Vec<String> {
        let mut runs = self.runs.write();
        let evicted = self
            .policy
            .select_evictions(runs.values().map(|entry| &entry.run), now_utc());
        for id in &evicted {
            runs.remove(id);
            self.hub.remove(id);
        }
        drop(runs);
        if !evicted.is_empty() {
            self.evicted
                .fetch_add(u64::try_from(evicted.len()).unwrap_or(u64::MAX), Ordering::Relaxed);
            debug!(count = evicted.len(), "Evicted finished runs");
        }
        evicted
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Tracks background runs and drains them on a worker pool.
///
/// Every run moves `queued → running → {completed | failed | cancelled}`
/// and never back. Jobs never run inline in [`enqueue`](Self::enqueue): a
/// bounded queue hands them to `worker_count` tokio tasks. Cancellation is
/// cooperative: it flips the status immediately, trips the run's token, and
/// causes any result the job still produces to be discarded.
///
/// Must be created inside a tokio runtime.
pub struct AsyncRunManager {
    inner: Arc<ManagerInner>,
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for AsyncRunManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncRunManager")
            .field("runs", &self.inner.runs.read().len())
            .field("policy", &self.inner.policy)
            .field("workers", &self.workers.lock().len())
            .finish()
    }
}

impl AsyncRunManager {
    /// Creates a manager whose events only reach its own hub.
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_sink(config, Arc::new(NoOpEventSink))
    }

    /// Creates a manager that also forwards every event to `sink`.
    ///
    /// The sink is called after the run registry lock is released, so it may
    /// call back into the manager. Events of one run reach the sink in
    /// transition order unless a cancellation races the worker.
    #[must_use]
    pub fn with_sink(config: &EngineConfig, sink: Arc<dyn EventSink>) -> Self {
        let inner = Arc::new(ManagerInner {
            runs: RwLock::new(HashMap::new()),
            hub: Arc::new(RunEventHub::new(config.event_buffer)),
            sink,
            policy: config.retention_policy(),
            skipped: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        });

        let (sender, receiver) = mpsc::channel::<Job>(config.queue_capacity.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let workers = (0..config.worker_count.max(1))
            .map(|worker| {
                let inner = inner.clone();
                let receiver = receiver.clone();
                tokio::spawn(async move {
                    loop {
                        let job = receiver.lock().await.recv().await;
                        let Some(job) = job else {
                            break;
                        };
                        inner.run_job(job).await;
                    }
                    debug!(worker, "Run worker stopped");
                })
            })
            .collect();

        let sweeper = spawn_sweeper(Arc::downgrade(&inner), config.sweep_interval());
        info!(
            workers = config.worker_count.max(1),
            queue_capacity = config.queue_capacity,
            "Run manager started"
        );

        Self {
            inner,
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            sweeper: Mutex::new(Some(sweeper)),
        }
    }

    /// The hub subscribers read from.
    #[must_use]
    pub fn hub(&self) -> &Arc<RunEventHub> {
        &self.inner.hub
    }

    /// Registers a queued run and schedules `execute_fn` on the worker pool.
    ///
    /// Returns the queued record immediately; execution proceeds in the
    /// background. Waits only when the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::QueueClosed`] after [`shutdown`](Self::shutdown).
    pub async fn enqueue<F, Fut>(
        &self,
        pipeline_id: impl Into<String>,
        brand_id: Option<String>,
        execute_fn: F,
    ) -> Result<AsyncRun, RunError>
    where
        F: FnOnce(RunHandle) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, JobError>> + Send + 'static,
    {
        let sender = self.sender.lock().clone();
        let Some(sender) = sender else {
            return Err(RunError::QueueClosed);
        };

        let run = AsyncRun::new(pipeline_id, brand_id);
        let run_id = run.id.clone();
        let queued = {
            let mut runs = self.inner.runs.write();
            runs.insert(
                run_id.clone(),
                RunEntry {
                    run: run.clone(),
                    token: Arc::new(CancellationToken::new()),
                },
            );
            self.inner
                .publish(RunEvent::status(&run_id, RunStatus::Queued, None))
        };
        self.inner.forward(&queued);
        info!(run_id = %run_id, pipeline_id = %run.pipeline_id, "Run queued");

        let job = Job {
            run_id: run_id.clone(),
            execute: boxed(execute_fn),
        };
        if sender.send(job).await.is_err() {
            let event = {
                let mut runs = self.inner.runs.write();
                runs.get_mut(&run_id).map(|entry| {
                    entry.run.mark_failed(RunError::QueueClosed.to_string(), None);
                    self.inner
                        .publish(RunEvent::error(&run_id, &RunError::QueueClosed.to_string()))
                })
            };
            if let Some(event) = event {
                self.inner.forward(&event);
            }
            return Err(RunError::QueueClosed);
        }
        Ok(run)
    }

    /// A snapshot of one run.
    #[must_use]
    pub fn get(&self, run_id: &str) -> Option<AsyncRun> {
        self.inner.runs.read().get(run_id).map(|e| e.run.clone())
    }

    /// Runs matching `filter`, newest first.
    #[must_use]
    pub fn list(&self, filter: &RunFilter) -> Vec<AsyncRun> {
        let mut runs: Vec<AsyncRun> = self
            .inner
            .runs
            .read()
            .values()
            .filter(|e| filter.matches(&e.run))
            .map(|e| e.run.clone())
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        if let Some(limit) = filter.limit {
            runs.truncate(limit);
        }
        runs
    }

    /// Cancels a queued or running run.
    ///
    /// # Errors
    ///
    /// [`RunError::NotFound`] for unknown ids and
    /// [`RunError::AlreadyTerminal`] when the run already finished; the run
    /// is left untouched in both cases.
    pub fn cancel(&self, run_id: &str, reason: impl Into<String>) -> Result<AsyncRun, RunError> {
        let reason = reason.into();
        let (snapshot, event) = {
            let mut runs = self.inner.runs.write();
            let entry = runs
                .get_mut(run_id)
                .ok_or_else(|| RunError::NotFound(run_id.to_string()))?;
            if entry.run.is_terminal() {
                return Err(RunError::AlreadyTerminal {
                    id: run_id.to_string(),
                    status: entry.run.status,
                });
            }
            entry.run.mark_cancelled(reason.clone());
            entry.token.cancel(reason.clone());
            let event = self.inner.publish(RunEvent::status(
                run_id,
                RunStatus::Cancelled,
                Some(&reason),
            ));
            (entry.run.clone(), event)
        };
        self.inner.forward(&event);
        info!(run_id, reason = %reason, "Run cancelled");
        self.inner.sweep();
        Ok(snapshot)
    }

    /// Subscribes to a run's events.
    ///
    /// Buffered events are replayed first. When the run already finished and
    /// its buffer is gone, the subscription yields one synthesized terminal
    /// event.
    ///
    /// # Errors
    ///
    /// [`RunError::NotFound`] for unknown or evicted runs.
    pub fn subscribe(&self, run_id: &str) -> Result<RunSubscription, RunError> {
        let runs = self.inner.runs.read();
        let entry = runs
            .get(run_id)
            .ok_or_else(|| RunError::NotFound(run_id.to_string()))?;
        if entry.run.is_terminal() && !self.inner.hub.has_terminal(run_id) {
            let synthetic = entry.run.terminal_event().map(RunEvent::into_synthetic);
            return Ok(RunSubscription::from_events(synthetic));
        }
        Ok(self.inner.hub.subscribe(run_id))
    }

    /// Waits until a run is terminal and returns it.
    ///
    /// # Errors
    ///
    /// [`RunError::NotFound`] for unknown runs, [`RunError::Timeout`] when
    /// `timeout` elapses first.
    pub async fn wait(&self, run_id: &str, timeout: Duration) -> Result<AsyncRun, RunError> {
        let mut subscription = self.subscribe(run_id)?;
        let drain = async {
            while let Some(event) = subscription.next().await {
                if event.is_terminal() {
                    break;
                }
            }
        };
        tokio::time::timeout(timeout, drain)
            .await
            .map_err(|_| RunError::Timeout(run_id.to_string()))?;
        self.get(run_id)
            .ok_or_else(|| RunError::NotFound(run_id.to_string()))
    }

    /// Applies the retention policy now. Returns the evicted ids.
    pub fn sweep(&self) -> Vec<String> {
        self.inner.sweep()
    }

    /// Per-status counts and lifetime counters.
    #[must_use]
    pub fn stats(&self) -> RunStats {
        let mut stats = RunStats::default();
        for entry in self.inner.runs.read().values() {
            stats.count(entry.run.status);
        }
        stats.skipped = self.inner.skipped.load(Ordering::Relaxed);
        stats.discarded = self.inner.discarded.load(Ordering::Relaxed);
        stats.evicted = self.inner.evicted.load(Ordering::Relaxed);
        stats
    }

    /// Stops accepting jobs, lets workers drain the queue, and waits for them.
    pub async fn shutdown(&self) {
        self.sender.lock().take();
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.abort();
        }
        let workers: Vec<_> = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Run worker ended abnormally");
            }
        }
        info!("Run manager stopped");
    }
}

impl Drop for AsyncRunManager {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.abort();
        }
    }
}

fn spawn_sweeper(inner: Weak<ManagerInner>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            interval.tick().await;
            let Some(inner) = inner.upgrade() else {
                break;
            };
            inner.sweep();
        }
    })
}
