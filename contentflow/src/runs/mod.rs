//! Asynchronous run lifecycle.
//!
//! [`AsyncRunManager`] gives callers an immediate handle to work that runs
//! in the background:
//!
//! - queued runs drained by a worker pool
//! - cooperative cancellation with late results discarded
//! - retention by age and by count
//! - per-run event streams with replay

mod jobs;
mod manager;
mod record;
mod retention;

pub use jobs::{engine_job, JobError, RunHandle};
pub use manager::AsyncRunManager;
pub use record::{AsyncRun, RunFilter, RunStats};
pub use retention::RetentionPolicy;
