//! Core domain types shared across the engine and the run manager.
//!
//! - Run status with monotonic transition rules
//! - Run events streamed to subscribers

mod event;
mod status;

pub use event::{RunEvent, RunEventKind};
pub use status::RunStatus;
