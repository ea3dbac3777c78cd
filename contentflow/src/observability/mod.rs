//! Logging setup and tracing spans.

mod logging;
mod spans;

pub use logging::{init_tracing, LogFormat, DEFAULT_FILTER};
pub use spans::{pipeline_span, step_span};
