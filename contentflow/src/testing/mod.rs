//! Testing utilities for pipelines and skills.
//!
//! This module provides:
//! - Mock skills with scripted failures, latency and usage
//! - Sample definitions and ready-made engines
//! - Assertions over pipeline runs

mod assertions;
pub mod fixtures;
mod mocks;

pub use assertions::{
    assert_all_steps_completed, assert_run_completed, assert_run_failed_with,
    assert_step_attempts, assert_step_ids,
};
pub use mocks::{EchoSkill, MockSkill};
