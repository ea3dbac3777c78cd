//! Assertions over pipeline runs.

use crate::core::RunStatus;
use crate::pipeline::PipelineRun;

/// Asserts that the run completed.
pub fn assert_run_completed(run: &PipelineRun) {
    assert_eq!(
        run.status,
        RunStatus::Completed,
        "Expected completed run, got {} (error: {:?})",
        run.status,
        run.error
    );
}

/// Asserts that the run failed with an error containing `needle`.
pub fn assert_run_failed_with(run: &PipelineRun, needle: &str) {
    assert_eq!(run.status, RunStatus::Failed, "Expected failed run, got {}", run.status);
    let error = run.error.as_deref().unwrap_or_default();
    assert!(
        error.contains(needle),
        "Expected error containing '{needle}', got '{error}'"
    );
}

/// Asserts the ids of the recorded steps, in order.
pub fn assert_step_ids(run: &PipelineRun, expected: &[&str]) {
    let ids: Vec<&str> = run.steps.iter().map(|s| s.step_id.as_str()).collect();
    assert_eq!(ids, expected, "Unexpected step ids");
}

/// Asserts that every recorded step completed.
pub fn assert_all_steps_completed(run: &PipelineRun) {
    for step in &run.steps {
        assert!(
            step.is_completed(),
            "Expected step '{}' to complete, got {} (error: {:?})",
            step.step_id,
            step.status,
            step.error
        );
    }
}

/// Asserts how many attempts a recorded step took.
pub fn assert_step_attempts(run: &PipelineRun, step_id: &str, expected: u32) {
    let step = run
        .steps
        .iter()
        .find(|s| s.step_id == step_id)
        .unwrap_or_else(|| panic!("No step '{step_id}' in run"));
    assert_eq!(
        step.attempts, expected,
        "Step '{step_id}' took {} attempts, expected {expected}",
        step.attempts
    );
}
