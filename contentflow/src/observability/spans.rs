//! Spans wrapping pipeline and step execution.

use tracing::{info_span, Span};

/// The span covering one pipeline run.
#[must_use]
pub fn pipeline_span(pipeline_id: &str, run_id: &str) -> Span {
    info_span!("pipeline", pipeline_id = %pipeline_id, run_id = %run_id)
}

/// The span covering one step invocation, retries included.
#[must_use]
pub fn step_span(step_id: &str, skill: &str) -> Span {
    info_span!("step", step_id = %step_id, skill = %skill)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spans_can_be_entered() {
        let run = pipeline_span("blog", "r1");
        let _outer = run.enter();
        let step = step_span("draft[0]", "writer");
        let _inner = step.enter();
    }
}
