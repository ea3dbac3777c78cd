//! End-to-end tests for pipeline execution.

#[cfg(test)]
mod tests {
    use crate::cancellation::CancellationToken;
    use crate::config::EngineConfig;
    use crate::core::RunStatus;
    use crate::definition::{InputSpec, LoadEvent, PipelineDefinition, PipelineStep};
    use crate::pipeline::{BackoffStrategy, ExecutionRequest, PipelineEngine, UNKNOWN_MODEL};
    use crate::skills::{BrandProfile, SkillRegistry};
    use crate::testing::fixtures::{chained_pipeline, engine_with, linear_pipeline, test_engine};
    use crate::testing::{
        assert_all_steps_completed, assert_run_completed, assert_run_failed_with,
        assert_step_attempts, assert_step_ids, EchoSkill, MockSkill,
    };
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_plain_pipeline_completes_every_step_in_order() {
        let engine = engine_with(
            vec![linear_pipeline("linear", "echo", 4)],
            SkillRegistry::new().with(EchoSkill::new("echo")),
        );

        let run = engine.execute(ExecutionRequest::new("linear")).await;

        assert_run_completed(&run);
        assert_step_ids(&run, &["step1", "step2", "step3", "step4"]);
        assert_all_steps_completed(&run);
        assert!(run.started_at.is_some() && run.completed_at.is_some());
        assert_eq!(run.outputs["out3"], json!({ "index": 3 }));
    }

    #[tokio::test]
    async fn test_chained_pipeline_end_to_end() {
        let run = test_engine()
            .execute(ExecutionRequest::new("test-chained").with_input("text", json!("chain test")))
            .await;

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.steps.len(), 2);
        assert_all_steps_completed(&run);
        assert_eq!(run.outputs["first_result"], json!({ "text": "chain test" }));
        assert_eq!(
            run.outputs["second_result"],
            json!({ "previous": { "text": "chain test" } })
        );
        assert_eq!(run.inputs["text"], json!("chain test"));
    }

    #[tokio::test]
    async fn test_false_condition_skips_without_blocking() {
        let skipped = MockSkill::new("second");
        let def = PipelineDefinition::new("cond", "Conditional")
            .with_input("skip_second", InputSpec::with_default(json!(false)))
            .with_step(PipelineStep::new("step1", "echo"))
            .with_step(PipelineStep::new("step2", "second").with_condition("!ctx.inputs.skip_second"))
            .with_step(
                PipelineStep::new("step3", "echo").with_condition(r#"ctx["inputs.skip_second"] === true"#),
            );
        let engine = engine_with(
            vec![def],
            SkillRegistry::new()
                .with(EchoSkill::new("echo"))
                .with(skipped.clone()),
        );

        let run = engine
            .execute(ExecutionRequest::new("cond").with_input("skip_second", json!(true)))
            .await;

        assert_run_completed(&run);
        assert_step_ids(&run, &["step1", "step3"]);
        assert_eq!(skipped.calls(), 0);

        // Default applies when the caller omits the input.
        let run = engine.execute(ExecutionRequest::new("cond")).await;
        assert_step_ids(&run, &["step1", "step2"]);
    }

    #[tokio::test]
    async fn test_malformed_condition_skips_step() {
        let def = PipelineDefinition::new("bad-cond", "Bad")
            .with_step(PipelineStep::new("a", "echo").with_condition("ctx.a ==="))
            .with_step(PipelineStep::new("b", "echo"));
        let engine = engine_with(vec![def], SkillRegistry::new().with(EchoSkill::new("echo")));

        let run = engine.execute(ExecutionRequest::new("bad-cond")).await;
        assert_run_completed(&run);
        assert_step_ids(&run, &["b"]);
    }

    #[tokio::test]
    async fn test_retry_then_success_counts_attempts() {
        let flaky = MockSkill::new("flaky").failing_times(2);
        let def = PipelineDefinition::new("retry", "Retry").with_step(
            PipelineStep::new("draft", "flaky").with_retry(3, BackoffStrategy::Exponential),
        );
        let engine = engine_with(vec![def], SkillRegistry::new().with(flaky.clone()));

        let run = engine.execute(ExecutionRequest::new("retry")).await;

        assert_run_completed(&run);
        assert_eq!(flaky.calls(), 3);
        assert_step_attempts(&run, "draft", 3);
        let attempts: Vec<u32> = flaky.recorded_contexts().iter().map(|c| c.attempt).collect();
        assert_eq!(attempts, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_fast() {
        let broken = MockSkill::new("broken").always_failing();
        let after = MockSkill::new("after");
        let def = PipelineDefinition::new("exhaust", "Exhaust")
            .with_step(PipelineStep::new("ok", "echo"))
            .with_step(PipelineStep::new("draft", "broken").with_retry(2, BackoffStrategy::Linear))
            .with_step(PipelineStep::new("publish", "after"));
        let engine = engine_with(
            vec![def],
            SkillRegistry::new()
                .with(EchoSkill::new("echo"))
                .with(broken.clone())
                .with(after.clone()),
        );

        let run = engine.execute(ExecutionRequest::new("exhaust")).await;

        assert_run_failed_with(&run, "Step 'draft' failed");
        assert_eq!(broken.calls(), 3);
        assert_eq!(after.calls(), 0);
        assert_step_ids(&run, &["ok", "draft"]);
        assert_eq!(run.steps[1].status, RunStatus::Failed);
        assert_step_attempts(&run, "draft", 3);
        assert_eq!(run.last_completed_step(), Some("ok"));
    }

    #[tokio::test]
    async fn test_parallel_step_binds_ordered_array() {
        let writer = MockSkill::new("writer");
        let def = PipelineDefinition::new("fanout", "Fan out")
            .with_step(
                PipelineStep::new("variants", "writer")
                    .with_input("topic", json!("launch"))
                    .with_parallel(3)
                    .with_output("drafts"),
            )
            .with_step(
                PipelineStep::new("pick", "echo")
                    .with_input("candidates", json!("$drafts"))
                    .with_output("picked"),
            );
        let engine = engine_with(
            vec![def],
            SkillRegistry::new()
                .with(writer.clone())
                .with(EchoSkill::new("echo")),
        );

        let run = engine.execute(ExecutionRequest::new("fanout")).await;

        assert_run_completed(&run);
        assert_step_ids(&run, &["variants[0]", "variants[1]", "variants[2]", "pick"]);
        assert_eq!(writer.calls(), 3);

        let candidates = run.outputs["picked"]["candidates"].as_array().unwrap();
        assert_eq!(candidates.len(), 3);
        for (i, candidate) in candidates.iter().enumerate() {
            assert_eq!(candidate["invocation"], json!(i));
            assert_eq!(candidate["inputs"]["topic"], json!("launch"));
        }
    }

    #[tokio::test]
    async fn test_unknown_pipeline_fails_with_no_steps() {
        let run = test_engine().execute(ExecutionRequest::new("nope")).await;
        assert_run_failed_with(&run, "Pipeline not found: nope");
        assert!(run.steps.is_empty());
        assert!(run.started_at.is_none());
    }

    #[tokio::test]
    async fn test_missing_required_input_fails_with_no_steps() {
        let run = test_engine().execute(ExecutionRequest::new("test-chained")).await;
        assert_run_failed_with(&run, "Missing required input: text");
        assert!(run.steps.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_skill_is_not_retried() {
        let def = PipelineDefinition::new("ghost", "Ghost")
            .with_step(PipelineStep::new("s", "missing-skill").with_retry(5, BackoffStrategy::Linear));
        let engine = engine_with(vec![def], SkillRegistry::new());

        let run = engine.execute(ExecutionRequest::new("ghost")).await;
        assert_run_failed_with(&run, "Skill not found: missing-skill");
        assert_step_attempts(&run, "s", 0);
    }

    #[tokio::test]
    async fn test_step_callback_sees_each_step_and_panics_are_contained() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let request = ExecutionRequest::new("test-chained")
            .with_input("text", json!("x"))
            .on_step_complete(move |step| {
                sink.lock().push(step.step_id.clone());
                assert!(step.step_id != "step1", "observer bug");
            });

        let run = test_engine().execute(request).await;

        assert_run_completed(&run);
        assert_eq!(*seen.lock(), vec!["step1".to_string(), "step2".to_string()]);
    }

    #[tokio::test]
    async fn test_metering_grouped_by_model() {
        let def = PipelineDefinition::new("metered", "Metered")
            .with_step(PipelineStep::new("a", "big"))
            .with_step(PipelineStep::new("b", "big"))
            .with_step(PipelineStep::new("c", "plain"));
        let engine = engine_with(
            vec![def],
            SkillRegistry::new()
                .with(MockSkill::new("big").with_usage(100, 0.25, Some("gpt-large")))
                .with(EchoSkill::new("plain").with_duration_ms(7)),
        );

        let run = engine.execute(ExecutionRequest::new("metered")).await;

        assert_run_completed(&run);
        assert_eq!(run.metering.total_tokens, 200);
        assert!((run.metering.total_cost_units - 0.5).abs() < f64::EPSILON);
        let large = &run.metering.by_model["gpt-large"];
        assert_eq!(large.calls, 2);
        assert_eq!(large.tokens, 200);
        let unknown = &run.metering.by_model[UNKNOWN_MODEL];
        assert_eq!(unknown.calls, 1);
        assert_eq!(unknown.duration_ms, 7);
    }

    #[tokio::test]
    async fn test_brand_is_bound_into_scope() {
        let def = PipelineDefinition::new("branded", "Branded").with_step(
            PipelineStep::new("s", "echo")
                .with_input("greeting", json!("Hi from ${brand.name}"))
                .with_input("brand_ref", json!({ "$ref": "brand.id" }))
                .with_condition(r#"ctx.brand.voice == "playful""#),
        );
        let engine = engine_with(vec![def], SkillRegistry::new().with(EchoSkill::new("echo")));
        let brand = BrandProfile::new("acme", "Acme").with_voice("playful");

        let run = engine
            .execute(ExecutionRequest::new("branded").with_brand(brand))
            .await;

        assert_run_completed(&run);
        assert_eq!(run.brand_id.as_deref(), Some("acme"));
        let output = run.steps[0].output.as_ref().unwrap();
        assert_eq!(output["greeting"], json!("Hi from Acme"));
        assert_eq!(output["brand_ref"], json!("acme"));
    }

    #[tokio::test]
    async fn test_later_step_shadows_output() {
        let def = PipelineDefinition::new("shadow", "Shadow")
            .with_step(PipelineStep::new("a", "echo").with_input("v", json!(1)).with_output("draft"))
            .with_step(PipelineStep::new("b", "echo").with_input("v", json!(2)).with_output("draft"))
            .with_step(PipelineStep::new("c", "echo").with_input("final", json!("$draft")));
        let engine = engine_with(vec![def], SkillRegistry::new().with(EchoSkill::new("echo")));

        let run = engine.execute(ExecutionRequest::new("shadow")).await;

        assert_run_completed(&run);
        assert_eq!(run.outputs["draft"], json!({ "v": 2 }));
        assert_eq!(run.steps[2].output.as_ref().unwrap()["final"], json!({ "v": 2 }));
    }

    #[tokio::test]
    async fn test_cancellation_checked_between_steps() {
        let token = Arc::new(CancellationToken::new());
        let trip = token.clone();
        let request = ExecutionRequest::new("test-chained")
            .with_input("text", json!("x"))
            .with_cancellation(token)
            .on_step_complete(move |_| {
                trip.cancel("user request");
            });

        let run = test_engine().execute(request).await;

        assert_eq!(run.status, RunStatus::Cancelled);
        assert_step_ids(&run, &["step1"]);
    }

    #[tokio::test]
    async fn test_from_config_loads_definitions_dir() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(
            dir.path().join("blog.yaml"),
            "id: blog\nname: Blog Post\nsteps:\n  - id: draft\n    skill: echo\n",
        )?;
        std::fs::write(dir.path().join("broken.json"), "{ not json")?;

        let config = EngineConfig::new().with_pipelines_dir(dir.path());
        let (engine, events) = PipelineEngine::from_config(
            &config,
            Arc::new(SkillRegistry::new().with(EchoSkill::new("echo"))),
        );

        assert_eq!(events.len(), 2);
        assert!(events.iter().any(|e| matches!(e, LoadEvent::Loaded { id, .. } if id == "blog")));
        assert!(events.iter().any(|e| matches!(e, LoadEvent::Error { .. })));

        let run = engine.execute(ExecutionRequest::new("blog")).await;
        assert_run_completed(&run);
        let best = engine
            .matcher()
            .match_pipeline("write a blog post")
            .ok_or_else(|| anyhow::anyhow!("no pipeline matched"))?;
        assert_eq!(best.pipeline.id, "blog");
        Ok(())
    }

    #[tokio::test]
    async fn test_run_id_can_be_fixed() {
        let run = test_engine()
            .execute(
                ExecutionRequest::new("test-chained")
                    .with_input("text", json!("x"))
                    .with_run_id("fixed-id"),
            )
            .await;
        assert_eq!(run.id, "fixed-id");
        assert_eq!(chained_pipeline().steps.len(), run.steps.len());
    }
}
