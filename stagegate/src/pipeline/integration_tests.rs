//! End-to-end tests for pipeline execution.

#[cfg(test)]
mod tests {
    use crate::cancellation::CancellationToken;
    use crate::core::{LifecycleCategory, StageOutcome};
    use crate::events::CollectingEventSink;
    use crate::pipeline::{
        hook_fn, HealthCheckSpec, HookContext, Pipeline, PipelineBuilder, RetryPolicy, TimeoutSpec,
    };
    use crate::stages::{action_fn, Stage, StageContext};
    use crate::testing::{
        assert_category, assert_executed, assert_outcomes, assert_skipped, RecordingHook,
        ScriptedAction, ScriptedProbe,
    };
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;

    const STAGES: [&str; 5] = [
        "Build",
        "Start Test Infrastructure",
        "Run Tests",
        "Deploy",
        "Integration Test",
    ];

    struct Hooks {
        always: Arc<RecordingHook>,
        success: Arc<RecordingHook>,
        unstable: Arc<RecordingHook>,
        failure: Arc<RecordingHook>,
        aborted: Arc<RecordingHook>,
    }

    impl Hooks {
        fn new() -> Self {
            Self {
                always: Arc::new(RecordingHook::new()),
                success: Arc::new(RecordingHook::new()),
                unstable: Arc::new(RecordingHook::new()),
                failure: Arc::new(RecordingHook::new()),
                aborted: Arc::new(RecordingHook::new()),
            }
        }

        fn register(&self, builder: PipelineBuilder) -> PipelineBuilder {
            builder
                .hook(LifecycleCategory::Always, self.always.clone())
                .hook(LifecycleCategory::Success, self.success.clone())
                .hook(LifecycleCategory::Unstable, self.unstable.clone())
                .hook(LifecycleCategory::Failure, self.failure.clone())
                .hook(LifecycleCategory::Aborted, self.aborted.clone())
        }

        fn counts(&self) -> [usize; 5] {
            [
                self.always.calls(),
                self.success.calls(),
                self.unstable.calls(),
                self.failure.calls(),
                self.aborted.calls(),
            ]
        }
    }

    fn polling_action(spec: HealthCheckSpec) -> Arc<dyn crate::stages::StageAction> {
        let spec = Arc::new(spec);
        action_fn("poll", move |ctx: StageContext| {
            let spec = Arc::clone(&spec);
            async move { spec.poll(&ctx.token).await.map(|_| ()) }
        })
    }

    fn five_stage(actions: [Stage; 5], hooks: &Hooks) -> Pipeline {
        let mut builder = PipelineBuilder::new("deploy");
        for stage in actions {
            builder = builder.stage(stage).unwrap();
        }
        hooks.register(builder).build().unwrap()
    }

    fn succeeding(name: &str) -> Stage {
        Stage::new(name, Arc::new(ScriptedAction::succeeding()))
    }

    fn token() -> Arc<CancellationToken> {
        Arc::new(CancellationToken::new())
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenario_everything_succeeds() {
        let hooks = Hooks::new();
        let probe = Arc::new(ScriptedProbe::ready_on(1));
        let pipeline = five_stage(
            [
                succeeding(STAGES[0]),
                succeeding(STAGES[1]),
                succeeding(STAGES[2]),
                succeeding(STAGES[3]),
                Stage::new(STAGES[4], polling_action(HealthCheckSpec::new(probe.clone()))),
            ],
            &hooks,
        );

        let report = pipeline.run(token()).await;

        assert_category(&report, LifecycleCategory::Success);
        assert_executed(&report, &STAGES);
        assert_eq!(hooks.counts(), [1, 1, 0, 0, 0]);
        assert_eq!(probe.calls(), 1);
        assert!(report.error.is_none());
        assert_eq!(report.attempts.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenario_build_recovers_on_third_attempt() {
        let hooks = Hooks::new();
        let build = Arc::new(ScriptedAction::failing_times(2));
        let pipeline = five_stage(
            [
                Stage::new(STAGES[0], build.clone())
                    .with_retry(RetryPolicy::new(3).with_delay(Duration::from_secs(5))),
                succeeding(STAGES[1]),
                succeeding(STAGES[2]),
                succeeding(STAGES[3]),
                succeeding(STAGES[4]),
            ],
            &hooks,
        );

        let report = pipeline.run(token()).await;

        let record = report.stage("Build").unwrap();
        assert_eq!(record.outcome(), Some(StageOutcome::Success));
        assert_eq!(record.attempts, 3);
        assert_eq!(build.attempts_seen(), vec![1, 2, 3]);
        assert_executed(&report, &STAGES);
        assert_category(&report, LifecycleCategory::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenario_health_check_exhausted() {
        let hooks = Hooks::new();
        let probe = Arc::new(ScriptedProbe::never());
        let spec = HealthCheckSpec::new(probe.clone())
            .with_max_attempts(12)
            .with_interval(Duration::from_secs(10));
        let pipeline = five_stage(
            [
                succeeding(STAGES[0]),
                succeeding(STAGES[1]),
                succeeding(STAGES[2]),
                succeeding(STAGES[3]),
                Stage::new(STAGES[4], polling_action(spec)),
            ],
            &hooks,
        );

        let start = Instant::now();
        let report = pipeline.run(token()).await;
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_secs(110), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(111), "elapsed {elapsed:?}");
        assert_eq!(probe.calls(), 12);

        let record = report.stage("Integration Test").unwrap();
        assert_eq!(record.outcome(), Some(StageOutcome::Failure));
        assert_eq!(
            record.error.as_ref().map(|e| e.kind.as_str()),
            Some("HealthCheckExhausted")
        );
        assert_category(&report, LifecycleCategory::Failure);
        assert_eq!(hooks.counts(), [1, 0, 0, 1, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenario_abort_during_deploy_retry_delay() {
        let hooks = Hooks::new();
        let deploy = Arc::new(ScriptedAction::always_failing());
        let integration = Arc::new(ScriptedAction::succeeding());
        let pipeline = five_stage(
            [
                succeeding(STAGES[0]),
                succeeding(STAGES[1]),
                succeeding(STAGES[2]),
                Stage::new(STAGES[3], deploy.clone())
                    .with_retry(RetryPolicy::new(3).with_delay(Duration::from_secs(30))),
                Stage::new(STAGES[4], integration.clone()),
            ],
            &hooks,
        );

        let token = token();
        let stopper = Arc::clone(&token);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            stopper.cancel("operator stop");
        });

        let report = pipeline.run(token).await;

        assert_category(&report, LifecycleCategory::Aborted);
        assert_eq!(deploy.calls(), 1);
        assert_eq!(integration.calls(), 0);
        assert_skipped(&report, &["Integration Test"]);
        assert_eq!(report.stage("Deploy").unwrap().outcome(), Some(StageOutcome::Aborted));
        let [always, success, unstable, failure, _] = hooks.counts();
        assert_eq!((always, success, unstable, failure), (1, 0, 0, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_emits_cancelled_event() {
        let events = Arc::new(CollectingEventSink::new());
        let pipeline = PipelineBuilder::new("stoppable")
            .stage(Stage::new("Deploy", Arc::new(ScriptedAction::sleeping(Duration::from_secs(60)))))
            .unwrap()
            .event_sink(events.clone())
            .build()
            .unwrap();

        let token = token();
        let stopper = Arc::clone(&token);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            stopper.cancel("operator stop");
        });

        let report = pipeline.run(token).await;

        assert_category(&report, LifecycleCategory::Aborted);
        let cancelled = events.of_type("pipeline.cancelled");
        assert_eq!(cancelled.len(), 1);
        assert_eq!(cancelled[0].payload()["reason"], "operator stop");
        let types = events.event_types();
        let at = types.iter().position(|t| t == "pipeline.cancelled").unwrap();
        assert_eq!(types[at - 1], "stage.started");
    }

    #[tokio::test]
    async fn test_failure_blocks_every_later_stage() {
        let hooks = Hooks::new();
        let later = Arc::new(ScriptedAction::succeeding());
        let pipeline = five_stage(
            [
                Stage::new(STAGES[0], Arc::new(ScriptedAction::always_failing())),
                Stage::new(STAGES[1], later.clone()),
                Stage::new(STAGES[2], later.clone()),
                Stage::new(STAGES[3], later.clone()),
                Stage::new(STAGES[4], later.clone()),
            ],
            &hooks,
        );

        let report = pipeline.run(token()).await;

        assert_executed(&report, &["Build"]);
        assert_skipped(&report, &STAGES[1..]);
        assert_eq!(later.calls(), 0);
        assert_category(&report, LifecycleCategory::Failure);
        assert_eq!(report.error.as_ref().map(|e| e.kind.as_str()), Some("CommandFailure"));
    }

    #[tokio::test]
    async fn test_unstable_lets_later_stages_run() {
        let hooks = Hooks::new();
        let pipeline = five_stage(
            [
                succeeding(STAGES[0]),
                succeeding(STAGES[1]),
                Stage::new(STAGES[2], Arc::new(ScriptedAction::tolerable_failure())),
                succeeding(STAGES[3]),
                succeeding(STAGES[4]),
            ],
            &hooks,
        );

        let report = pipeline.run(token()).await;

        assert_outcomes(
            &report,
            &[
                StageOutcome::Success,
                StageOutcome::Success,
                StageOutcome::Unstable,
                StageOutcome::Success,
                StageOutcome::Success,
            ],
        );
        assert_category(&report, LifecycleCategory::Unstable);
        assert_eq!(report.result, Some(StageOutcome::Unstable));
        assert_eq!(hooks.counts(), [1, 0, 1, 0, 0]);
    }

    #[tokio::test]
    async fn test_identical_inputs_give_identical_outcomes() {
        let build = || {
            let hooks = Hooks::new();
            five_stage(
                [
                    succeeding(STAGES[0]),
                    Stage::new(STAGES[1], Arc::new(ScriptedAction::tolerable_failure())),
                    succeeding(STAGES[2]),
                    Stage::new(STAGES[3], Arc::new(ScriptedAction::always_failing())),
                    succeeding(STAGES[4]),
                ],
                &hooks,
            )
        };

        let first = build().run(token()).await;
        let second = build().run(token()).await;

        assert_eq!(first.outcomes(), second.outcomes());
        assert_eq!(first.executed(), second.executed());
        assert_eq!(first.category, second.category);
        assert_ne!(first.run_id, second.run_id);
    }

    #[tokio::test]
    async fn test_stage_post_hook_runs_before_next_stage() {
        let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let action = |label: &'static str| {
            let log = Arc::clone(&log);
            action_fn(label, move |_ctx: StageContext| {
                let log = Arc::clone(&log);
                async move {
                    log.lock().push(label.to_string());
                    Ok(())
                }
            })
        };
        let teardown = {
            let log = Arc::clone(&log);
            hook_fn(move |ctx: HookContext| {
                let log = Arc::clone(&log);
                async move {
                    log.lock().push(format!("{} teardown", ctx.stage.unwrap_or_default()));
                    Ok(())
                }
            })
        };

        let pipeline = PipelineBuilder::new("order")
            .stage(Stage::new("Build", action("build")).with_post_hook(LifecycleCategory::Always, teardown))
            .unwrap()
            .stage(Stage::new("Deploy", action("deploy")))
            .unwrap()
            .build()
            .unwrap();

        pipeline.run(token()).await;

        assert_eq!(*log.lock(), vec!["build", "Build teardown", "deploy"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pipeline_retry_runs_a_second_pass() {
        let build = Arc::new(ScriptedAction::failing_times(1));
        let pipeline = PipelineBuilder::new("retrying")
            .stage(Stage::new("Build", build.clone()))
            .unwrap()
            .stage(succeeding("Deploy"))
            .unwrap()
            .pipeline_retries(1, Duration::from_secs(30))
            .build()
            .unwrap();

        let start = Instant::now();
        let report = pipeline.run(token()).await;

        assert_eq!(report.attempts.len(), 2);
        assert_eq!(report.attempts[0].outcomes(), vec![StageOutcome::Failure]);
        assert_eq!(report.attempts[0].current_result, Some(StageOutcome::Failure));
        assert_outcomes(&report, &[StageOutcome::Success, StageOutcome::Success]);
        assert_category(&report, LifecycleCategory::Success);
        assert!(report.error.is_none());
        assert_eq!(build.calls(), 2);
        assert!(start.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pipeline_retry_exhausted_reports_last_failure() {
        let pipeline = PipelineBuilder::new("retrying")
            .stage(Stage::new("Build", Arc::new(ScriptedAction::always_failing())))
            .unwrap()
            .pipeline_retries(2, Duration::from_secs(1))
            .build()
            .unwrap();

        let report = pipeline.run(token()).await;

        assert_eq!(report.attempts.len(), 3);
        assert_category(&report, LifecycleCategory::Failure);
        assert_eq!(report.error.as_ref().map(|e| e.kind.as_str()), Some("CommandFailure"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overall_timeout_fails_in_flight_stage() {
        let hooks = Hooks::new();
        let pipeline = hooks
            .register(
                PipelineBuilder::new("bounded")
                    .stage(succeeding("Build"))
                    .unwrap()
                    .stage(Stage::new("Run Tests", Arc::new(ScriptedAction::sleeping(Duration::from_secs(600)))))
                    .unwrap()
                    .stage(succeeding("Deploy"))
                    .unwrap()
                    .overall_timeout(TimeoutSpec::minutes(1)),
            )
            .build()
            .unwrap();

        let start = Instant::now();
        let report = pipeline.run(token()).await;

        assert!(start.elapsed() < Duration::from_secs(61));
        assert_eq!(report.stage("Run Tests").unwrap().outcome(), Some(StageOutcome::Failure));
        assert_skipped(&report, &["Deploy"]);
        assert_category(&report, LifecycleCategory::Failure);
        assert_eq!(report.error.as_ref().map(|e| e.kind.as_str()), Some("Timeout"));
        assert_eq!(hooks.counts(), [1, 0, 0, 1, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overall_timeout_still_runs_stage_post_hooks() {
        let stage_always = Arc::new(RecordingHook::new());
        let stage_failure = Arc::new(RecordingHook::new());
        let pipeline = PipelineBuilder::new("bounded")
            .stage(
                Stage::new("Run Tests", Arc::new(ScriptedAction::sleeping(Duration::from_secs(600))))
                    .with_post_hook(LifecycleCategory::Always, stage_always.clone())
                    .with_post_hook(LifecycleCategory::Failure, stage_failure.clone()),
            )
            .unwrap()
            .overall_timeout(TimeoutSpec::minutes(1))
            .build()
            .unwrap();

        let report = pipeline.run(token()).await;

        assert_eq!(report.stage("Run Tests").unwrap().outcome(), Some(StageOutcome::Failure));
        assert_eq!(stage_failure.calls(), 1);
        assert_eq!(stage_always.calls(), 1);
        let ctx = stage_always.contexts();
        assert_eq!(ctx[0].stage.as_deref(), Some("Run Tests"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overall_timeout_bounds_pipeline_retries() {
        let build = Arc::new(ScriptedAction::always_failing());
        let pipeline = PipelineBuilder::new("bounded")
            .stage(Stage::new("Build", build.clone()))
            .unwrap()
            .pipeline_retries(5, Duration::from_secs(30))
            .overall_timeout(TimeoutSpec::minutes(1))
            .build()
            .unwrap();

        let start = Instant::now();
        let report = pipeline.run(token()).await;

        // Passes at 0s and 30s; a third would start at the deadline.
        assert_eq!(report.attempts.len(), 2);
        assert_eq!(build.calls(), 2);
        assert_eq!(start.elapsed(), Duration::from_secs(30));
        assert_category(&report, LifecycleCategory::Failure);
        assert_eq!(report.error.as_ref().map(|e| e.kind.as_str()), Some("CommandFailure"));
    }

    #[tokio::test]
    async fn test_stop_after_last_stage_keeps_result() {
        let hooks = Hooks::new();
        let token = token();
        let late = token.clone();
        let pipeline = hooks
            .register(
                PipelineBuilder::new("late-stop").stage(succeeding("Build").with_post_hook(
                    LifecycleCategory::Always,
                    hook_fn(move |_| {
                        late.cancel("shutdown");
                        async { Ok(()) }
                    }),
                ))
                .unwrap(),
            )
            .build()
            .unwrap();

        let report = pipeline.run(token).await;

        assert_category(&report, LifecycleCategory::Success);
        assert_eq!(report.result, Some(StageOutcome::Success));
        assert_eq!(hooks.counts(), [1, 1, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_stop_before_run_aborts() {
        let hooks = Hooks::new();
        let pipeline = hooks
            .register(PipelineBuilder::new("stopped").stage(succeeding("Build")).unwrap())
            .build()
            .unwrap();

        let token = token();
        token.cancel("shutdown");
        let report = pipeline.run(token).await;

        assert_category(&report, LifecycleCategory::Aborted);
        assert_eq!(hooks.counts(), [1, 0, 0, 0, 1]);
    }

    #[tokio::test]
    async fn test_failing_hook_does_not_change_category() {
        let always = Arc::new(RecordingHook::new());
        let events = Arc::new(CollectingEventSink::new());
        let pipeline = PipelineBuilder::new("hooks")
            .stage(succeeding("Build"))
            .unwrap()
            .hook(LifecycleCategory::Success, Arc::new(RecordingHook::failing("mail server down")))
            .hook(LifecycleCategory::Always, always.clone())
            .event_sink(events.clone())
            .build()
            .unwrap();

        let report = pipeline.run(token()).await;

        assert_category(&report, LifecycleCategory::Success);
        assert_eq!(report.hook_errors.len(), 1);
        assert!(report.hook_errors[0].contains("mail server down"));
        assert_eq!(always.calls(), 1);
        assert_eq!(events.of_type("hook.failed").len(), 1);
    }

    #[tokio::test]
    async fn test_event_sequence() {
        let events = Arc::new(CollectingEventSink::new());
        let pipeline = PipelineBuilder::new("events")
            .stage(Stage::new("Build", Arc::new(ScriptedAction::always_failing())))
            .unwrap()
            .stage(succeeding("Deploy"))
            .unwrap()
            .event_sink(events.clone())
            .build()
            .unwrap();

        pipeline.run(token()).await;

        assert_eq!(
            events.event_types(),
            vec![
                "pipeline.started",
                "pipeline.attempt",
                "stage.started",
                "stage.completed",
                "stage.skipped",
                "pipeline.completed",
            ]
        );
    }

    #[tokio::test]
    async fn test_report_serializes() {
        let pipeline = PipelineBuilder::new("json")
            .stage(Stage::new("Build", Arc::new(ScriptedAction::always_failing())))
            .unwrap()
            .build()
            .unwrap();

        let report = pipeline.run(token()).await;
        let value = serde_json::to_value(&report).unwrap();

        assert_eq!(value["category"], "failure");
        assert_eq!(value["attempts"][0]["stages"][0]["name"], "Build");
        assert!(value["error"]["message"].as_str().unwrap().contains("Build step"));
    }
}
