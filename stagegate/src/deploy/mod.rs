//! The build/test/deploy pipeline.
//!
//! Five stages run in a fixed order:
//!
//! 1. `Build` builds every service image, retried up to three times.
//! 2. `Start Test Infrastructure` starts the backing services.
//! 3. `Run Tests` waits for the database to accept connections, then runs
//!    the test suite. A database that never becomes ready fails the stage; a
//!    non-zero exit code from the suite only makes it unstable, which does
//!    not block deployment.
//! 4. `Deploy` starts the application services, tearing down between
//!    attempts.
//! 5. `Integration Test` polls the application until it serves the expected
//!    page.
//!
//! Every stage that touches a service saves that service's logs when it
//! finishes. A failed run saves and announces the last known logs of every
//! service, and every run ends by tearing the services down.

mod hooks;
mod summary;

pub use hooks::{AnnounceResult, CaptureLogs, DumpLogsOnFailure, Teardown};
pub use summary::TestSummary;

use crate::config::{DeployConfig, PipelineConfig};
use crate::core::LifecycleCategory;
use crate::errors::PipelineError;
use crate::pipeline::{
    CompoundProbe, HealthCheckSpec, HookAction, PipelineBuilder, Probe, RetryPolicy, TimeoutSpec,
};
use crate::ports::{
    save_best_effort, ArtifactStore, CommandProbe, CommandRunner, ComposeContainerService,
    ContentMatches, DeployPorts, EndpointReachable,
};
use crate::stages::{action_fn, Stage, StageAction, StageContext};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Stage names, in execution order.
pub const BUILD: &str = "Build";
/// Starts the services the tests depend on.
pub const START_TEST_INFRASTRUCTURE: &str = "Start Test Infrastructure";
/// Runs the test suite.
pub const RUN_TESTS: &str = "Run Tests";
/// Starts the application.
pub const DEPLOY: &str = "Deploy";
/// Checks the running application.
pub const INTEGRATION_TEST: &str = "Integration Test";

/// All stage names, in execution order.
pub const STAGE_NAMES: [&str; 5] = [BUILD, START_TEST_INFRASTRUCTURE, RUN_TESTS, DEPLOY, INTEGRATION_TEST];

const BUILD_ATTEMPTS: u32 = 3;
const BUILD_RETRY_DELAY: Duration = Duration::from_secs(10);
const DEPLOY_ATTEMPTS: u32 = 3;
const DEPLOY_RETRY_DELAY: Duration = Duration::from_secs(15);

/// Waits for the database, runs the test suite and turns its exit code into
/// a stage outcome.
pub struct TestSuite {
    readiness: Arc<HealthCheckSpec>,
    commands: Arc<dyn CommandRunner>,
    artifacts: Arc<dyn ArtifactStore>,
    command: String,
    working_dir: PathBuf,
}

impl std::fmt::Debug for TestSuite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestSuite")
            .field("command", &self.command)
            .field("working_dir", &self.working_dir)
            .field("readiness", &self.readiness)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StageAction for TestSuite {
    async fn run(&self, ctx: &StageContext) -> Result<(), PipelineError> {
        let polls = self.readiness.poll(&ctx.token).await?;
        info!(stage = %ctx.stage, attempts = polls, "Database ready");

        let output = self
            .commands
            .execute(&self.command, &self.working_dir, None)
            .await?;

        let transcript = format!("{}{}", output.stdout, output.stderr);
        save_best_effort(self.artifacts.as_ref(), "test-output.log", transcript.as_bytes()).await;

        match TestSummary::parse(&transcript) {
            Some(summary) => {
                info!(
                    stage = %ctx.stage,
                    passed = summary.passed,
                    failed = summary.failed,
                    errors = summary.errors,
                    skipped = summary.skipped,
                    "Test summary"
                );
                if summary.disagrees_with(output.exit_code) {
                    warn!(
                        stage = %ctx.stage,
                        exit_code = output.exit_code,
                        "Test summary disagrees with the exit code; the exit code decides"
                    );
                }
                if let Ok(json) = serde_json::to_vec_pretty(&summary) {
                    save_best_effort(self.artifacts.as_ref(), "test-summary.json", &json).await;
                }
            }
            None => warn!(stage = %ctx.stage, "No test summary found in output"),
        }

        output
            .into_result(&self.command)
            .map(|_| ())
            .map_err(PipelineError::tolerable)
    }
}

fn health_check(probe: Arc<dyn Probe>, attempts: u32, interval: Duration) -> Arc<HealthCheckSpec> {
    Arc::new(
        HealthCheckSpec::new(probe)
            .with_max_attempts(attempts)
            .with_interval(interval),
    )
}

fn capture_logs(ports: &DeployPorts, services: &[String], tail: usize) -> Arc<dyn HookAction> {
    Arc::new(CaptureLogs {
        containers: Arc::clone(&ports.containers),
        artifacts: Arc::clone(&ports.artifacts),
        services: services.to_vec(),
        tail,
    })
}

/// Builds the deploy pipeline from configuration and collaborators.
///
/// Overrides from `config` are applied; callers may still attach an event
/// sink before building.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or an override names an
/// unknown stage.
pub fn pipeline_builder(config: &PipelineConfig, ports: &DeployPorts) -> Result<PipelineBuilder, PipelineError> {
    config.validate()?;
    let deploy = &config.deploy;
    let tail = deploy.log_tail_lines;

    let mut all_services = deploy.infrastructure_services.clone();
    for service in &deploy.app_services {
        if !all_services.contains(service) {
            all_services.push(service.clone());
        }
    }

    let build = {
        let containers = Arc::clone(&ports.containers);
        action_fn("compose build", move |_ctx: StageContext| {
            let containers = Arc::clone(&containers);
            async move { containers.build().await }
        })
    };

    let start_infrastructure = {
        let containers = Arc::clone(&ports.containers);
        let services = deploy.infrastructure_services.clone();
        action_fn("start infrastructure", move |_ctx: StageContext| {
            let containers = Arc::clone(&containers);
            let services = services.clone();
            async move { containers.up(&services).await }
        })
    };

    let run_tests: Arc<dyn StageAction> = Arc::new(TestSuite {
        readiness: health_check(
            Arc::new(CommandProbe::new(
                Arc::clone(&ports.containers),
                deploy.database_service.clone(),
                deploy.database_ready_command.clone(),
            )),
            deploy.database_health.max_attempts,
            deploy.database_health.interval(),
        ),
        commands: Arc::clone(&ports.commands),
        artifacts: Arc::clone(&ports.artifacts),
        command: deploy.test_command.clone(),
        working_dir: deploy.working_dir.clone(),
    });

    let start_app = {
        let containers = Arc::clone(&ports.containers);
        let services = deploy.app_services.clone();
        action_fn("deploy", move |_ctx: StageContext| {
            let containers = Arc::clone(&containers);
            let services = services.clone();
            async move { containers.up(&services).await }
        })
    };
    let redeploy = {
        let containers = Arc::clone(&ports.containers);
        RetryPolicy::new(DEPLOY_ATTEMPTS)
            .with_delay(DEPLOY_RETRY_DELAY)
            .with_fallback(move || {
                let containers = Arc::clone(&containers);
                async move { containers.down().await }
            })
    };

    let integration = {
        let probe = CompoundProbe::new()
            .with(Arc::new(EndpointReachable::new(Arc::clone(&ports.prober), deploy.app_url.clone())))
            .with(Arc::new(ContentMatches::new(
                Arc::clone(&ports.prober),
                deploy.app_url.clone(),
                deploy.expected_content.clone(),
            )));
        let readiness = health_check(
            Arc::new(probe),
            deploy.app_health.max_attempts,
            deploy.app_health.interval(),
        );
        action_fn("integration check", move |ctx: StageContext| {
            let readiness = Arc::clone(&readiness);
            async move { readiness.poll(&ctx.token).await.map(|_| ()) }
        })
    };

    let mut builder = PipelineBuilder::new(config.name.clone())
        .stage(
            Stage::new(BUILD, build)
                .with_retry(RetryPolicy::new(BUILD_ATTEMPTS).with_delay(BUILD_RETRY_DELAY))
                .with_timeout(TimeoutSpec::minutes(30)),
        )?
        .stage(
            Stage::new(START_TEST_INFRASTRUCTURE, start_infrastructure)
                .with_timeout(TimeoutSpec::minutes(5))
                .with_post_hook(
                    LifecycleCategory::Always,
                    capture_logs(ports, &deploy.infrastructure_services, tail),
                ),
        )?
        .stage(
            Stage::new(RUN_TESTS, run_tests)
                .with_timeout(TimeoutSpec::minutes(30))
                .with_post_hook(
                    LifecycleCategory::Always,
                    capture_logs(ports, &deploy.infrastructure_services, tail),
                ),
        )?
        .stage(
            Stage::new(DEPLOY, start_app)
                .with_retry(redeploy)
                .with_timeout(TimeoutSpec::minutes(10))
                .with_post_hook(LifecycleCategory::Always, capture_logs(ports, &deploy.app_services, tail)),
        )?
        .stage(
            Stage::new(INTEGRATION_TEST, integration)
                .with_timeout(TimeoutSpec::minutes(5))
                .with_post_hook(LifecycleCategory::Always, capture_logs(ports, &deploy.app_services, tail)),
        )?
        .hook(
            LifecycleCategory::Failure,
            Arc::new(DumpLogsOnFailure {
                containers: Arc::clone(&ports.containers),
                artifacts: Arc::clone(&ports.artifacts),
                notifier: Arc::clone(&ports.notifier),
                services: all_services,
                tail,
            }),
        )
        .hook(
            LifecycleCategory::Always,
            Arc::new(Teardown {
                containers: Arc::clone(&ports.containers),
            }),
        )
        .pipeline_retries(config.pipeline_retries, Duration::from_secs(config.pipeline_retry_delay_secs))
        .apply_overrides(&config.overrides)?;

    let announce: Arc<dyn HookAction> = Arc::new(AnnounceResult {
        notifier: Arc::clone(&ports.notifier),
    });
    for category in [
        LifecycleCategory::Success,
        LifecycleCategory::Unstable,
        LifecycleCategory::Failure,
        LifecycleCategory::Aborted,
    ] {
        builder = builder.hook(category, Arc::clone(&announce));
    }

    if let Some(timeout) = config.overall_timeout {
        builder = builder.overall_timeout(timeout);
    }
    Ok(builder)
}

/// `docker compose` for the configured project, each invocation bounded by
/// `compose_timeout_secs` when set.
pub fn compose_service(runner: Arc<dyn CommandRunner>, config: &DeployConfig) -> ComposeContainerService {
    let service = ComposeContainerService::new(
        runner,
        config.compose_file.clone(),
        config.project_name.clone(),
        config.working_dir.clone(),
    );
    match config.compose_timeout_secs {
        Some(secs) => service.with_command_timeout(Duration::from_secs(secs)),
        None => service,
    }
}

/// Production collaborators: a shell runner, `docker compose`, a filesystem
/// artifact store, log notifications and an HTTP prober.
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be built.
#[cfg(feature = "http-probe")]
pub fn system_ports(config: &DeployConfig) -> Result<DeployPorts, PipelineError> {
    use crate::ports::{FsArtifactStore, HttpProber, LoggingNotifier, ShellCommandRunner};

    let commands: Arc<dyn CommandRunner> = Arc::new(ShellCommandRunner::new());
    let containers = compose_service(Arc::clone(&commands), config);
    Ok(DeployPorts {
        commands,
        containers: Arc::new(containers),
        artifacts: Arc::new(FsArtifactStore::new(config.artifact_dir.clone())),
        notifier: Arc::new(LoggingNotifier),
        prober: Arc::new(HttpProber::new(Duration::from_secs(config.http_timeout_secs))?),
    })
}
