//! Stagegate CLI
//!
//! Runs the build/test/deploy pipeline described by a configuration file.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use stagegate::cancellation::CancellationToken;
use stagegate::config::{LogFormat, PipelineConfig};
use stagegate::core::LifecycleCategory;
use stagegate::deploy::{pipeline_builder, system_ports};
use stagegate::events::LoggingEventSink;
use stagegate::observability::init_tracing;
use stagegate::pipeline::{Pipeline, PipelineReport, TimeoutSpec};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "stagegate")]
#[command(about = "Build, test and deploy a compose project in gated stages", long_about = None)]
struct Cli {
    /// Path to configuration file (YAML or JSON); defaults apply when absent
    #[arg(short, long, global = true, env = "STAGEGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the log level directive
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Override the log format
    #[arg(long, global = true, value_parser = ["text", "json"])]
    log_format: Option<String>,

    /// Override the number of whole-pipeline retries
    #[arg(long, global = true)]
    pipeline_retries: Option<u32>,

    /// Override the overall timeout, in minutes
    #[arg(long, global = true)]
    overall_timeout_minutes: Option<u64>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline (default if no command specified)
    Run {
        /// Write the run report as JSON to this path
        #[arg(long)]
        report: Option<PathBuf>,

        /// Print the run report as JSON on stdout
        #[arg(long)]
        json: bool,
    },

    /// Validate configuration
    Validate,

    /// Print the stages with their effective retry and timeout settings
    Plan,

    /// Generate a sample configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "stagegate.yaml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    if let Some(Commands::GenerateConfig { output }) = &cli.command {
        generate_config_command(output)?;
        return Ok(ExitCode::SUCCESS);
    }

    let config = load_config(&cli)?;
    init_tracing(&config.logging)?;

    match cli.command {
        None => run_command(&config, None, false).await,
        Some(Commands::Run { report, json }) => run_command(&config, report.as_deref(), json).await,
        Some(Commands::Validate) => {
            config.validate()?;
            println!("Configuration is valid");
            Ok(ExitCode::SUCCESS)
        }
        Some(Commands::Plan) => {
            plan_command(&config)?;
            Ok(ExitCode::SUCCESS)
        }
        Some(Commands::GenerateConfig { .. }) => Ok(ExitCode::SUCCESS),
    }
}

/// Layers file, environment and flags, later sources winning.
fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    config.apply_env()?;

    if let Some(level) = &cli.log_level {
        config.logging.level.clone_from(level);
    }
    if let Some(format) = &cli.log_format {
        config.logging.format = format.parse::<LogFormat>()?;
    }
    if let Some(retries) = cli.pipeline_retries {
        config.pipeline_retries = retries;
    }
    if let Some(minutes) = cli.overall_timeout_minutes {
        config.overall_timeout = Some(TimeoutSpec::minutes(minutes));
    }
    Ok(config)
}

fn build_pipeline(config: &PipelineConfig) -> Result<Pipeline> {
    let ports = system_ports(&config.deploy)?;
    let pipeline = pipeline_builder(config, &ports)?
        .event_sink(Arc::new(LoggingEventSink::debug()))
        .build()?;
    Ok(pipeline)
}

async fn run_command(config: &PipelineConfig, report_path: Option<&Path>, json: bool) -> Result<ExitCode> {
    let pipeline = build_pipeline(config)?;

    let token = Arc::new(CancellationToken::new());
    let on_signal = Arc::clone(&token);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping pipeline");
            on_signal.cancel("interrupted by user");
        }
    });

    let report = pipeline.run(token).await;

    if let Some(path) = report_path {
        let body = serde_json::to_vec_pretty(&report)?;
        std::fs::write(path, body).with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "Wrote run report");
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }

    Ok(ExitCode::from(exit_status(report.category)))
}

fn plan_command(config: &PipelineConfig) -> Result<()> {
    config.validate()?;
    let pipeline = build_pipeline(config)?;

    println!("Pipeline: {}", pipeline.name());
    for (i, stage) in pipeline.stages().iter().enumerate() {
        let (attempts, delay) = stage
            .retry()
            .map_or((1, 0), |p| (p.max_attempts, p.inter_attempt_delay.as_secs()));
        let timeout = stage
            .timeout()
            .map_or_else(|| "none".to_string(), ToString::to_string);
        println!(
            "  {}. {:<26} attempts: {attempts:<3} delay: {delay}s  timeout: {timeout}",
            i + 1,
            stage.name()
        );
    }

    let settings = pipeline.settings();
    println!(
        "Overall timeout: {}",
        settings
            .overall_timeout
            .map_or_else(|| "none".to_string(), |t| t.to_string())
    );
    println!(
        "Pipeline retries: {} (delay {}s)",
        settings.pipeline_retries,
        settings.retry_delay.as_secs()
    );
    Ok(())
}

fn generate_config_command(output: &Path) -> Result<()> {
    let yaml = PipelineConfig::default().to_yaml()?;
    std::fs::write(output, yaml).with_context(|| format!("failed to write {}", output.display()))?;
    println!("Generated sample configuration: {}", output.display());
    Ok(())
}

fn print_summary(report: &PipelineReport) {
    println!("\n=== {} ({}) ===", report.pipeline, report.run_id);
    if let Some(attempt) = report.final_attempt() {
        for record in &attempt.stages {
            let state = record
                .outcome()
                .map_or_else(|| "SKIPPED".to_string(), |o| o.to_string());
            println!("  {:<26} {state:<9} attempts: {}", record.name, record.attempts);
        }
    }
    if let Some(err) = &report.error {
        println!("Error: {}", err.message);
    }
    for hook_error in &report.hook_errors {
        println!("Hook error: {hook_error}");
    }
    println!("Result: {}", report.category);
}

/// Maps the final category to the process exit status.
const fn exit_status(category: LifecycleCategory) -> u8 {
    match category {
        LifecycleCategory::Success | LifecycleCategory::Always => 0,
        LifecycleCategory::Failure => 1,
        LifecycleCategory::Unstable => 2,
        LifecycleCategory::Aborted => 130,
    }
}
