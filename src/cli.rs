//! Command-line interface
//!
//! Thin wrapper around the library: load and validate configuration, wire
//! up the collaborators, run the pipeline, and persist the outputs. The
//! process exits non-zero only for configuration and I/O faults; failed
//! hypotheses are a normal run outcome.

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::aggregate;
use crate::artifact::ArtifactStore;
use crate::config::{Config, ScheduleMode};
use crate::exit_codes::ExitCode;
use crate::llm::{Generator, OpenAiBackend};
use crate::monitor::UsageMonitor;
use crate::pipeline::{self, PipelineRun};
use crate::types::RunSummary;
use crate::warehouse::{HttpWarehouse, QueryExecutor};

#[derive(Debug, Parser)]
#[command(
    name = "hypoval",
    version,
    about = "Hypothesis validation pipeline with bounded retries, pacing, and usage receipts"
)]
struct Cli {
    /// Enable debug-level logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the validation pipeline over the configured hypothesis set
    Run(RunArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "hypoval.toml")]
    config: String,

    /// Override the schedule mode ("sequential" or "parallel")
    #[arg(long)]
    mode: Option<String>,

    /// Override the overall run deadline, in seconds
    #[arg(long)]
    deadline_secs: Option<u64>,
}

/// CLI entrypoint. Handles all output including errors.
///
/// # Errors
/// Returns the exit code main should report; all diagnostics have already
/// been printed.
pub fn run() -> Result<(), ExitCode> {
    let cli = Cli::parse();
    if let Err(err) = init_tracing(cli.verbose) {
        eprintln!("failed to initialize logging: {err}");
    }

    match cli.command {
        Command::Run(args) => run_command(args),
    }
}

fn run_command(args: RunArgs) -> Result<(), ExitCode> {
    let mut config = Config::load_or_default(&args.config).map_err(|err| {
        error!(error = %err, "configuration error");
        ExitCode::ConfigError
    })?;

    if let Some(mode) = &args.mode {
        config.pipeline.mode = ScheduleMode::from_str(mode).map_err(|err| {
            error!(error = %err, "configuration error");
            ExitCode::ConfigError
        })?;
    }
    if args.deadline_secs.is_some() {
        config.pipeline.deadline_secs = args.deadline_secs;
    }

    config.validate().map_err(|err| {
        error!(error = %err, "configuration error");
        ExitCode::ConfigError
    })?;

    let runtime = tokio::runtime::Runtime::new().map_err(|err| {
        error!(error = %err, "failed to start async runtime");
        ExitCode::Io
    })?;

    runtime.block_on(execute_run(config)).map_err(|err| {
        error!(error = %err, "run failed");
        ExitCode::Io
    })
}

async fn execute_run(config: Config) -> Result<()> {
    let hypotheses = pipeline::load_hypotheses(&config.paths.hypotheses)?;
    if hypotheses.is_empty() {
        info!(path = %config.paths.hypotheses, "no hypotheses to validate");
    }

    let generator: Arc<dyn Generator> = match config.llm.provider.as_str() {
        "openai" => Arc::new(
            OpenAiBackend::from_settings(&config.llm)
                .map_err(|err| anyhow::anyhow!("generator configuration: {err}"))?,
        ),
        other => anyhow::bail!("unsupported llm provider '{other}' (expected 'openai')"),
    };
    let executor: Arc<dyn QueryExecutor> = Arc::new(
        HttpWarehouse::from_settings(&config.warehouse)
            .map_err(|err| anyhow::anyhow!("warehouse configuration: {err}"))?,
    );
    let monitor = Arc::new(UsageMonitor::new().with_log_file(config.paths.usage_log.clone()));
    let artifacts = Arc::new(ArtifactStore::new(config.paths.artifacts_dir.clone()));

    let run = PipelineRun::new(
        config.pipeline.clone(),
        generator,
        executor,
        Arc::clone(&monitor),
        artifacts,
    );
    let summary = run.run(hypotheses).await;

    persist_outputs(&config, &summary, &monitor)?;
    info!(
        succeeded = summary.succeeded_items,
        failed = summary.failed_items,
        summary_file = %config.paths.summary_file,
        reports_dir = %config.paths.reports_dir,
        "outputs written"
    );
    Ok(())
}

/// Hand the finalized summary and composite artifact to the filesystem.
fn persist_outputs(
    config: &Config,
    summary: &RunSummary,
    monitor: &UsageMonitor,
) -> Result<()> {
    write_with_parents(
        &Utf8PathBuf::from(&config.paths.summary_file),
        &serde_json::to_string_pretty(summary).context("failed to serialize run summary")?,
    )?;

    let reports_dir = Utf8PathBuf::from(&config.paths.reports_dir);
    for item in &summary.items {
        if let Some(report) = &item.report {
            write_with_parents(&reports_dir.join(format!("{}_report.md", item.id)), report)?;
        }
    }
    if summary.succeeded_items > 0 {
        write_with_parents(
            &reports_dir.join("combined_report.md"),
            &aggregate::compose_run_report(summary),
        )?;
    }

    let usage = monitor.summary();
    write_with_parents(
        &Utf8PathBuf::from(&config.paths.usage_summary_file),
        &serde_json::to_string_pretty(&usage).context("failed to serialize usage summary")?,
    )?;
    info!(
        total_calls = usage.total_calls,
        total_tokens_input = usage.total_tokens_input,
        total_tokens_output = usage.total_tokens_output,
        "usage summary written"
    );
    Ok(())
}

fn write_with_parents(path: &Utf8PathBuf, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("failed to create {parent}"))?;
    }
    std::fs::write(path, contents).with_context(|| format!("failed to write {path}"))
}

/// Initialize the tracing subscriber.
///
/// Honors `RUST_LOG`; defaults to info-level (debug for this crate with
/// `--verbose`).
fn init_tracing(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            if verbose {
                EnvFilter::try_new("hypoval=debug,info")
            } else {
                EnvFilter::try_new("hypoval=info,warn")
            }
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_line_number(false)
                .with_file(false)
                .compact(),
        )
        .try_init()?;
    Ok(())
}
