//! hypoval - Hypothesis validation pipeline with bounded retries, pacing,
//! and usage receipts
//!
//! hypoval turns an unreliable generation step (an LLM producing candidate
//! queries and narratives) and a fallible execution step (a remote query
//! engine) into a bounded, observable, partially-recoverable batch process
//! over a set of business hypotheses.
//!
//! hypoval can be used in two ways:
//! - **CLI**: `hypoval run` drives the configured hypothesis set end-to-end
//! - **Library**: embed [`PipelineRun`] with your own [`Generator`] and
//!   [`QueryExecutor`] implementations
//!
//! # Quick Start (CLI)
//!
//! ```bash
//! # Sequential baseline run
//! hypoval run --config hypoval.toml
//!
//! # Bounded-parallel fan-out with an overall deadline
//! hypoval run --mode parallel --deadline-secs 900
//! ```
//!
//! # Quick Start (Library)
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use hypoval::{
//!     ArtifactStore, Config, PipelineRun, UsageMonitor,
//!     llm::OpenAiBackend, warehouse::HttpWarehouse,
//! };
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::load("hypoval.toml")?;
//! config.validate()?;
//!
//! let run = PipelineRun::new(
//!     config.pipeline.clone(),
//!     Arc::new(OpenAiBackend::from_settings(&config.llm)?),
//!     Arc::new(HttpWarehouse::from_settings(&config.warehouse)?),
//!     Arc::new(UsageMonitor::new()),
//!     Arc::new(ArtifactStore::new("results/artifacts")),
//! );
//! let summary = run.run(hypoval::pipeline::load_hypotheses("data/hypotheses.json")?).await;
//! println!("{} of {} validated", summary.succeeded_items, summary.total_items);
//! # Ok(())
//! # }
//! ```
//!
//! # Guarantees
//!
//! - At most `query_retry_limit` generate→execute cycles per plan step and
//!   `report_retry_limit` per narrative; each failure's reason feeds the
//!   next attempt.
//! - At most `max_concurrent_calls` outbound calls in flight at once,
//!   run-wide, with `min_call_interval_ms` spacing between generation
//!   calls.
//! - Step results are recorded in plan order; summary entries in original
//!   input order. A run always completes with a summary - partial success
//!   is the normal terminal condition.

pub mod aggregate;
pub mod artifact;
pub mod attempt;
pub mod cli;
pub mod config;
pub mod error;
pub mod exit_codes;
pub mod gate;
pub mod llm;
pub mod monitor;
pub mod pipeline;
pub mod plan;
pub mod types;
pub mod validate;
pub mod warehouse;

pub use aggregate::RunSummaryBuilder;
pub use artifact::ArtifactStore;
pub use attempt::{AttemptFailure, AttemptLoop, Produced};
pub use config::{Config, PipelineSettings, ScheduleMode};
pub use error::{ConfigError, ExecutorError, GeneratorError, PipelineError, PlanError};
pub use exit_codes::ExitCode;
pub use gate::{ConcurrencyLimiter, RateGate};
pub use llm::{GenerateRequest, Generated, Generator, RequestType};
pub use monitor::{CallRecord, UsageMonitor, UsageSummary};
pub use pipeline::PipelineRun;
pub use plan::PlanExpander;
pub use types::{
    Attempt, Hypothesis, ItemSummary, Outcome, Plan, PlanStep, RunSummary, StepRecord,
    StepResult, TableResult, ValidationOutcome,
};
pub use validate::{ReportChecks, ResultChecks};
pub use warehouse::{HttpWarehouse, QueryExecutor};
