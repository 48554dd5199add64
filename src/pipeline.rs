//! Pipeline driver
//!
//! Drives each hypothesis through plan expansion, per-step attempt loops,
//! narrative generation, and aggregation, either strictly sequentially or
//! with every hypothesis as an independent concurrent unit. All outbound
//! calls are wrapped by the shared admission gate, and generation calls
//! additionally by the pacing gate.

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::aggregate::{self, RunSummaryBuilder};
use crate::artifact::ArtifactStore;
use crate::attempt::{AttemptFailure, AttemptLoop, Produced};
use crate::config::{PipelineSettings, ScheduleMode};
use crate::error::{ExecutorError, GeneratorError, PipelineError};
use crate::gate::{ConcurrencyLimiter, RateGate};
use crate::llm::{GenerateRequest, Generated, Generator, RequestType};
use crate::monitor::{CallRecord, UsageMonitor};
use crate::plan::PlanExpander;
use crate::types::{
    Hypothesis, ItemSummary, Outcome, Plan, PlanStep, RunSummary, StepRecord, StepResult,
    TableResult,
};
use crate::validate::{ReportChecks, ResultChecks, clean_generated_sql};
use crate::warehouse::QueryExecutor;

/// Load the hypothesis set from a JSON file.
///
/// # Errors
/// Returns `PipelineError::HypothesisLoad` if the file cannot be read or
/// decoded.
pub fn load_hypotheses(path: &str) -> Result<Vec<Hypothesis>, PipelineError> {
    let raw = std::fs::read_to_string(path).map_err(|err| PipelineError::HypothesisLoad {
        path: path.to_string(),
        reason: err.to_string(),
    })?;
    serde_json::from_str(&raw).map_err(|err| PipelineError::HypothesisLoad {
        path: path.to_string(),
        reason: err.to_string(),
    })
}

/// Top-level driver for one validation run.
///
/// Cheap to clone: collaborators are shared behind `Arc`s so bounded-parallel
/// mode can hand each unit its own handle.
#[derive(Clone)]
pub struct PipelineRun {
    settings: PipelineSettings,
    generator: Arc<dyn Generator>,
    executor: Arc<dyn QueryExecutor>,
    monitor: Arc<UsageMonitor>,
    artifacts: Arc<ArtifactStore>,
    limiter: Arc<ConcurrencyLimiter>,
    rate: Arc<RateGate>,
    expander: PlanExpander,
    result_checks: ResultChecks,
    report_checks: ReportChecks,
}

impl PipelineRun {
    #[must_use]
    pub fn new(
        settings: PipelineSettings,
        generator: Arc<dyn Generator>,
        executor: Arc<dyn QueryExecutor>,
        monitor: Arc<UsageMonitor>,
        artifacts: Arc<ArtifactStore>,
    ) -> Self {
        // Sequential mode degenerates to a single admission slot.
        let capacity = match settings.mode {
            ScheduleMode::Sequential => 1,
            ScheduleMode::Parallel => settings.max_concurrent_calls,
        };
        let limiter = Arc::new(ConcurrencyLimiter::new(capacity));
        let rate = Arc::new(RateGate::new(Duration::from_millis(
            settings.min_call_interval_ms,
        )));
        let expander = PlanExpander::new(settings.max_plan_steps);
        let result_checks = ResultChecks::new(settings.min_rows, settings.required_fields.clone());
        let report_checks =
            ReportChecks::new(settings.report_min_chars, settings.report_marker.clone());

        Self {
            settings,
            generator,
            executor,
            monitor,
            artifacts,
            limiter,
            rate,
            expander,
            result_checks,
            report_checks,
        }
    }

    /// Drive the full hypothesis set to terminal states and finalize the
    /// run summary.
    ///
    /// Partial success is the normal terminal condition: a run where every
    /// hypothesis failed still returns a summary with zero successes.
    pub async fn run(&self, hypotheses: Vec<Hypothesis>) -> RunSummary {
        let deadline = self
            .settings
            .deadline_secs
            .map(|secs| Instant::now() + Duration::from_secs(secs));
        info!(
            total = hypotheses.len(),
            mode = %self.settings.mode,
            max_concurrent_calls = self.limiter.capacity(),
            "starting validation run"
        );

        let mut builder = RunSummaryBuilder::new(&hypotheses);
        match self.settings.mode {
            ScheduleMode::Sequential => {
                for (index, hypothesis) in hypotheses.into_iter().enumerate() {
                    let item = self.process_item(&hypothesis, deadline).await;
                    builder.record(index, item);
                }
            }
            ScheduleMode::Parallel => {
                let mut units = JoinSet::new();
                for (index, hypothesis) in hypotheses.into_iter().enumerate() {
                    let unit = self.clone();
                    units.spawn(async move {
                        (index, unit.process_item(&hypothesis, deadline).await)
                    });
                }
                while let Some(joined) = units.join_next().await {
                    match joined {
                        Ok((index, item)) => builder.record(index, item),
                        // The slot stays empty; finalize() records the
                        // abort as an explicit failure.
                        Err(err) => warn!(error = %err, "hypothesis unit aborted"),
                    }
                }
            }
        }

        let summary = builder.finalize();
        info!(
            succeeded = summary.succeeded_items,
            failed = summary.failed_items,
            elapsed_ms = summary.elapsed_ms,
            "validation run complete"
        );
        summary
    }

    /// Drive one hypothesis to its terminal state.
    async fn process_item(&self, hypothesis: &Hypothesis, deadline: Option<Instant>) -> ItemSummary {
        info!(hypothesis = %hypothesis.id, "processing hypothesis");

        let plan = self.expand_plan(hypothesis, deadline).await;
        debug!(hypothesis = %hypothesis.id, steps = plan.len(), "analysis plan ready");

        // Steps run sequentially within a unit to preserve plan order;
        // concurrency happens across hypotheses.
        let mut results = Vec::with_capacity(plan.len());
        for step in plan.steps() {
            results.push(self.run_step(hypothesis, step, deadline).await);
        }

        let succeeded_steps = results.iter().filter(|r| r.outcome.is_accepted()).count();
        if succeeded_steps == 0 {
            warn!(hypothesis = %hypothesis.id, "all plan steps failed");
            return ItemSummary {
                id: hypothesis.id.clone(),
                summary: hypothesis.summary.clone(),
                succeeded: false,
                steps: results.iter().map(StepRecord::from_result).collect(),
                report: None,
                fallback_report: false,
                failure: Some("all plan steps failed".to_string()),
            };
        }

        let (narrative, fallback_report) =
            self.generate_report(hypothesis, &results, deadline).await;
        let report = aggregate::compose_item_report(hypothesis, &results, &narrative);

        info!(
            hypothesis = %hypothesis.id,
            steps_succeeded = succeeded_steps,
            steps_total = results.len(),
            fallback_report,
            "hypothesis complete"
        );
        ItemSummary {
            id: hypothesis.id.clone(),
            summary: hypothesis.summary.clone(),
            succeeded: true,
            steps: results.iter().map(StepRecord::from_result).collect(),
            report: Some(report),
            fallback_report,
            failure: None,
        }
    }

    /// Ask the generator for an analysis plan; any failure falls back to
    /// the single default step so the unit never stalls.
    async fn expand_plan(&self, hypothesis: &Hypothesis, deadline: Option<Instant>) -> Plan {
        if deadline_reached(deadline) {
            warn!(hypothesis = %hypothesis.id, "run deadline reached; using fallback plan");
            return self.expander.fallback_plan(hypothesis);
        }

        let request = GenerateRequest::new(RequestType::Plan, &hypothesis.id, plan_context(hypothesis));
        match self.gated_generate(request, 1).await {
            Ok(generated) => {
                self.artifacts
                    .record(&hypothesis.id, "plan", 1, "plan", &generated.text);
                self.expander.expand_from_response(hypothesis, &generated.text)
            }
            Err(err) => {
                warn!(hypothesis = %hypothesis.id, error = %err, "plan generation failed; using fallback plan");
                self.expander.fallback_plan(hypothesis)
            }
        }
    }

    /// One plan step: bounded generate→execute attempts with failure
    /// feedback, judged by the execution acceptance checks.
    async fn run_step(
        &self,
        hypothesis: &Hypothesis,
        step: &PlanStep,
        deadline: Option<Instant>,
    ) -> StepResult {
        let attempt_loop = AttemptLoop::new(self.settings.query_retry_limit)
            .with_deadline(deadline)
            .with_label(format!("{}/{}", hypothesis.id, step.step_id));

        let (outcome, attempts) = attempt_loop
            .run(
                |attempt, prior_error| {
                    let request =
                        GenerateRequest::new(RequestType::Sql, &hypothesis.id, step_context(hypothesis, step))
                            .with_step(&step.step_id)
                            .with_prior_error(prior_error);
                    async move {
                        let generated = self
                            .gated_generate(request, attempt)
                            .await
                            .map_err(|err| AttemptFailure::bare(format!("SQL generation failed: {err}")))?;

                        // Degenerate output never reaches the executor but
                        // still consumes the attempt.
                        let sql = clean_generated_sql(&generated.text).map_err(AttemptFailure::bare)?;
                        self.artifacts
                            .record(&hypothesis.id, &step.step_id, attempt, "sql", &sql);

                        let table = self
                            .gated_execute(&sql)
                            .await
                            .map_err(|err| AttemptFailure::with_artifact(sql.clone(), err.to_string()))?;
                        Ok(Produced {
                            artifact: sql,
                            value: table,
                        })
                    }
                },
                |table| self.result_checks.check(table),
            )
            .await;

        StepResult {
            step: step.clone(),
            outcome,
            attempts,
        }
    }

    /// Narrative report for the hypothesis, judged by the quality checks.
    /// Exhaustion substitutes the deterministic fallback instead of
    /// propagating failure.
    async fn generate_report(
        &self,
        hypothesis: &Hypothesis,
        results: &[StepResult],
        deadline: Option<Instant>,
    ) -> (String, bool) {
        let context = report_context(hypothesis, results);
        let rows_total: usize = results
            .iter()
            .filter_map(|result| result.outcome.accepted())
            .map(TableResult::row_count)
            .sum();

        let attempt_loop = AttemptLoop::new(self.settings.report_retry_limit)
            .with_deadline(deadline)
            .with_label(format!("{}/report", hypothesis.id));

        let (outcome, _attempts) = attempt_loop
            .run(
                |attempt, prior_error| {
                    let request =
                        GenerateRequest::new(RequestType::Report, &hypothesis.id, context.clone())
                            .with_prior_error(prior_error);
                    async move {
                        let generated = self
                            .gated_generate(request, attempt)
                            .await
                            .map_err(|err| {
                                AttemptFailure::bare(format!("report generation failed: {err}"))
                            })?;
                        let text = generated.text.trim().to_string();
                        self.artifacts
                            .record(&hypothesis.id, "report", attempt, "report", &text);
                        Ok(Produced {
                            artifact: text.clone(),
                            value: text,
                        })
                    }
                },
                |text| self.report_checks.check(text),
            )
            .await;

        match outcome {
            Outcome::Accepted(report) => (report, false),
            Outcome::Exhausted { reason } => {
                warn!(
                    hypothesis = %hypothesis.id,
                    reason = %reason,
                    "report generation exhausted; substituting fallback report"
                );
                (aggregate::fallback_report(hypothesis, rows_total), true)
            }
        }
    }

    /// Generation call wrapped by the admission gate and the pacing gate,
    /// with usage recorded for every attempted call.
    async fn gated_generate(
        &self,
        request: GenerateRequest,
        attempt: u32,
    ) -> Result<Generated, GeneratorError> {
        let _slot = self.limiter.admit().await;
        self.rate.pace().await;

        let started = Instant::now();
        let result = self.generator.generate(request.clone()).await;

        let (provider, model, tokens_input, tokens_output) = match &result {
            Ok(generated) => (
                generated.provider.clone(),
                generated.model.clone(),
                generated.tokens_input,
                generated.tokens_output,
            ),
            Err(_) => (String::new(), String::new(), None, None),
        };
        self.monitor.record(CallRecord {
            timestamp: Utc::now(),
            request_type: request.request_type.as_str().to_string(),
            provider,
            model,
            hypothesis_id: request.hypothesis_id,
            step_id: request.step_id,
            attempt,
            tokens_input,
            tokens_output,
            duration_ms: started.elapsed().as_millis() as u64,
            succeeded: result.is_ok(),
        });
        result
    }

    /// Execution call wrapped by the admission gate.
    async fn gated_execute(&self, sql: &str) -> Result<TableResult, ExecutorError> {
        let _slot = self.limiter.admit().await;
        self.executor.run_query(sql).await
    }
}

fn deadline_reached(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|deadline| Instant::now() >= deadline)
}

fn plan_context(hypothesis: &Hypothesis) -> String {
    format!(
        "Hypothesis under validation:\n{}",
        hypothesis.to_json_block()
    )
}

fn step_context(hypothesis: &Hypothesis, step: &PlanStep) -> String {
    format!(
        "Hypothesis under validation:\n{}\n\nAnalysis step:\n- id: {}\n- title: {}\n- purpose: {}\n- requirements: {}",
        hypothesis.to_json_block(),
        step.step_id,
        step.title,
        step.purpose,
        step.requirements.join(", ")
    )
}

fn report_context(hypothesis: &Hypothesis, results: &[StepResult]) -> String {
    format!(
        "Hypothesis under validation:\n{}\n\nStep results:\n{}",
        hypothesis.to_json_block(),
        aggregate::render_results_context(results)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_context_carries_purpose_and_requirements() {
        let hypothesis = Hypothesis::new("H001", "mobile users churn earlier");
        let step = PlanStep {
            step_id: "step2".to_string(),
            title: "Comparison".to_string(),
            purpose: "Compare against desktop".to_string(),
            requirements: vec!["segment by device".to_string()],
        };
        let context = step_context(&hypothesis, &step);
        assert!(context.contains("H001"));
        assert!(context.contains("Compare against desktop"));
        assert!(context.contains("segment by device"));
    }

    #[test]
    fn load_hypotheses_reports_bad_files() {
        let err = load_hypotheses("does/not/exist.json").unwrap_err();
        assert!(matches!(err, PipelineError::HypothesisLoad { .. }));
    }
}
