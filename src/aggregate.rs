//! Result aggregation and run summaries
//!
//! Composition functions here are pure: the same terminal step results
//! always produce byte-identical composites, and emitted ordering follows
//! plan order (per item) and original input order (per run), never
//! completion order.

use chrono::{DateTime, Utc};
use std::time::Instant;
use tracing::warn;

use crate::types::{Hypothesis, ItemSummary, Outcome, RunSummary, StepResult};

/// Render the successful step results, in plan order, as text blocks.
///
/// Used both as generation context for the narrative report and as the
/// supporting-data section of the composite artifact. Failed steps are
/// omitted here; their reasons live in the run summary.
#[must_use]
pub fn render_results_context(results: &[StepResult]) -> String {
    let mut out = String::new();
    for result in results {
        if let Outcome::Accepted(table) = &result.outcome {
            out.push_str(&format!(
                "### {} ({})\nPurpose: {}\n\n{}\n",
                result.step.title,
                result.step.step_id,
                result.step.purpose,
                table.render_text()
            ));
        }
    }
    out
}

/// Compose the per-hypothesis artifact: narrative first, then supporting
/// data in plan order.
#[must_use]
pub fn compose_item_report(
    hypothesis: &Hypothesis,
    results: &[StepResult],
    narrative: &str,
) -> String {
    format!(
        "# {}: {}\n\n{}\n\n## Supporting data\n\n{}",
        hypothesis.id,
        hypothesis.summary,
        narrative.trim(),
        render_results_context(results)
    )
}

/// Deterministic substitute used when narrative generation exhausts its
/// retries. Downstream aggregation always has something to work with.
#[must_use]
pub fn fallback_report(hypothesis: &Hypothesis, rows_total: usize) -> String {
    format!(
        "# {} validation result\n\n\
         ## Hypothesis\n{}\n\n\
         ## Outcome\n\
         The analysis completed, but detailed report generation did not pass quality checks.\n\
         Query data was retrieved successfully: {rows_total} rows in total.\n\n\
         Manual review of the step data is recommended.",
        hypothesis.id, hypothesis.summary
    )
}

/// Compose the run-wide artifact from succeeded items, in original input
/// order.
#[must_use]
pub fn compose_run_report(run: &RunSummary) -> String {
    let sections: Vec<String> = run
        .items
        .iter()
        .filter(|item| item.succeeded)
        .filter_map(|item| {
            item.report
                .as_ref()
                .map(|report| format!("## {}\n\n{}", item.id, report.trim()))
        })
        .collect();

    format!(
        "# Hypothesis validation report\n\n\
         **Run started**: {}\n\
         **Validated**: {} of {} hypotheses\n\n\
         {}\n",
        run.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
        run.succeeded_items,
        run.total_items,
        sections.join("\n\n")
    )
}

/// Accumulates per-item outcomes and finalizes the run summary once.
///
/// Items may be recorded in any order (bounded-parallel units complete
/// whenever they complete); the finalized summary is ordered by original
/// input position.
pub struct RunSummaryBuilder {
    started: Instant,
    started_at: DateTime<Utc>,
    ids: Vec<(String, String)>,
    slots: Vec<Option<ItemSummary>>,
}

impl RunSummaryBuilder {
    #[must_use]
    pub fn new(hypotheses: &[Hypothesis]) -> Self {
        Self {
            started: Instant::now(),
            started_at: Utc::now(),
            ids: hypotheses
                .iter()
                .map(|h| (h.id.clone(), h.summary.clone()))
                .collect(),
            slots: hypotheses.iter().map(|_| None).collect(),
        }
    }

    /// Record the terminal summary for the item at `index` (original input
    /// position).
    pub fn record(&mut self, index: usize, item: ItemSummary) {
        match self.slots.get_mut(index) {
            Some(slot) => *slot = Some(item),
            None => warn!(index, "item index out of range; summary entry dropped"),
        }
    }

    /// Finalize the summary. Unrecorded slots (an aborted unit) become
    /// failed entries with an explicit reason, so no item is silently
    /// dropped.
    #[must_use]
    pub fn finalize(self) -> RunSummary {
        let items: Vec<ItemSummary> = self
            .slots
            .into_iter()
            .zip(self.ids)
            .map(|(slot, (id, summary))| {
                slot.unwrap_or_else(|| {
                    warn!(hypothesis = %id, "unit aborted before producing a result");
                    ItemSummary {
                        id,
                        summary,
                        succeeded: false,
                        steps: Vec::new(),
                        report: None,
                        fallback_report: false,
                        failure: Some("hypothesis unit aborted before completion".to_string()),
                    }
                })
            })
            .collect();

        let succeeded_items = items.iter().filter(|item| item.succeeded).count();
        RunSummary {
            started_at: self.started_at,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
            total_items: items.len(),
            succeeded_items,
            failed_items: items.len() - succeeded_items,
            items,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PlanStep, TableResult};
    use serde_json::json;

    fn step(id: &str, title: &str) -> PlanStep {
        PlanStep {
            step_id: id.to_string(),
            title: title.to_string(),
            purpose: format!("purpose of {id}"),
            requirements: vec![],
        }
    }

    fn accepted(id: &str, title: &str) -> StepResult {
        StepResult {
            step: step(id, title),
            outcome: Outcome::Accepted(TableResult {
                columns: vec!["value".to_string()],
                rows: vec![vec![json!(1)]],
            }),
            attempts: vec![],
        }
    }

    fn exhausted(id: &str, title: &str, reason: &str) -> StepResult {
        StepResult {
            step: step(id, title),
            outcome: Outcome::Exhausted {
                reason: reason.to_string(),
            },
            attempts: vec![],
        }
    }

    #[test]
    fn composite_preserves_plan_order_and_skips_failures() {
        let results = vec![
            accepted("step1", "Baseline"),
            exhausted("step2", "Comparison", "missing column X"),
            accepted("step3", "Segmentation"),
        ];
        let context = render_results_context(&results);

        let baseline = context.find("Baseline").expect("step1 present");
        let segmentation = context.find("Segmentation").expect("step3 present");
        assert!(baseline < segmentation);
        assert!(!context.contains("Comparison"));
    }

    #[test]
    fn composition_is_idempotent() {
        let hypothesis = Hypothesis::new("H001", "mobile users churn earlier");
        let results = vec![accepted("step1", "Baseline"), accepted("step2", "Compare")];
        let first = compose_item_report(&hypothesis, &results, "The hypothesis holds: 42%.");
        let second = compose_item_report(&hypothesis, &results, "The hypothesis holds: 42%.");
        assert_eq!(first, second);
    }

    #[test]
    fn fallback_report_mentions_hypothesis_and_rows() {
        let hypothesis = Hypothesis::new("H007", "desktop converts better");
        let report = fallback_report(&hypothesis, 17);
        assert!(report.contains("H007"));
        assert!(report.contains("desktop converts better"));
        assert!(report.contains("17 rows"));
    }

    fn item(id: &str, succeeded: bool, report: Option<&str>) -> ItemSummary {
        ItemSummary {
            id: id.to_string(),
            summary: format!("summary of {id}"),
            succeeded,
            steps: vec![],
            report: report.map(str::to_string),
            fallback_report: false,
            failure: if succeeded {
                None
            } else {
                Some("all plan steps failed".to_string())
            },
        }
    }

    #[test]
    fn summary_orders_items_by_input_position() {
        let hypotheses = vec![
            Hypothesis::new("H001", "a"),
            Hypothesis::new("H002", "b"),
            Hypothesis::new("H003", "c"),
        ];
        let mut builder = RunSummaryBuilder::new(&hypotheses);
        // Completion order differs from input order.
        builder.record(2, item("H003", true, Some("r3")));
        builder.record(0, item("H001", true, Some("r1")));
        builder.record(1, item("H002", false, None));

        let summary = builder.finalize();
        assert_eq!(summary.total_items, 3);
        assert_eq!(summary.succeeded_items, 2);
        assert_eq!(summary.failed_items, 1);
        let ids: Vec<&str> = summary.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["H001", "H002", "H003"]);
    }

    #[test]
    fn unrecorded_slot_becomes_explicit_failure() {
        let hypotheses = vec![Hypothesis::new("H001", "a"), Hypothesis::new("H002", "b")];
        let mut builder = RunSummaryBuilder::new(&hypotheses);
        builder.record(0, item("H001", true, Some("r1")));

        let summary = builder.finalize();
        assert_eq!(summary.failed_items, 1);
        let missing = &summary.items[1];
        assert_eq!(missing.id, "H002");
        assert!(!missing.succeeded);
        assert!(missing.failure.as_deref().unwrap_or("").contains("aborted"));
    }

    #[test]
    fn run_report_includes_only_succeeded_items_in_order() {
        let hypotheses = vec![
            Hypothesis::new("H001", "a"),
            Hypothesis::new("H002", "b"),
            Hypothesis::new("H003", "c"),
        ];
        let mut builder = RunSummaryBuilder::new(&hypotheses);
        builder.record(0, item("H001", true, Some("report one")));
        builder.record(1, item("H002", false, None));
        builder.record(2, item("H003", true, Some("report three")));
        let summary = builder.finalize();

        let report = compose_run_report(&summary);
        assert!(report.contains("2 of 3"));
        let first = report.find("## H001").expect("H001 section");
        let third = report.find("## H003").expect("H003 section");
        assert!(first < third);
        assert!(!report.contains("## H002"));

        // Re-running over the same summary is byte-identical.
        assert_eq!(report, compose_run_report(&summary));
    }
}
