//! Core data model for the validation pipeline
//!
//! Hypotheses and plans are immutable for the duration of a run. Attempts
//! are owned by the loop that created them and kept only for diagnostics.
//! The run summary is the single aggregate record of a run and is finalized
//! exactly once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One business hypothesis to validate (a unit of work).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hypothesis {
    /// Stable identifier, e.g. "H001"
    pub id: String,
    /// One-line statement of the hypothesis
    pub summary: String,
    /// Opaque payload carried verbatim into generation context
    #[serde(default)]
    pub details: serde_json::Value,
}

impl Hypothesis {
    /// Create a hypothesis with no extra payload.
    #[must_use]
    pub fn new(id: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            summary: summary.into(),
            details: serde_json::Value::Null,
        }
    }

    /// Render the hypothesis as a JSON block for generation context.
    #[must_use]
    pub fn to_json_block(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| self.summary.clone())
    }
}

/// One step of an analysis plan.
///
/// The wire format matches the generator's plan envelope, so this type
/// doubles as the decode target in [`crate::plan`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub step_id: String,
    pub title: String,
    pub purpose: String,
    #[serde(rename = "sql_requirements", default)]
    pub requirements: Vec<String>,
}

/// An ordered, immutable analysis plan for one hypothesis.
///
/// Step ids are unique within a plan; [`crate::plan::PlanExpander`] enforces
/// this at decode time.
#[derive(Debug, Clone)]
pub struct Plan {
    steps: Vec<PlanStep>,
}

impl Plan {
    pub(crate) fn new(steps: Vec<PlanStep>) -> Self {
        Self { steps }
    }

    /// Steps in execution order.
    #[must_use]
    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// One generate(+execute/validate) cycle inside a retry loop.
#[derive(Debug, Clone, Serialize)]
pub struct Attempt {
    /// 1-based attempt number
    pub number: u32,
    /// The artifact produced this cycle (empty if generation itself failed)
    pub artifact: String,
    /// Failure reason, absent on the accepted attempt
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Ordered rows of named fields returned by the query engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl TableResult {
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// Deterministic plain-text rendering, used for report context and
    /// composite artifacts.
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = self.columns.join(" | ");
        out.push('\n');
        for row in &self.rows {
            let cells: Vec<String> = row.iter().map(cell_text).collect();
            out.push_str(&cells.join(" | "));
            out.push('\n');
        }
        out
    }
}

fn cell_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Verdict from an acceptance predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub passed: bool,
    pub reason: String,
}

impl ValidationOutcome {
    #[must_use]
    pub fn pass() -> Self {
        Self {
            passed: true,
            reason: String::new(),
        }
    }

    #[must_use]
    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: reason.into(),
        }
    }
}

/// Terminal state of an attempt loop.
///
/// These are the only two outcomes that ever escape a loop; callers branch
/// on the variant instead of catching errors.
#[derive(Debug, Clone)]
pub enum Outcome<T> {
    /// An attempt satisfied the acceptance predicate
    Accepted(T),
    /// The retry limit was exhausted; carries the last failure reason
    Exhausted { reason: String },
}

impl<T> Outcome<T> {
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }

    #[must_use]
    pub fn accepted(&self) -> Option<&T> {
        match self {
            Self::Accepted(value) => Some(value),
            Self::Exhausted { .. } => None,
        }
    }
}

/// Terminal record for one plan step.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub step: PlanStep,
    pub outcome: Outcome<TableResult>,
    /// Attempt log, retained for diagnostics and replay
    pub attempts: Vec<Attempt>,
}

/// Flattened per-step entry in the run summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_id: String,
    pub title: String,
    pub succeeded: bool,
    pub rows: Option<usize>,
    pub failure: Option<String>,
    pub attempts: u32,
}

impl StepRecord {
    #[must_use]
    pub fn from_result(result: &StepResult) -> Self {
        let (succeeded, rows, failure) = match &result.outcome {
            Outcome::Accepted(table) => (true, Some(table.row_count()), None),
            Outcome::Exhausted { reason } => (false, None, Some(reason.clone())),
        };
        Self {
            step_id: result.step.step_id.clone(),
            title: result.step.title.clone(),
            succeeded,
            rows,
            failure,
            attempts: result.attempts.len() as u32,
        }
    }
}

/// Per-hypothesis entry in the run summary.
///
/// A hypothesis succeeds when at least one plan step succeeded; the failed
/// steps still appear in `steps` with their reasons.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemSummary {
    pub id: String,
    pub summary: String,
    pub succeeded: bool,
    pub steps: Vec<StepRecord>,
    /// Composite report for the hypothesis, present when it succeeded
    pub report: Option<String>,
    /// True when the narrative loop exhausted and the fallback was used
    pub fallback_report: bool,
    /// Unit-level failure reason when no step succeeded
    pub failure: Option<String>,
}

/// Run-wide record of outcomes, finalized once per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub total_items: usize,
    pub succeeded_items: usize,
    pub failed_items: usize,
    /// Per-item entries in original input order
    pub items: Vec<ItemSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_table() -> TableResult {
        TableResult {
            columns: vec!["device".to_string(), "transition_rate".to_string()],
            rows: vec![
                vec![json!("mobile"), json!(0.42)],
                vec![json!("desktop"), json!(0.61)],
            ],
        }
    }

    #[test]
    fn table_column_lookup() {
        let table = sample_table();
        assert!(table.has_column("transition_rate"));
        assert!(!table.has_column("step3_users"));
        assert_eq!(table.row_count(), 2);
    }

    #[test]
    fn table_rendering_is_deterministic() {
        let table = sample_table();
        let first = table.render_text();
        assert_eq!(first, table.render_text());
        assert!(first.starts_with("device | transition_rate"));
        assert!(first.contains("mobile | 0.42"));
    }

    #[test]
    fn hypothesis_deserializes_with_optional_details() {
        let parsed: Hypothesis =
            serde_json::from_str(r#"{"id": "H001", "summary": "mobile users churn earlier"}"#)
                .unwrap();
        assert_eq!(parsed.id, "H001");
        assert!(parsed.details.is_null());
    }

    #[test]
    fn plan_step_decodes_wire_field_names() {
        let step: PlanStep = serde_json::from_str(
            r#"{"step_id": "step1", "title": "Baseline", "purpose": "Measure the base rate",
                "sql_requirements": ["compute the transition rate"]}"#,
        )
        .unwrap();
        assert_eq!(step.requirements.len(), 1);
    }

    #[test]
    fn outcome_accessors() {
        let accepted: Outcome<u32> = Outcome::Accepted(7);
        assert!(accepted.is_accepted());
        assert_eq!(accepted.accepted(), Some(&7));

        let exhausted: Outcome<u32> = Outcome::Exhausted {
            reason: "missing column X".to_string(),
        };
        assert!(!exhausted.is_accepted());
        assert!(exhausted.accepted().is_none());
    }
}
