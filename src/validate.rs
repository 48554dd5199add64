//! Acceptance predicates for query results and narrative reports
//!
//! Two instantiations are used by the pipeline: execution acceptance over
//! a tabular result, and quality acceptance over a generated narrative.
//! Both return a [`ValidationOutcome`] whose reason text feeds the next
//! generation attempt.

use crate::types::{TableResult, ValidationOutcome};

/// Minimum length of a generated query after fence-stripping and trimming.
pub const MIN_SQL_CHARS: usize = 20;

/// Strip markdown fences from a generated query and reject degenerate output.
///
/// An empty or too-short artifact is a generation failure: it consumes an
/// attempt and is never sent to the executor.
///
/// # Errors
/// Returns the failure reason as a plain string for attempt-loop feedback.
pub fn clean_generated_sql(raw: &str) -> Result<String, String> {
    let mut sql = raw.trim();
    if let Some(stripped) = sql.strip_prefix("```sql") {
        sql = stripped;
    } else if let Some(stripped) = sql.strip_prefix("```") {
        sql = stripped;
    }
    if let Some(stripped) = sql.strip_suffix("```") {
        sql = stripped;
    }
    let sql = sql.trim();

    let length = sql.chars().count();
    if length < MIN_SQL_CHARS {
        return Err(format!(
            "generated SQL too short after trimming ({length} chars, minimum {MIN_SQL_CHARS})"
        ));
    }
    Ok(sql.to_string())
}

/// Execution acceptance: shape checks over a tabular result.
#[derive(Debug, Clone)]
pub struct ResultChecks {
    min_rows: usize,
    required_fields: Vec<String>,
}

impl ResultChecks {
    #[must_use]
    pub fn new(min_rows: usize, required_fields: Vec<String>) -> Self {
        Self {
            min_rows,
            required_fields,
        }
    }

    #[must_use]
    pub fn check(&self, table: &TableResult) -> ValidationOutcome {
        if table.is_empty() {
            return ValidationOutcome::fail("query returned no rows");
        }
        if table.row_count() < self.min_rows {
            return ValidationOutcome::fail(format!(
                "insufficient result rows: {} (minimum {})",
                table.row_count(),
                self.min_rows
            ));
        }
        let missing: Vec<&str> = self
            .required_fields
            .iter()
            .filter(|field| !table.has_column(field))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return ValidationOutcome::fail(format!(
                "missing required fields: {}",
                missing.join(", ")
            ));
        }
        ValidationOutcome::pass()
    }
}

/// Quality acceptance for a generated narrative report.
#[derive(Debug, Clone)]
pub struct ReportChecks {
    min_chars: usize,
    marker: String,
}

impl ReportChecks {
    #[must_use]
    pub fn new(min_chars: usize, marker: impl Into<String>) -> Self {
        Self {
            min_chars,
            marker: marker.into(),
        }
    }

    #[must_use]
    pub fn check(&self, report: &str) -> ValidationOutcome {
        let length = report.chars().count();
        if length < self.min_chars {
            return ValidationOutcome::fail(format!(
                "report too short: {length} chars (minimum {})",
                self.min_chars
            ));
        }
        if !report.contains(&self.marker) {
            return ValidationOutcome::fail(format!(
                "report does not mention \"{}\"",
                self.marker
            ));
        }
        if !report.chars().any(|c| c.is_ascii_digit()) {
            return ValidationOutcome::fail("report contains no numeric evidence");
        }
        ValidationOutcome::pass()
    }
}
