//! Usage monitoring for outbound generation calls
//!
//! The monitor is a capability passed explicitly into the pipeline at
//! construction; its lifecycle is owned by the run. Recording is
//! fire-and-forget: a failed log append is reported via `warn!` and never
//! fails the pipeline.

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, warn};

/// Metadata for one outbound generation call.
#[derive(Debug, Clone, Serialize)]
pub struct CallRecord {
    pub timestamp: DateTime<Utc>,
    pub request_type: String,
    pub provider: String,
    pub model: String,
    pub hypothesis_id: String,
    pub step_id: Option<String>,
    pub attempt: u32,
    pub tokens_input: Option<u64>,
    pub tokens_output: Option<u64>,
    pub duration_ms: u64,
    pub succeeded: bool,
}

/// Aggregated usage for a run.
#[derive(Debug, Clone, Serialize)]
pub struct UsageSummary {
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub total_calls: u64,
    pub failed_calls: u64,
    pub total_tokens_input: u64,
    pub total_tokens_output: u64,
    pub calls_by_type: BTreeMap<String, u64>,
}

#[derive(Default)]
struct MonitorState {
    records: Vec<CallRecord>,
}

/// Records generation-call usage for one run.
pub struct UsageMonitor {
    started: Instant,
    started_at: DateTime<Utc>,
    log_path: Option<Utf8PathBuf>,
    state: Mutex<MonitorState>,
}

impl UsageMonitor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            started_at: Utc::now(),
            log_path: None,
            state: Mutex::new(MonitorState::default()),
        }
    }

    /// Also append each record to a JSONL file.
    #[must_use]
    pub fn with_log_file(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Record one call. Never fails; log-append errors are warned and
    /// swallowed.
    pub fn record(&self, record: CallRecord) {
        debug!(
            request_type = %record.request_type,
            hypothesis = %record.hypothesis_id,
            attempt = record.attempt,
            tokens_input = ?record.tokens_input,
            tokens_output = ?record.tokens_output,
            duration_ms = record.duration_ms,
            succeeded = record.succeeded,
            "generator call recorded"
        );

        if let Some(path) = &self.log_path
            && let Err(err) = append_jsonl(path, &record)
        {
            warn!(path = %path, error = %err, "failed to append usage record");
        }

        match self.state.lock() {
            Ok(mut state) => state.records.push(record),
            Err(_) => warn!("usage monitor state poisoned; dropping record"),
        }
    }

    /// Aggregate totals for the run so far.
    #[must_use]
    pub fn summary(&self) -> UsageSummary {
        let mut summary = UsageSummary {
            started_at: self.started_at,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
            total_calls: 0,
            failed_calls: 0,
            total_tokens_input: 0,
            total_tokens_output: 0,
            calls_by_type: BTreeMap::new(),
        };

        let Ok(state) = self.state.lock() else {
            warn!("usage monitor state poisoned; summary is empty");
            return summary;
        };
        for record in &state.records {
            summary.total_calls += 1;
            if !record.succeeded {
                summary.failed_calls += 1;
            }
            summary.total_tokens_input += record.tokens_input.unwrap_or(0);
            summary.total_tokens_output += record.tokens_output.unwrap_or(0);
            *summary
                .calls_by_type
                .entry(record.request_type.clone())
                .or_insert(0) += 1;
        }
        summary
    }

    /// Number of recorded calls so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.state.lock().map(|state| state.records.len()).unwrap_or(0)
    }
}

impl Default for UsageMonitor {
    fn default() -> Self {
        Self::new()
    }
}

fn append_jsonl(path: &Utf8PathBuf, record: &CallRecord) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let line = serde_json::to_string(record)?;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{line}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(request_type: &str, tokens: Option<(u64, u64)>, succeeded: bool) -> CallRecord {
        CallRecord {
            timestamp: Utc::now(),
            request_type: request_type.to_string(),
            provider: "mock".to_string(),
            model: "mock-model".to_string(),
            hypothesis_id: "H001".to_string(),
            step_id: Some("step1".to_string()),
            attempt: 1,
            tokens_input: tokens.map(|t| t.0),
            tokens_output: tokens.map(|t| t.1),
            duration_ms: 12,
            succeeded,
        }
    }

    #[test]
    fn summary_aggregates_totals() {
        let monitor = UsageMonitor::new();
        monitor.record(record("sql", Some((100, 20)), true));
        monitor.record(record("sql", Some((110, 25)), false));
        monitor.record(record("report", None, true));

        let summary = monitor.summary();
        assert_eq!(summary.total_calls, 3);
        assert_eq!(summary.failed_calls, 1);
        assert_eq!(summary.total_tokens_input, 210);
        assert_eq!(summary.total_tokens_output, 45);
        assert_eq!(summary.calls_by_type.get("sql"), Some(&2));
        assert_eq!(summary.calls_by_type.get("report"), Some(&1));
    }

    #[test]
    fn log_file_receives_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("usage.jsonl")).unwrap();
        let monitor = UsageMonitor::new().with_log_file(path.clone());

        monitor.record(record("plan", Some((50, 10)), true));
        monitor.record(record("sql", Some((80, 30)), true));

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"request_type\":\"plan\""));
    }

    #[test]
    fn unwritable_log_path_does_not_fail_recording() {
        // A directory path cannot be opened as a file; recording must still
        // retain the in-memory record.
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let monitor = UsageMonitor::new().with_log_file(path);

        monitor.record(record("sql", None, true));
        assert_eq!(monitor.call_count(), 1);
    }
}
