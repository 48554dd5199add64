//! Configuration for hypoval runs
//!
//! All settings are plain immutable structs deserialized from a TOML file
//! and validated once at startup. Defaults mirror the constants the
//! pipeline was tuned with; any section or key may be omitted.
//!
//! # Configuration File Format
//!
//! ```toml
//! [pipeline]
//! mode = "sequential"
//! query_retry_limit = 5
//! report_retry_limit = 3
//! max_concurrent_calls = 3
//! min_call_interval_ms = 100
//! required_fields = ["step3_users", "step4_users", "transition_rate"]
//!
//! [llm]
//! provider = "openai"
//! api_key_env = "OPENAI_API_KEY"
//! model = "gpt-4o-mini"
//!
//! [warehouse]
//! endpoint = "https://warehouse.internal/api/query"
//!
//! [paths]
//! hypotheses = "data/hypotheses.json"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use crate::error::ConfigError;

/// Scheduling model for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleMode {
    /// One hypothesis, one step, one attempt in flight at a time
    #[default]
    Sequential,
    /// All hypotheses launched concurrently, outbound calls bounded by the
    /// shared admission gate
    Parallel,
}

impl std::fmt::Display for ScheduleMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::Parallel => write!(f, "parallel"),
        }
    }
}

impl FromStr for ScheduleMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sequential" => Ok(Self::Sequential),
            "parallel" => Ok(Self::Parallel),
            other => Err(ConfigError::Invalid(format!(
                "unknown schedule mode '{other}' (expected 'sequential' or 'parallel')"
            ))),
        }
    }
}

/// Retry, validation, and throttling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub mode: ScheduleMode,
    /// Attempts allowed per plan step (generate + execute cycles)
    pub query_retry_limit: u32,
    /// Attempts allowed for the narrative report per hypothesis
    pub report_retry_limit: u32,
    /// Minimum rows a query result must contain to be accepted
    pub min_rows: usize,
    /// Field names every accepted query result must contain
    pub required_fields: Vec<String>,
    /// Capacity of the shared admission gate for outbound calls
    pub max_concurrent_calls: usize,
    /// Minimum spacing between generation calls, in milliseconds
    pub min_call_interval_ms: u64,
    /// Upper bound on plan length; longer plans are truncated
    pub max_plan_steps: usize,
    /// Optional overall deadline; when reached, no new attempts are admitted
    pub deadline_secs: Option<u64>,
    /// Minimum character count for an accepted narrative report
    pub report_min_chars: usize,
    /// Topical marker an accepted narrative report must mention
    pub report_marker: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            mode: ScheduleMode::Sequential,
            query_retry_limit: 5,
            report_retry_limit: 3,
            min_rows: 1,
            required_fields: Vec::new(),
            max_concurrent_calls: 3,
            min_call_interval_ms: 100,
            max_plan_steps: 3,
            deadline_secs: None,
            report_min_chars: 100,
            report_marker: "hypothesis".to_string(),
        }
    }
}

/// Generator backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub provider: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Override for the provider endpoint
    pub base_url: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub request_timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: None,
            model: "gpt-4o-mini".to_string(),
            max_tokens: 2048,
            temperature: 0.2,
            request_timeout_secs: 60,
        }
    }
}

/// Query-service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseSettings {
    /// Endpoint accepting `{"query": "..."}` and returning `{columns, rows}`
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl Default for WarehouseSettings {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            timeout_secs: 120,
        }
    }
}

/// Input and output locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    /// JSON array of hypotheses
    pub hypotheses: String,
    /// Per-attempt artifact store root
    pub artifacts_dir: String,
    /// Per-hypothesis and combined report output
    pub reports_dir: String,
    /// Finalized run summary (JSON)
    pub summary_file: String,
    /// Append-only usage record log (JSONL)
    pub usage_log: String,
    /// Usage totals for the run (JSON)
    pub usage_summary_file: String,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            hypotheses: "data/hypotheses.json".to_string(),
            artifacts_dir: "results/artifacts".to_string(),
            reports_dir: "results/reports".to_string(),
            summary_file: "results/run_summary.json".to_string(),
            usage_log: "results/usage.jsonl".to_string(),
            usage_summary_file: "results/usage_summary.json".to_string(),
        }
    }
}

/// Complete, validated configuration for a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pipeline: PipelineSettings,
    pub llm: LlmSettings,
    pub warehouse: WarehouseSettings,
    pub paths: PathSettings,
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns `ConfigError::Read` or `ConfigError::Parse` on failure; the
    /// result is not yet validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Load a config file if it exists, otherwise fall back to defaults.
    ///
    /// # Errors
    /// Returns an error only for unreadable or unparseable files, never for
    /// a missing one.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            tracing::info!(path = %path.display(), "config file not found; using defaults");
            Ok(Self::default())
        }
    }

    /// Validate invariants once at startup.
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` naming the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.query_retry_limit == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.query_retry_limit must be at least 1".to_string(),
            ));
        }
        if self.pipeline.report_retry_limit == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.report_retry_limit must be at least 1".to_string(),
            ));
        }
        if self.pipeline.min_rows == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.min_rows must be at least 1".to_string(),
            ));
        }
        if self.pipeline.max_concurrent_calls == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.max_concurrent_calls must be at least 1".to_string(),
            ));
        }
        if self.pipeline.max_plan_steps == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.max_plan_steps must be at least 1".to_string(),
            ));
        }
        if self.pipeline.report_min_chars == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.report_min_chars must be at least 1".to_string(),
            ));
        }
        if self.llm.api_key_env.is_empty() {
            return Err(ConfigError::Invalid(
                "llm.api_key_env must not be empty".to_string(),
            ));
        }
        if self.warehouse.endpoint.is_empty() {
            return Err(ConfigError::Invalid(
                "warehouse.endpoint must be set".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.warehouse.endpoint = "https://warehouse.test/api/query".to_string();
        config
    }

    #[test]
    fn defaults_match_tuned_constants() {
        let settings = PipelineSettings::default();
        assert_eq!(settings.query_retry_limit, 5);
        assert_eq!(settings.report_retry_limit, 3);
        assert_eq!(settings.min_rows, 1);
        assert_eq!(settings.max_concurrent_calls, 3);
        assert_eq!(settings.min_call_interval_ms, 100);
        assert_eq!(settings.max_plan_steps, 3);
        assert_eq!(settings.mode, ScheduleMode::Sequential);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [pipeline]
            mode = "parallel"
            query_retry_limit = 10

            [warehouse]
            endpoint = "https://warehouse.test/api/query"
            "#,
        )
        .unwrap();

        assert_eq!(config.pipeline.mode, ScheduleMode::Parallel);
        assert_eq!(config.pipeline.query_retry_limit, 10);
        // Untouched keys keep their defaults
        assert_eq!(config.pipeline.report_retry_limit, 3);
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_retry_limit_is_rejected() {
        let mut config = valid_config();
        config.pipeline.query_retry_limit = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("query_retry_limit"));
    }

    #[test]
    fn missing_endpoint_is_rejected() {
        let config = Config::default();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("warehouse.endpoint"));
    }

    #[test]
    fn schedule_mode_parses() {
        assert_eq!(
            "parallel".parse::<ScheduleMode>().unwrap(),
            ScheduleMode::Parallel
        );
        assert!("bursty".parse::<ScheduleMode>().is_err());
    }

    #[test]
    fn load_or_default_tolerates_missing_file() {
        let config = Config::load_or_default("does/not/exist.toml").unwrap();
        assert_eq!(config.pipeline.query_retry_limit, 5);
    }
}
