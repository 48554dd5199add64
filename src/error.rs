//! Error taxonomy for the validation pipeline
//!
//! Generation, execution, and validation failures are recovered locally
//! inside an attempt loop; the types here exist so each failure class maps
//! to a stable, human-readable reason string that can be fed back into the
//! next generation call and recorded in the run summary.

use std::time::Duration;
use thiserror::Error;

/// Failures raised by a [`crate::llm::Generator`] backend.
#[derive(Debug, Error)]
pub enum GeneratorError {
    /// Transport-level failure (HTTP connectivity, malformed response body)
    #[error("transport error: {0}")]
    Transport(String),

    /// Provider authentication failure (401, 403, missing API key)
    #[error("provider authentication error: {0}")]
    ProviderAuth(String),

    /// Provider quota/rate limit exceeded (429)
    #[error("provider quota exceeded: {0}")]
    ProviderQuota(String),

    /// Provider service outage (5xx errors)
    #[error("provider outage: {0}")]
    ProviderOutage(String),

    /// Invocation timed out
    #[error("timeout after {duration:?}")]
    Timeout { duration: Duration },

    /// Configuration error (missing API key env var, bad base URL)
    #[error("misconfiguration: {0}")]
    Misconfiguration(String),
}

/// Failures raised by a [`crate::warehouse::QueryExecutor`].
///
/// `Query` carries the remote engine's message verbatim; attempt loops feed
/// that text into the next generation call unchanged.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Transport-level failure (connectivity, 5xx, malformed response)
    #[error("transport error: {0}")]
    Transport(String),

    /// The engine rejected or failed the query
    #[error("{0}")]
    Query(String),

    /// Query timed out
    #[error("query timed out after {duration:?}")]
    Timeout { duration: Duration },
}

/// A generated analysis plan that could not be decoded.
///
/// Never fatal: the expander substitutes the single-step fallback plan.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("plan response could not be parsed: {0}")]
    Unparseable(String),
}

/// Configuration loading and validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Fatal, run-level failures.
///
/// Per-hypothesis and per-step failures never surface here; they terminate
/// in the run summary instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to load hypotheses from {path}: {reason}")]
    HypothesisLoad { path: String, reason: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
