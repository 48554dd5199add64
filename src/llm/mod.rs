//! Generator abstraction for artifact generation
//!
//! All backends implement the [`Generator`] trait, so the pipeline can run
//! against any provider (or a scripted mock in tests) without knowing
//! implementation details. Requests carry the prior attempt's failure text
//! so backends can include it as corrective context.

mod openai_backend;

pub use openai_backend::OpenAiBackend;

use async_trait::async_trait;

use crate::error::GeneratorError;

/// What kind of artifact a generation call is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    /// A structured analysis plan
    Plan,
    /// A query for one analysis step
    Sql,
    /// A narrative validation report
    Report,
}

impl RequestType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Sql => "sql",
            Self::Report => "report",
        }
    }
}

impl std::fmt::Display for RequestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input to one generation call.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub request_type: RequestType,
    /// Hypothesis this call belongs to (usage accounting)
    pub hypothesis_id: String,
    /// Step this call belongs to, for step-level calls
    pub step_id: Option<String>,
    /// Rendered context: hypothesis description plus, for step-level calls,
    /// the step's purpose and requirements
    pub context: String,
    /// Failure reason from the previous attempt, absent on attempt 1
    pub prior_error: Option<String>,
}

impl GenerateRequest {
    #[must_use]
    pub fn new(
        request_type: RequestType,
        hypothesis_id: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        Self {
            request_type,
            hypothesis_id: hypothesis_id.into(),
            step_id: None,
            context: context.into(),
            prior_error: None,
        }
    }

    #[must_use]
    pub fn with_step(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = Some(step_id.into());
        self
    }

    #[must_use]
    pub fn with_prior_error(mut self, prior_error: Option<String>) -> Self {
        self.prior_error = prior_error;
        self
    }
}

/// Output of one generation call.
#[derive(Debug, Clone)]
pub struct Generated {
    /// Raw response text
    pub text: String,
    /// Provider name, e.g. "openai"
    pub provider: String,
    /// Model that was actually used
    pub model: String,
    pub tokens_input: Option<u64>,
    pub tokens_output: Option<u64>,
}

impl Generated {
    #[must_use]
    pub fn new(
        text: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            provider: provider.into(),
            model: model.into(),
            tokens_input: None,
            tokens_output: None,
        }
    }

    #[must_use]
    pub fn with_tokens(mut self, input: u64, output: u64) -> Self {
        self.tokens_input = Some(input);
        self.tokens_output = Some(output);
        self
    }
}

/// Trait for generation backends.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Produce a candidate artifact for the given request.
    ///
    /// # Errors
    ///
    /// Returns `GeneratorError` for transport failures, provider errors
    /// (auth, quota, outages), timeouts, and misconfiguration.
    async fn generate(&self, request: GenerateRequest) -> Result<Generated, GeneratorError>;
}
