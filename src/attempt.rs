//! Bounded retry loop with failure-context feedback
//!
//! [`AttemptLoop`] wraps one generate→execute (or generate→validate) cycle:
//! up to `limit` attempts, each failure's reason fed into the next
//! producer call, the first accepted value ending the loop. Only two
//! outcomes escape: [`Outcome::Accepted`] or [`Outcome::Exhausted`].

use chrono::Utc;
use std::future::Future;
use std::time::Instant;
use tracing::{debug, warn};

use crate::types::{Attempt, Outcome, ValidationOutcome};

/// A value produced by one attempt cycle.
pub struct Produced<T> {
    /// The raw artifact (e.g. the generated query)
    pub artifact: String,
    /// The value submitted to the acceptance predicate
    pub value: T,
}

/// A failed attempt cycle.
#[derive(Debug)]
pub struct AttemptFailure {
    /// The artifact that was produced before the failure, if any
    pub artifact: Option<String>,
    /// Reason text, fed into the next generation call
    pub reason: String,
}

impl AttemptFailure {
    /// A failure before any artifact existed (e.g. generation error).
    #[must_use]
    pub fn bare(reason: impl Into<String>) -> Self {
        Self {
            artifact: None,
            reason: reason.into(),
        }
    }

    /// A failure after an artifact was produced (e.g. execution error).
    #[must_use]
    pub fn with_artifact(artifact: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            artifact: Some(artifact.into()),
            reason: reason.into(),
        }
    }
}

/// Bounded retry state machine for one unit of work.
#[derive(Debug)]
pub struct AttemptLoop {
    limit: u32,
    deadline: Option<Instant>,
    label: String,
}

impl AttemptLoop {
    #[must_use]
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            deadline: None,
            label: String::new(),
        }
    }

    /// Stop admitting attempts once the run-wide deadline has passed.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Context label for log lines, e.g. `"H001/step2"`.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Run up to `limit` attempts.
    ///
    /// `produce` is called with the 1-based attempt number and the previous
    /// attempt's failure reason (absent on attempt 1). `accept` judges each
    /// produced value; a rejected value consumes the attempt and its reason
    /// becomes the next call's context.
    ///
    /// Returns the terminal outcome together with the full attempt log.
    pub async fn run<T, P, Fut, A>(&self, mut produce: P, accept: A) -> (Outcome<T>, Vec<Attempt>)
    where
        P: FnMut(u32, Option<String>) -> Fut,
        Fut: Future<Output = Result<Produced<T>, AttemptFailure>>,
        A: Fn(&T) -> ValidationOutcome,
    {
        let mut attempts = Vec::new();
        let mut prior_error: Option<String> = None;

        for number in 1..=self.limit {
            if let Some(deadline) = self.deadline
                && Instant::now() >= deadline
            {
                let reason = format!("run deadline reached before attempt {number}");
                warn!(label = %self.label, attempt = number, "deadline reached; no further attempts admitted");
                return (Outcome::Exhausted { reason }, attempts);
            }

            debug!(label = %self.label, attempt = number, limit = self.limit, "starting attempt");

            match produce(number, prior_error.clone()).await {
                Ok(produced) => {
                    let verdict = accept(&produced.value);
                    attempts.push(Attempt {
                        number,
                        artifact: produced.artifact,
                        error: if verdict.passed {
                            None
                        } else {
                            Some(verdict.reason.clone())
                        },
                        timestamp: Utc::now(),
                    });
                    if verdict.passed {
                        debug!(label = %self.label, attempt = number, "attempt accepted");
                        return (Outcome::Accepted(produced.value), attempts);
                    }
                    warn!(label = %self.label, attempt = number, reason = %verdict.reason, "attempt rejected");
                    prior_error = Some(verdict.reason);
                }
                Err(failure) => {
                    warn!(label = %self.label, attempt = number, reason = %failure.reason, "attempt failed");
                    attempts.push(Attempt {
                        number,
                        artifact: failure.artifact.unwrap_or_default(),
                        error: Some(failure.reason.clone()),
                        timestamp: Utc::now(),
                    });
                    prior_error = Some(failure.reason);
                }
            }
        }

        let reason =
            prior_error.unwrap_or_else(|| "no attempts were admitted (retry limit is 0)".to_string());
        warn!(label = %self.label, limit = self.limit, reason = %reason, "attempts exhausted");
        (Outcome::Exhausted { reason }, attempts)
    }
}
