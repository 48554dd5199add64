//! Analysis-plan expansion
//!
//! Turns one hypothesis into an ordered list of analysis steps by decoding
//! the generator's JSON plan envelope. Decoding is strict, with exactly one
//! fallback path: any malformed response yields the single default step, so
//! the pipeline never stalls on a bad plan.

use serde::Deserialize;
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::error::PlanError;
use crate::types::{Hypothesis, Plan, PlanStep};

/// Wire envelope emitted by the generator.
#[derive(Debug, Deserialize)]
struct PlanEnvelope {
    analysis_steps: Vec<PlanStep>,
}

/// Expands a hypothesis into an analysis plan.
#[derive(Debug, Clone)]
pub struct PlanExpander {
    max_steps: usize,
}

impl PlanExpander {
    #[must_use]
    pub fn new(max_steps: usize) -> Self {
        Self {
            max_steps: max_steps.max(1),
        }
    }

    /// Strictly decode a plan response.
    ///
    /// The response may wrap the JSON in a markdown fence; at most one
    /// fenced block is extracted before decoding. Empty step lists and
    /// duplicate step ids are decode failures. Plans longer than
    /// `max_steps` are truncated, preserving order.
    ///
    /// # Errors
    /// Returns `PlanError::Unparseable` for any malformed response.
    pub fn parse_plan(&self, raw: &str) -> Result<Plan, PlanError> {
        let body = extract_fenced_block(raw);
        let envelope: PlanEnvelope = serde_json::from_str(body.trim())
            .map_err(|err| PlanError::Unparseable(err.to_string()))?;

        let mut steps = envelope.analysis_steps;
        if steps.is_empty() {
            return Err(PlanError::Unparseable(
                "plan contains no steps".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for step in &steps {
            if !seen.insert(step.step_id.as_str()) {
                return Err(PlanError::Unparseable(format!(
                    "duplicate step id \"{}\"",
                    step.step_id
                )));
            }
        }

        if steps.len() > self.max_steps {
            debug!(
                steps = steps.len(),
                max_steps = self.max_steps,
                "truncating oversized plan"
            );
            steps.truncate(self.max_steps);
        }
        Ok(Plan::new(steps))
    }

    /// The single fallback: one step covering a minimal version of the
    /// hypothesis's intent.
    #[must_use]
    pub fn fallback_plan(&self, hypothesis: &Hypothesis) -> Plan {
        Plan::new(vec![PlanStep {
            step_id: "step1".to_string(),
            title: "Baseline analysis".to_string(),
            purpose: format!("Minimal validation of {}", hypothesis.id),
            requirements: vec!["Compute the baseline measure for the hypothesis".to_string()],
        }])
    }

    /// Decode a plan response, substituting the fallback on any failure.
    #[must_use]
    pub fn expand_from_response(&self, hypothesis: &Hypothesis, raw: &str) -> Plan {
        match self.parse_plan(raw) {
            Ok(plan) => plan,
            Err(err) => {
                warn!(hypothesis = %hypothesis.id, error = %err, "falling back to single-step plan");
                self.fallback_plan(hypothesis)
            }
        }
    }
}

/// Extract the contents of the first fenced code block, if any.
fn extract_fenced_block(raw: &str) -> &str {
    if let Some(start) = raw.find("```json") {
        let rest = &raw[start + 7..];
        match rest.find("```") {
            Some(end) => &rest[..end],
            None => rest,
        }
    } else if let Some(start) = raw.find("```") {
        let rest = &raw[start + 3..];
        match rest.find("```") {
            Some(end) => &rest[..end],
            None => rest,
        }
    } else {
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hypothesis() -> Hypothesis {
        Hypothesis::new("H001", "mobile users drop out between steps 3 and 4")
    }

    fn plan_json(ids: &[&str]) -> String {
        let steps: Vec<String> = ids
            .iter()
            .map(|id| {
                format!(
                    r#"{{"step_id": "{id}", "title": "Analysis {id}", "purpose": "Check {id}",
                        "sql_requirements": ["compare segments"]}}"#
                )
            })
            .collect();
        format!(r#"{{"analysis_steps": [{}]}}"#, steps.join(","))
    }

    #[test]
    fn parses_bare_json() {
        let expander = PlanExpander::new(3);
        let plan = expander.parse_plan(&plan_json(&["step1", "step2"])).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.steps()[0].step_id, "step1");
        assert_eq!(plan.steps()[1].step_id, "step2");
    }

    #[test]
    fn parses_fenced_json() {
        let expander = PlanExpander::new(3);
        let raw = format!(
            "Here is the plan:\n```json\n{}\n```\nLet me know if you need changes.",
            plan_json(&["step1"])
        );
        let plan = expander.parse_plan(&raw).unwrap();
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn truncates_to_max_steps() {
        let expander = PlanExpander::new(2);
        let plan = expander
            .parse_plan(&plan_json(&["step1", "step2", "step3"]))
            .unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.steps()[1].step_id, "step2");
    }

    #[test]
    fn duplicate_step_ids_fail_decode() {
        let expander = PlanExpander::new(3);
        let err = expander
            .parse_plan(&plan_json(&["step1", "step1"]))
            .unwrap_err();
        assert!(err.to_string().contains("duplicate step id"));
    }

    #[test]
    fn empty_plan_fails_decode() {
        let expander = PlanExpander::new(3);
        assert!(expander.parse_plan(r#"{"analysis_steps": []}"#).is_err());
    }

    #[test]
    fn unparseable_response_yields_single_fallback_step() {
        let expander = PlanExpander::new(3);
        let plan =
            expander.expand_from_response(&hypothesis(), "I could not produce a plan, sorry.");
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.steps()[0].step_id, "step1");
        assert!(plan.steps()[0].purpose.contains("H001"));
    }

    #[test]
    fn prose_around_fence_is_ignored() {
        let expander = PlanExpander::new(3);
        let raw = format!("```\n{}\n```", plan_json(&["step1"]));
        assert!(expander.parse_plan(&raw).is_ok());
    }
}
