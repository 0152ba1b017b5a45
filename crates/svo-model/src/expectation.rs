//! Expected outcomes for a step
//!
//! Expectations are checked against every successful adapter outcome; a
//! mismatch is a terminal assertion failure.

use crate::binding::lookup_path;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// One assertion over a step's outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Expectation {
    /// Response status code equals
    StatusCode {
        /// Expected code
        equals: u16,
    },
    /// Field at dotted path equals a JSON value
    FieldEquals {
        /// Dotted path into the output
        path: String,
        /// Expected value
        value: Value,
    },
    /// Field at dotted path is present and not null
    FieldExists {
        /// Dotted path into the output
        path: String,
    },
    /// String field at dotted path matches a regex
    FieldMatches {
        /// Dotted path into the output
        path: String,
        /// Regular expression
        pattern: String,
    },
    /// Adapter-reported latency is below a bound
    LatencyBelowMs {
        /// Exclusive upper bound in milliseconds
        max_ms: u64,
    },
}

/// What the expectation is checked against
#[derive(Debug, Clone, Copy)]
pub struct Observation<'a> {
    /// Captured output
    pub output: &'a Value,
    /// Response status code, if the protocol has one
    pub status_code: Option<u16>,
    /// Adapter-reported latency
    pub latency: Duration,
}

/// A failed expectation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("expected {expected}, {actual}")]
pub struct ExpectationFailure {
    /// What was expected
    pub expected: String,
    /// What was observed
    pub actual: String,
}

impl ExpectationFailure {
    fn new(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

impl Expectation {
    /// Check against an observation
    ///
    /// # Errors
    /// `ExpectationFailure` describing the mismatch.
    pub fn check(&self, observation: &Observation<'_>) -> Result<(), ExpectationFailure> {
        match self {
            Expectation::StatusCode { equals } => match observation.status_code {
                Some(code) if code == *equals => Ok(()),
                Some(code) => Err(ExpectationFailure::new(self.to_string(), format!("got {code}"))),
                None => Err(ExpectationFailure::new(self.to_string(), "no status code")),
            },
            Expectation::FieldEquals { path, value } => {
                match lookup_path(observation.output, path) {
                    Some(found) if found == value => Ok(()),
                    Some(found) => {
                        Err(ExpectationFailure::new(self.to_string(), format!("got {found}")))
                    }
                    None => Err(ExpectationFailure::new(self.to_string(), "field missing")),
                }
            }
            Expectation::FieldExists { path } => match lookup_path(observation.output, path) {
                Some(Value::Null) | None => {
                    Err(ExpectationFailure::new(self.to_string(), "field missing"))
                }
                Some(_) => Ok(()),
            },
            Expectation::FieldMatches { path, pattern } => {
                let regex = Regex::new(pattern).map_err(|e| {
                    ExpectationFailure::new(self.to_string(), format!("invalid pattern: {e}"))
                })?;
                match lookup_path(observation.output, path) {
                    Some(Value::String(text)) if regex.is_match(text) => Ok(()),
                    Some(found) => {
                        Err(ExpectationFailure::new(self.to_string(), format!("got {found}")))
                    }
                    None => Err(ExpectationFailure::new(self.to_string(), "field missing")),
                }
            }
            Expectation::LatencyBelowMs { max_ms } => {
                let actual = observation.latency.as_millis();
                if actual < u128::from(*max_ms) {
                    Ok(())
                } else {
                    Err(ExpectationFailure::new(self.to_string(), format!("took {actual}ms")))
                }
            }
        }
    }
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expectation::StatusCode { equals } => write!(f, "status {equals}"),
            Expectation::FieldEquals { path, value } => write!(f, "{path} == {value}"),
            Expectation::FieldExists { path } => write!(f, "{path} present"),
            Expectation::FieldMatches { path, pattern } => write!(f, "{path} =~ /{pattern}/"),
            Expectation::LatencyBelowMs { max_ms } => write!(f, "latency < {max_ms}ms"),
        }
    }
}

/// Tally of evaluated expectations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpectationReport {
    /// Expectations that held
    pub passed: u32,
    /// Expectations that failed
    pub failures: Vec<ExpectationFailure>,
}

impl ExpectationReport {
    /// Evaluate every expectation (no short-circuit)
    #[must_use]
    pub fn evaluate(expectations: &[Expectation], observation: &Observation<'_>) -> Self {
        let mut report = Self::default();
        for expectation in expectations {
            match expectation.check(observation) {
                Ok(()) => report.passed += 1,
                Err(failure) => report.failures.push(failure),
            }
        }
        report
    }

    /// Number of failed expectations
    #[inline]
    #[must_use]
    pub fn failed(&self) -> u32 {
        u32::try_from(self.failures.len()).unwrap_or(u32::MAX)
    }

    /// Whether every expectation held
    #[inline]
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    /// Failures joined into one message
    #[must_use]
    pub fn message(&self) -> String {
        self.failures
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn observe(output: &Value) -> Observation<'_> {
        Observation {
            output,
            status_code: Some(200),
            latency: Duration::from_millis(40),
        }
    }

    #[test]
    fn all_kinds_pass_on_matching_output() {
        let output = json!({"order": {"id": "ord-9", "total": 12}});
        let expectations = vec![
            Expectation::StatusCode { equals: 200 },
            Expectation::FieldEquals { path: "order.total".into(), value: json!(12) },
            Expectation::FieldExists { path: "order.id".into() },
            Expectation::FieldMatches { path: "order.id".into(), pattern: "^ord-\\d+$".into() },
            Expectation::LatencyBelowMs { max_ms: 100 },
        ];
        let report = ExpectationReport::evaluate(&expectations, &observe(&output));
        assert!(report.is_ok());
        assert_eq!(report.passed, 5);
    }

    #[test]
    fn report_collects_every_failure() {
        let output = json!({"order": {"id": null}});
        let expectations = vec![
            Expectation::StatusCode { equals: 201 },
            Expectation::FieldExists { path: "order.id".into() },
            Expectation::LatencyBelowMs { max_ms: 10 },
        ];
        let report = ExpectationReport::evaluate(&expectations, &observe(&output));
        assert_eq!(report.passed, 0);
        assert_eq!(report.failed(), 3);
        assert!(report.message().contains("status 201"));
    }

    #[test]
    fn expectations_round_trip_tagged() {
        let expectation: Expectation =
            serde_json::from_value(json!({"type": "STATUS_CODE", "equals": 204})).unwrap();
        assert_eq!(expectation, Expectation::StatusCode { equals: 204 });
    }
}
