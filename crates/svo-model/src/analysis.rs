//! Failure analysis boundary types
//!
//! The engine hands a summarized `FailurePayload` to an external analyzer and
//! attaches the returned `FailureAnalysis` to FAILED results.

use crate::ids::{CorrelationId, RunId, StepId};
use crate::interaction::ServiceInteraction;
use crate::result::{ErrorKind, FailureCause, RollbackFailure};
use serde::{Deserialize, Serialize};

/// Summarized failure handed to the analyzer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailurePayload {
    /// Run
    pub run_id: RunId,
    /// Correlation id of the run
    pub correlation_id: CorrelationId,
    /// Plan name
    pub plan_name: String,
    /// Last failed step
    pub failed_step: Option<StepId>,
    /// Error classification
    pub error_kind: Option<ErrorKind>,
    /// Adapter-level cause
    pub cause: Option<FailureCause>,
    /// Whether the cause is in the retryable class
    pub retryable: bool,
    /// Failure message
    pub message: String,
    /// Attempts made by the failed step
    pub attempts: u32,
    /// Most recent interactions, oldest first
    pub recent_interactions: Vec<ServiceInteraction>,
    /// Compensations that failed
    pub rollback_failures: Vec<RollbackFailure>,
}

/// Root cause categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum RootCauseCategory {
    ServiceUnavailable,
    ContractViolation,
    DataInconsistency,
    Timeout,
    Configuration,
    TestDefect,
    Unknown,
}

/// Remediation suggestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationSuggestion {
    /// Human-readable description
    pub description: String,
    /// Confidence score (0.0 - 1.0)
    pub confidence: f64,
    /// Whether the fix can be applied without a human
    pub auto_applicable: bool,
}

impl RemediationSuggestion {
    /// Create new suggestion
    #[inline]
    #[must_use]
    pub fn new(description: impl Into<String>, confidence: f64) -> Self {
        Self {
            description: description.into(),
            confidence: confidence.clamp(0.0, 1.0),
            auto_applicable: false,
        }
    }

    /// Mark as auto-applicable
    #[inline]
    #[must_use]
    pub fn auto_applicable(mut self) -> Self {
        self.auto_applicable = true;
        self
    }
}

/// Analyzer verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureAnalysis {
    /// Root cause category
    pub root_cause: RootCauseCategory,
    /// Confidence in the category (0.0 - 1.0)
    pub confidence: f64,
    /// Suggested remediations
    pub suggestions: Vec<RemediationSuggestion>,
    /// References to similar past failures
    pub similar_failures: Vec<String>,
}

impl FailureAnalysis {
    /// Create new analysis
    #[inline]
    #[must_use]
    pub fn new(root_cause: RootCauseCategory, confidence: f64) -> Self {
        Self {
            root_cause,
            confidence: confidence.clamp(0.0, 1.0),
            suggestions: Vec::new(),
            similar_failures: Vec::new(),
        }
    }

    /// With suggestion
    #[inline]
    #[must_use]
    pub fn with_suggestion(mut self, suggestion: RemediationSuggestion) -> Self {
        self.suggestions.push(suggestion);
        self
    }

    /// With similar-failure reference
    #[inline]
    #[must_use]
    pub fn with_similar(mut self, reference: impl Into<String>) -> Self {
        self.similar_failures.push(reference.into());
        self
    }
}
