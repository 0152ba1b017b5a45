//! Error types for the SVO data model
//!
//! Provides error handling for:
//! - Plan structure validation
//! - Retry policy bounds
//! - Data-binding resolution
//! - Typed payload decoding

use crate::ids::StepId;

/// Structural plan errors (programming-contract violations)
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// Plan has no steps
    #[error("plan '{0}' has no steps")]
    Empty(String),

    /// Two steps share an identifier
    #[error("duplicate step id: {0}")]
    DuplicateStep(StepId),

    /// A declared dependency does not name a step in the plan
    #[error("step {step} depends on unknown step {dependency}")]
    UnknownDependency {
        /// Declaring step
        step: StepId,
        /// Missing dependency
        dependency: StepId,
    },

    /// A step depends on itself
    #[error("step {0} depends on itself")]
    SelfDependency(StepId),

    /// Dependencies form a cycle
    #[error("dependency cycle through step {0}")]
    DependencyCycle(StepId),

    /// Retry policy violates its bounds
    #[error("invalid retry policy{}: {source}", step.as_ref().map(|s| format!(" on step {s}")).unwrap_or_default())]
    InvalidRetryPolicy {
        /// Owning step, `None` for the plan default
        step: Option<StepId>,
        /// Underlying policy violation
        #[source]
        source: PolicyError,
    },

    /// Plan document could not be parsed
    #[error("plan parse error: {0}")]
    Parse(String),
}

/// Retry policy bound violations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PolicyError {
    /// `max_attempts` must be at least 1
    #[error("max_attempts must be >= 1 (got {0})")]
    ZeroAttempts(u32),

    /// `backoff_multiplier` must be finite and at least 1.0
    #[error("backoff_multiplier must be >= 1.0 (got {0})")]
    InvalidMultiplier(f64),
}

/// Unresolved substitution references
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindingError {
    /// One or more `${...}` references had no value in the execution state
    #[error("unresolved reference(s): {}", references.join(", "))]
    Unresolved {
        /// The missing references, in payload order
        references: Vec<String>,
    },
}

impl BindingError {
    /// References that failed to resolve
    #[inline]
    #[must_use]
    pub fn references(&self) -> &[String] {
        match self {
            Self::Unresolved { references } => references,
        }
    }
}

/// Payload decoding errors at the adapter boundary
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    /// Payload kind does not match the requested schema
    #[error("payload kind mismatch: expected {expected}, got {actual}")]
    KindMismatch {
        /// Kind the decoder expected
        expected: String,
        /// Kind carried by the action
        actual: String,
    },

    /// Payload body does not fit the schema
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_policy_display_names_step() {
        let err = PlanError::InvalidRetryPolicy {
            step: Some(StepId::new("pay")),
            source: PolicyError::ZeroAttempts(0),
        };
        let text = err.to_string();
        assert!(text.contains("on step pay"));
        assert!(text.contains("max_attempts"));
    }

    #[test]
    fn binding_error_lists_references() {
        let err = BindingError::Unresolved {
            references: vec!["a.output.id".into(), "vars.tenant".into()],
        };
        assert_eq!(err.references().len(), 2);
        assert!(err.to_string().contains("a.output.id, vars.tenant"));
    }
}
