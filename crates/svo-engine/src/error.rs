//! Error types for the SVO engine
//!
//! Provides error handling for:
//! - Adapter call failures and their retry classification
//! - Compensation failures during rollback
//! - Failure-analysis collaborator errors
//! - Configuration loading
//! - The orchestrator boundary (invalid plans, admission limits)

use std::path::PathBuf;
use std::time::Duration;
use svo_model::{ErrorKind, FailureCause, PayloadError, PlanError};

/// Main orchestrator error type
///
/// Only programming-contract violations and admission failures cross the
/// orchestrator boundary; step failures are folded into the `TestResult`.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Plan is structurally invalid
    #[error("invalid plan: {0}")]
    InvalidPlan(#[from] PlanError),

    /// Run admission limits exceeded
    #[error("resource exhausted: {limit} concurrent run(s) busy and {queued} already queued")]
    ResourceExhausted {
        /// Concurrent run limit
        limit: usize,
        /// Queue depth at rejection time
        queued: usize,
    },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl OrchestratorError {
    /// Taxonomy entry, if one applies
    #[inline]
    #[must_use]
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::ResourceExhausted { .. } => Some(ErrorKind::ResourceExhausted),
            Self::InvalidPlan(_) | Self::Config(_) => None,
        }
    }

    /// Check if the caller may resubmit later
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ResourceExhausted { .. })
    }
}

/// Failure reported by a protocol adapter
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{cause}: {message}")]
pub struct AdapterError {
    /// Classified cause
    pub cause: FailureCause,
    /// Detail
    pub message: String,
    /// Protocol status code, if the service answered
    pub status_code: Option<u16>,
    /// Time spent before the failure surfaced
    pub latency: Duration,
}

impl AdapterError {
    /// Create new adapter error
    #[inline]
    #[must_use]
    pub fn new(cause: FailureCause, message: impl Into<String>) -> Self {
        Self {
            cause,
            message: message.into(),
            status_code: None,
            latency: Duration::ZERO,
        }
    }

    /// Call exceeded its deadline
    #[must_use]
    pub fn timeout(after: Duration) -> Self {
        Self::new(
            FailureCause::Timeout,
            format!("no response within {}ms", after.as_millis()),
        )
        .with_latency(after)
    }

    /// Target refused the connection
    #[inline]
    #[must_use]
    pub fn connection_refused(message: impl Into<String>) -> Self {
        Self::new(FailureCause::ConnectionRefused, message)
    }

    /// Circuit breaker open
    #[inline]
    #[must_use]
    pub fn circuit_open(message: impl Into<String>) -> Self {
        Self::new(FailureCause::CircuitOpen, message)
    }

    /// Payload did not fit the adapter schema
    #[inline]
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(FailureCause::MalformedPayload, message)
    }

    /// Classify a protocol status code (5xx retryable, anything else terminal)
    #[must_use]
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let cause = if (500..600).contains(&status) {
            FailureCause::ServerError
        } else {
            FailureCause::ClientError
        };
        Self::new(cause, message).with_status(status)
    }

    /// With status code
    #[inline]
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    /// With latency
    #[inline]
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Check if a retry may help
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.cause.is_retryable()
    }
}

impl From<PayloadError> for AdapterError {
    fn from(err: PayloadError) -> Self {
        Self::malformed(err.to_string())
    }
}

/// Compensation failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum RollbackError {
    /// Compensation did not finish in time
    #[error("compensation timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Compensating adapter call failed
    #[error("compensating call failed: {0}")]
    Adapter(#[from] AdapterError),

    /// Action-specific failure
    #[error("compensation failed: {0}")]
    Failed(String),
}

/// Failure-analysis collaborator errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum AnalysisError {
    /// Analyzer could not be reached
    #[error("analyzer unavailable: {0}")]
    Unavailable(String),

    /// Analyzer answered with something unusable
    #[error("invalid analysis: {0}")]
    InvalidResponse(String),

    /// Analyzer did not answer in time
    #[error("analysis timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("cannot read {}: {source}", path.display())]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Config document is not valid TOML
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of bounds
    #[error("invalid config: {0}")]
    Invalid(String),
}
