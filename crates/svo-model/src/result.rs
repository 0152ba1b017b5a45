//! Run results
//!
//! `TestResult` is the frozen summary of one run: per-step results, the
//! correlation trace, lifecycle events, rollback outcomes, a metrics snapshot
//! and, on FAILED runs, the failure record and optional analysis.

use crate::analysis::FailureAnalysis;
use crate::event::TestEvent;
use crate::ids::{ActionId, CorrelationId, RunId, ServiceId, StepId};
use crate::interaction::ServiceInteraction;
use crate::policy::RetryPolicy;
use crate::step::{StepKind, TestStep};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Overall run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestStatus {
    /// Every step succeeded
    Passed,
    /// A blocking step failed terminally
    Failed,
    /// Only best-effort steps failed
    Partial,
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TestStatus::Passed => "PASSED",
            TestStatus::Failed => "FAILED",
            TestStatus::Partial => "PARTIAL",
        })
    }
}

/// Per-step status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    /// Step succeeded
    Passed,
    /// Step failed terminally
    Failed,
    /// Step was never dispatched
    NotRun,
}

/// Error taxonomy carried in results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Unresolved substitution reference; never retried
    DataBindingError,
    /// Transient failure that exhausted its retry policy
    RetryableAdapterError,
    /// Assertion/validation failure; never retried
    TerminalAdapterError,
    /// A compensation raised an error
    RollbackActionFailed,
    /// Run admission limits exceeded
    ResourceExhausted,
    /// Plan- or step-level deadline exceeded
    Timeout,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::DataBindingError => "DATA_BINDING_ERROR",
            ErrorKind::RetryableAdapterError => "RETRYABLE_ADAPTER_ERROR",
            ErrorKind::TerminalAdapterError => "TERMINAL_ADAPTER_ERROR",
            ErrorKind::RollbackActionFailed => "ROLLBACK_ACTION_FAILED",
            ErrorKind::ResourceExhausted => "RESOURCE_EXHAUSTED",
            ErrorKind::Timeout => "TIMEOUT",
        })
    }
}

/// Adapter-level failure cause
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCause {
    /// Call did not complete in time
    Timeout,
    /// Target refused the connection
    ConnectionRefused,
    /// 5xx-equivalent
    ServerError,
    /// Circuit breaker reported open
    CircuitOpen,
    /// 4xx-equivalent
    ClientError,
    /// Expected outcome did not hold
    AssertionMismatch,
    /// Payload did not fit the adapter schema
    MalformedPayload,
    /// No adapter serves the step kind
    NoAdapter,
    /// Adapter task ended abnormally
    AdapterCrashed,
}

impl FailureCause {
    /// RETRYABLE vs TERMINAL classification
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureCause::Timeout
                | FailureCause::ConnectionRefused
                | FailureCause::ServerError
                | FailureCause::CircuitOpen
        )
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureCause::Timeout => "timeout",
            FailureCause::ConnectionRefused => "connection refused",
            FailureCause::ServerError => "server error",
            FailureCause::CircuitOpen => "circuit open",
            FailureCause::ClientError => "client error",
            FailureCause::AssertionMismatch => "assertion mismatch",
            FailureCause::MalformedPayload => "malformed payload",
            FailureCause::NoAdapter => "no adapter",
            FailureCause::AdapterCrashed => "adapter crashed",
        })
    }
}

/// Terminal step error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepError {
    /// Taxonomy entry
    pub kind: ErrorKind,
    /// Adapter-level cause, if the adapter was reached
    pub cause: Option<FailureCause>,
    /// Human-readable message
    pub message: String,
    /// Attempts made
    pub attempts: u32,
    /// Policy applied
    pub policy: Option<RetryPolicy>,
    /// Whether a retryable failure ran out of attempts
    pub retries_exhausted: bool,
}

impl StepError {
    /// Create an error with no attempts or policy attached
    #[inline]
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            cause: None,
            message: message.into(),
            attempts: 0,
            policy: None,
            retries_exhausted: false,
        }
    }

    /// With cause
    #[inline]
    #[must_use]
    pub fn with_cause(mut self, cause: FailureCause) -> Self {
        self.cause = Some(cause);
        self
    }

    /// With attempts and policy
    #[inline]
    #[must_use]
    pub fn with_attempts(mut self, attempts: u32, policy: RetryPolicy) -> Self {
        self.attempts = attempts;
        self.policy = Some(policy);
        self
    }

    /// Mark retries exhausted
    #[inline]
    #[must_use]
    pub fn exhausted(mut self) -> Self {
        self.retries_exhausted = true;
        self
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if self.attempts > 0 {
            write!(f, " (after {} attempt(s))", self.attempts)?;
        }
        Ok(())
    }
}

/// Result of one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Step
    pub step_id: StepId,
    /// Target service
    pub service_id: ServiceId,
    /// Step kind
    pub kind: StepKind,
    /// Final status
    pub status: StepStatus,
    /// Whether the step was best-effort
    pub best_effort: bool,
    /// Attempts made
    pub attempts: u32,
    /// Backoff waits between attempts, in milliseconds
    pub retry_delays_ms: Vec<u64>,
    /// Wall time from dispatch to completion
    pub duration_ms: u64,
    /// Captured output on success
    pub output: Option<Value>,
    /// Error on failure
    pub error: Option<StepError>,
}

impl StepResult {
    fn base(step: &TestStep, status: StepStatus) -> Self {
        Self {
            step_id: step.id.clone(),
            service_id: step.service.clone(),
            kind: step.kind(),
            status,
            best_effort: step.best_effort,
            attempts: 0,
            retry_delays_ms: Vec::new(),
            duration_ms: 0,
            output: None,
            error: None,
        }
    }

    /// Passed step
    #[must_use]
    pub fn passed(step: &TestStep, attempts: u32, output: Value) -> Self {
        let mut result = Self::base(step, StepStatus::Passed);
        result.attempts = attempts;
        result.output = Some(output);
        result
    }

    /// Failed step
    #[must_use]
    pub fn failed(step: &TestStep, error: StepError) -> Self {
        let mut result = Self::base(step, StepStatus::Failed);
        result.attempts = error.attempts;
        result.error = Some(error);
        result
    }

    /// Never dispatched
    #[must_use]
    pub fn not_run(step: &TestStep) -> Self {
        Self::base(step, StepStatus::NotRun)
    }

    /// With timing
    #[inline]
    #[must_use]
    pub fn with_timing(mut self, duration_ms: u64, retry_delays_ms: Vec<u64>) -> Self {
        self.duration_ms = duration_ms;
        self.retry_delays_ms = retry_delays_ms;
        self
    }

    /// Error kind, if failed
    #[inline]
    #[must_use]
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// Per-action compensation status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompensationStatus {
    /// Compensation ran and succeeded
    Compensated,
    /// Precondition false; not invoked
    Skipped,
    /// Compensation raised an error
    Failed,
}

/// Outcome of one rollback action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationRecord {
    /// Action
    pub action_id: ActionId,
    /// Owning service
    pub service_id: ServiceId,
    /// Step whose effect was compensated
    pub step_id: Option<StepId>,
    /// Priority within its step boundary
    pub priority: u32,
    /// Status
    pub status: CompensationStatus,
    /// Error or skip reason
    pub message: Option<String>,
    /// Time spent
    pub duration_ms: u64,
}

/// Outcome of a rollback drain, in execution order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackResult {
    /// Per-action records
    pub records: Vec<CompensationRecord>,
}

impl RollbackResult {
    /// Whether nothing was drained
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of records with the given status
    #[must_use]
    pub fn count(&self, status: CompensationStatus) -> usize {
        self.records.iter().filter(|r| r.status == status).count()
    }

    /// Whether any compensation failed
    #[inline]
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.count(CompensationStatus::Failed) > 0
    }

    /// Record for an action
    #[must_use]
    pub fn record(&self, action: &ActionId) -> Option<&CompensationRecord> {
        self.records.iter().find(|r| &r.action_id == action)
    }

    /// Action ids in execution order
    #[must_use]
    pub fn order(&self) -> Vec<&ActionId> {
        self.records.iter().map(|r| &r.action_id).collect()
    }
}

/// The step failure that stopped forward execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    /// Failed step (`None` if the plan deadline passed between steps)
    pub step_id: Option<StepId>,
    /// Taxonomy entry
    pub kind: ErrorKind,
    /// Message
    pub message: String,
}

/// A compensation that failed during rollback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackFailure {
    /// Action
    pub action_id: ActionId,
    /// Step the action compensated
    pub step_id: Option<StepId>,
    /// Error message
    pub message: String,
}

/// Failure record distinguishing step failure from rollback failure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Step failure
    pub step_failure: Option<StepFailure>,
    /// Rollback failures
    pub rollback_failures: Vec<RollbackFailure>,
}

impl FailureRecord {
    /// Whether rollback itself partially failed
    #[inline]
    #[must_use]
    pub fn rollback_failed(&self) -> bool {
        !self.rollback_failures.is_empty()
    }
}

/// Metrics frozen at run end
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Run duration
    pub total_duration_ms: u64,
    /// Per-step durations
    pub step_durations_ms: BTreeMap<StepId, u64>,
    /// Per-step attempts
    pub step_attempts: BTreeMap<StepId, u32>,
    /// Retries across all steps
    pub total_retries: u32,
    /// Steps passed
    pub steps_passed: u32,
    /// Steps failed
    pub steps_failed: u32,
    /// Steps never dispatched
    pub steps_not_run: u32,
    /// Expectations that held
    pub assertions_passed: u32,
    /// Expectations that failed
    pub assertions_failed: u32,
    /// Interactions accepted into the trace
    pub interactions_recorded: u32,
    /// Interactions rejected by the tracker
    pub interactions_rejected: u32,
    /// Compensations that succeeded
    pub compensations_succeeded: u32,
    /// Compensations skipped
    pub compensations_skipped: u32,
    /// Compensations that failed
    pub compensations_failed: u32,
}

/// Terminal summary of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    /// Run
    pub run_id: RunId,
    /// Plan name
    pub plan_name: String,
    /// Correlation id stamped on every interaction
    pub correlation_id: CorrelationId,
    /// Overall status
    pub status: TestStatus,
    /// Run start
    pub started_at: DateTime<Utc>,
    /// Run end
    pub finished_at: DateTime<Utc>,
    /// Per-step results, in plan order
    pub step_results: Vec<StepResult>,
    /// Correlation trace
    pub interactions: Vec<ServiceInteraction>,
    /// Lifecycle events
    pub events: Vec<TestEvent>,
    /// Rollback outcome
    pub rollback: RollbackResult,
    /// Metrics
    pub metrics: MetricsSnapshot,
    /// Failure record (FAILED only)
    pub failure: Option<FailureRecord>,
    /// Failure analysis (FAILED only, when available)
    pub failure_analysis: Option<FailureAnalysis>,
}

impl TestResult {
    /// Result for a step
    #[must_use]
    pub fn step(&self, step: &StepId) -> Option<&StepResult> {
        self.step_results.iter().find(|r| &r.step_id == step)
    }

    /// Whether the run passed
    #[inline]
    #[must_use]
    pub fn is_passed(&self) -> bool {
        self.status == TestStatus::Passed
    }

    /// Serialize for the result consumer
    ///
    /// # Errors
    /// Propagates `serde_json` serialization errors.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::StepAction;
    use serde_json::json;

    #[test]
    fn cause_classification() {
        assert!(FailureCause::Timeout.is_retryable());
        assert!(FailureCause::ServerError.is_retryable());
        assert!(FailureCause::CircuitOpen.is_retryable());
        assert!(!FailureCause::ClientError.is_retryable());
        assert!(!FailureCause::AssertionMismatch.is_retryable());
        assert!(!FailureCause::MalformedPayload.is_retryable());
    }

    #[test]
    fn error_kind_serializes_screaming() {
        let json = serde_json::to_string(&ErrorKind::DataBindingError).unwrap();
        assert_eq!(json, "\"DATA_BINDING_ERROR\"");
        assert_eq!(ErrorKind::Timeout.to_string(), "TIMEOUT");
    }

    #[test]
    fn step_result_constructors() {
        let step = TestStep::new("a", "svc", StepAction::new(StepKind::RestCall, json!({})));
        let failed = StepResult::failed(
            &step,
            StepError::new(ErrorKind::TerminalAdapterError, "400")
                .with_attempts(1, RetryPolicy::no_retry()),
        );
        assert_eq!(failed.status, StepStatus::Failed);
        assert_eq!(failed.attempts, 1);
        assert_eq!(failed.error_kind(), Some(ErrorKind::TerminalAdapterError));
        assert_eq!(StepResult::not_run(&step).attempts, 0);
    }

    #[test]
    fn rollback_result_counts() {
        let record = |id: &str, status| CompensationRecord {
            action_id: ActionId::new(id),
            service_id: ServiceId::new("svc"),
            step_id: None,
            priority: 0,
            status,
            message: None,
            duration_ms: 0,
        };
        let result = RollbackResult {
            records: vec![
                record("a", CompensationStatus::Compensated),
                record("b", CompensationStatus::Skipped),
                record("c", CompensationStatus::Failed),
            ],
        };
        assert_eq!(result.count(CompensationStatus::Compensated), 1);
        assert!(result.has_failures());
        assert_eq!(result.order().len(), 3);
        assert!(RollbackResult::default().is_empty());
    }
}
