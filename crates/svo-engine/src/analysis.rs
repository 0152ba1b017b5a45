//! Failure-analysis boundary
//!
//! On FAILED runs the orchestrator summarizes the failure into a
//! `FailurePayload` and hands it to an external analyzer.

use crate::error::AnalysisError;
use async_trait::async_trait;
use svo_model::{FailureAnalysis, FailurePayload, StepStatus, TestResult};

/// External root-cause analyzer
#[async_trait]
pub trait FailureAnalyzer: Send + Sync {
    /// Classify a failure
    ///
    /// # Errors
    /// Any `AnalysisError`; the orchestrator swallows it.
    async fn analyze(&self, payload: &FailurePayload) -> Result<FailureAnalysis, AnalysisError>;
}

/// Summarize a FAILED result
///
/// Picks the step named in the failure record, falling back to the last
/// failed step, and keeps the `recent` most recent interactions.
#[must_use]
pub fn build_payload(result: &TestResult, recent: usize) -> FailurePayload {
    let record = result.failure.as_ref();
    let named = record
        .and_then(|f| f.step_failure.as_ref())
        .and_then(|f| f.step_id.as_ref())
        .and_then(|id| result.step(id));
    let failed_step = named.or_else(|| {
        result
            .step_results
            .iter()
            .rev()
            .find(|r| r.status == StepStatus::Failed)
    });
    let error = failed_step.and_then(|s| s.error.as_ref());

    let message = error
        .map(|e| e.message.clone())
        .or_else(|| {
            record
                .and_then(|f| f.step_failure.as_ref())
                .map(|f| f.message.clone())
        })
        .unwrap_or_default();

    let skip = result.interactions.len().saturating_sub(recent);

    FailurePayload {
        run_id: result.run_id,
        correlation_id: result.correlation_id,
        plan_name: result.plan_name.clone(),
        failed_step: failed_step.map(|s| s.step_id.clone()),
        error_kind: error
            .map(|e| e.kind)
            .or_else(|| record.and_then(|f| f.step_failure.as_ref()).map(|f| f.kind)),
        cause: error.and_then(|e| e.cause),
        retryable: error.and_then(|e| e.cause).is_some_and(|c| c.is_retryable()),
        message,
        attempts: failed_step.map_or(0, |s| s.attempts),
        recent_interactions: result.interactions[skip..].to_vec(),
        rollback_failures: record.map(|f| f.rollback_failures.clone()).unwrap_or_default(),
    }
}
