//! Run-scoped metrics accumulator
//!
//! Lives inside the run's `TestContext`; frozen into a `MetricsSnapshot`
//! when the run completes.

use std::time::Duration;
use svo_model::{CompensationStatus, MetricsSnapshot, RollbackResult, StepResult, StepStatus};

/// Mutable counters for one run
#[derive(Debug, Clone, Default)]
pub struct MetricsAccumulator {
    snapshot: MetricsSnapshot,
}

impl MetricsAccumulator {
    /// Empty accumulator
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in a finished (or never-run) step
    pub fn record_step(&mut self, result: &StepResult) {
        let m = &mut self.snapshot;
        match result.status {
            StepStatus::Passed => m.steps_passed += 1,
            StepStatus::Failed => m.steps_failed += 1,
            StepStatus::NotRun => {
                m.steps_not_run += 1;
                return;
            }
        }
        m.step_durations_ms.insert(result.step_id.clone(), result.duration_ms);
        m.step_attempts.insert(result.step_id.clone(), result.attempts);
        m.total_retries += result.attempts.saturating_sub(1);
    }

    /// Fold in evaluated expectations
    pub fn record_expectations(&mut self, passed: u32, failed: u32) {
        self.snapshot.assertions_passed += passed;
        self.snapshot.assertions_failed += failed;
    }

    /// Count an accepted or rejected interaction
    pub fn record_interaction(&mut self, accepted: bool) {
        if accepted {
            self.snapshot.interactions_recorded += 1;
        } else {
            self.snapshot.interactions_rejected += 1;
        }
    }

    /// Fold in a rollback drain
    pub fn record_rollback(&mut self, rollback: &RollbackResult) {
        for record in &rollback.records {
            match record.status {
                CompensationStatus::Compensated => self.snapshot.compensations_succeeded += 1,
                CompensationStatus::Skipped => self.snapshot.compensations_skipped += 1,
                CompensationStatus::Failed => self.snapshot.compensations_failed += 1,
            }
        }
    }

    /// Freeze with the run's total duration
    #[must_use]
    pub fn snapshot(&self, total: Duration) -> MetricsSnapshot {
        let mut snapshot = self.snapshot.clone();
        snapshot.total_duration_ms = u64::try_from(total.as_millis()).unwrap_or(u64::MAX);
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use svo_model::{ErrorKind, RetryPolicy, StepAction, StepError, StepKind, TestStep};

    #[test]
    fn counts_steps_and_retries() {
        let step = TestStep::new("a", "svc", StepAction::new(StepKind::RestCall, json!({})));
        let mut metrics = MetricsAccumulator::new();
        metrics.record_step(&StepResult::passed(&step, 3, json!({})).with_timing(250, vec![50, 100]));
        metrics.record_step(&StepResult::failed(
            &step,
            StepError::new(ErrorKind::TerminalAdapterError, "400")
                .with_attempts(1, RetryPolicy::no_retry()),
        ));
        metrics.record_step(&StepResult::not_run(&step));
        metrics.record_expectations(2, 1);
        metrics.record_interaction(true);
        metrics.record_interaction(false);

        let snapshot = metrics.snapshot(Duration::from_millis(900));
        assert_eq!(snapshot.total_duration_ms, 900);
        assert_eq!(snapshot.steps_passed, 1);
        assert_eq!(snapshot.steps_failed, 1);
        assert_eq!(snapshot.steps_not_run, 1);
        assert_eq!(snapshot.total_retries, 2);
        assert_eq!(snapshot.assertions_failed, 1);
        assert_eq!(snapshot.interactions_rejected, 1);
    }
}
