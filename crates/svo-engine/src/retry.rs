//! Retry controller
//!
//! Wraps the attempts of one step: per-attempt timeout, expectation checks on
//! every successful outcome, classification of failures and exponential
//! backoff between retryable attempts. Backoff waits are plain timer awaits
//! inside the step's own task, so other steps keep being scheduled.

use crate::adapter::{Invocation, ServiceAdapter, StepOutcome};
use crate::context::TestContext;
use crate::error::AdapterError;
use std::time::Duration;
use svo_model::{
    ErrorKind, EventKind, ExpectationReport, FailureCause, InteractionOutcome, InteractionType,
    Observation, RetryPolicy, ServiceInteraction, StepError, TestEvent, TestStep,
};
use tokio::time::{timeout_at, Instant};

/// What happened across all attempts of one step
#[derive(Debug, Clone)]
pub struct RetryOutcome {
    /// Final outcome
    pub result: Result<StepOutcome, StepError>,
    /// Attempts made
    pub attempts: u32,
    /// Backoff waits actually scheduled
    pub delays: Vec<Duration>,
    /// Interaction for the final attempt
    pub interaction: ServiceInteraction,
}

/// Bounded retry/backoff around one adapter
#[derive(Debug, Clone)]
pub struct RetryController {
    max_backoff: Duration,
    step_timeout: Duration,
}

impl RetryController {
    /// Create with a backoff ceiling and a default per-attempt timeout
    #[inline]
    #[must_use]
    pub fn new(max_backoff: Duration, step_timeout: Duration) -> Self {
        Self {
            max_backoff,
            step_timeout,
        }
    }

    /// Run `invocation` against `adapter` until success, a terminal failure,
    /// attempt exhaustion or the `deadline`
    pub async fn execute_with_retry(
        &self,
        step: &TestStep,
        adapter: &dyn ServiceAdapter,
        policy: RetryPolicy,
        mut invocation: Invocation,
        context: &TestContext,
        deadline: Instant,
    ) -> RetryOutcome {
        let step_timeout = step.timeout().unwrap_or(self.step_timeout);
        let mut delays = Vec::new();
        let mut attempt = 0;

        loop {
            attempt += 1;
            invocation.attempt = attempt;

            let started = Instant::now();
            let attempt_deadline = (started + step_timeout).min(deadline);
            let called = timeout_at(attempt_deadline, adapter.execute(&invocation)).await;
            let elapsed = started.elapsed();

            let failure = match called {
                Ok(Ok(outcome)) => match verify(step, outcome, elapsed, context) {
                    Ok(outcome) => {
                        let interaction = success_interaction(step, &invocation, &outcome);
                        return RetryOutcome {
                            result: Ok(outcome),
                            attempts: attempt,
                            delays,
                            interaction,
                        };
                    }
                    Err(mismatch) => mismatch,
                },
                Ok(Err(err)) => err,
                Err(_) if attempt_deadline >= deadline => {
                    let error = StepError::new(ErrorKind::Timeout, "plan deadline exceeded")
                        .with_cause(FailureCause::Timeout)
                        .with_attempts(attempt, policy);
                    let err = AdapterError::timeout(elapsed);
                    return failed(step, &invocation, &err, error, delays);
                }
                Err(_) => AdapterError::timeout(step_timeout),
            };

            if failure.is_retryable() && policy.allows_another(attempt) {
                let delay = policy.delay_for_attempt(attempt, self.max_backoff);
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after {failure}"
                );
                context.emit(
                    TestEvent::new(EventKind::StepRetried)
                        .for_step(&step.id)
                        .with_detail(format!("attempt {attempt} failed: {failure}")),
                );
                delays.push(delay);
                if timeout_at(deadline, tokio::time::sleep(delay)).await.is_err() {
                    let error = StepError::new(ErrorKind::Timeout, "plan deadline exceeded during backoff")
                        .with_cause(FailureCause::Timeout)
                        .with_attempts(attempt, policy);
                    return failed(step, &invocation, &failure, error, delays);
                }
                continue;
            }

            let error = classify(&failure, attempt, policy);
            return failed(step, &invocation, &failure, error, delays);
        }
    }
}

fn failed(
    step: &TestStep,
    invocation: &Invocation,
    failure: &AdapterError,
    error: StepError,
    delays: Vec<Duration>,
) -> RetryOutcome {
    let interaction = ServiceInteraction::new(
        Some(invocation.correlation_id),
        step.id.clone(),
        step.service.clone(),
        InteractionType::from(step.kind()),
        failure.latency,
        InteractionOutcome::failure(failure.status_code, failure.to_string()),
    )
    .with_attempt(invocation.attempt);

    RetryOutcome {
        result: Err(error),
        attempts: invocation.attempt,
        delays,
        interaction,
    }
}

/// Terminal step error for the final failed attempt
fn classify(failure: &AdapterError, attempts: u32, policy: RetryPolicy) -> StepError {
    let kind = match failure.cause {
        FailureCause::Timeout => ErrorKind::Timeout,
        cause if cause.is_retryable() => ErrorKind::RetryableAdapterError,
        _ => ErrorKind::TerminalAdapterError,
    };
    let error = StepError::new(kind, failure.message.clone())
        .with_cause(failure.cause)
        .with_attempts(attempts, policy);
    if failure.is_retryable() {
        error.exhausted()
    } else {
        error
    }
}

/// Check expectations against a successful outcome
fn verify(
    step: &TestStep,
    mut outcome: StepOutcome,
    elapsed: Duration,
    context: &TestContext,
) -> Result<StepOutcome, AdapterError> {
    if outcome.latency.is_zero() {
        outcome.latency = elapsed;
    }
    if step.expect.is_empty() {
        return Ok(outcome);
    }

    let report = ExpectationReport::evaluate(
        &step.expect,
        &Observation {
            output: &outcome.output,
            status_code: outcome.status_code,
            latency: outcome.latency,
        },
    );
    context.record_expectations(report.passed, report.failed());

    if report.is_ok() {
        Ok(outcome)
    } else {
        let mut err = AdapterError::new(FailureCause::AssertionMismatch, report.message())
            .with_latency(outcome.latency);
        err.status_code = outcome.status_code;
        Err(err)
    }
}

fn success_interaction(step: &TestStep, invocation: &Invocation, outcome: &StepOutcome) -> ServiceInteraction {
    ServiceInteraction::new(
        outcome.correlation_id,
        step.id.clone(),
        step.service.clone(),
        InteractionType::from(step.kind()),
        outcome.latency,
        InteractionOutcome::success(outcome.status_code, outcome.summary.clone()),
    )
    .with_attempt(invocation.attempt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;
    use svo_model::{Expectation, StepAction, StepKind};

    struct Script(Mutex<VecDeque<Result<u16, AdapterError>>>);

    impl Script {
        fn new(replies: Vec<Result<u16, AdapterError>>) -> Self {
            Self(Mutex::new(replies.into()))
        }
    }

    #[async_trait]
    impl ServiceAdapter for Script {
        fn kind(&self) -> StepKind {
            StepKind::RestCall
        }

        async fn execute(&self, invocation: &Invocation) -> Result<StepOutcome, AdapterError> {
            let reply = self.0.lock().pop_front();
            match reply {
                Some(Ok(status)) => {
                    Ok(StepOutcome::success(invocation, json!({"ok": true})).with_status(status))
                }
                Some(Err(err)) => Err(err),
                None => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }
    }

    fn step() -> TestStep {
        TestStep::new("pay", "payments", StepAction::new(StepKind::RestCall, json!({})))
    }

    async fn run(step: &TestStep, adapter: &Script, policy: RetryPolicy) -> (RetryOutcome, TestContext) {
        let ctx = TestContext::new();
        let controller = RetryController::new(Duration::from_secs(30), Duration::from_secs(5));
        let invocation = Invocation::new(&ctx, step.id.clone(), step.service.clone(), step.action.clone());
        let deadline = Instant::now() + Duration::from_secs(600);
        let outcome = controller
            .execute_with_retry(step, adapter, policy, invocation, &ctx, deadline)
            .await;
        (outcome, ctx)
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures_with_backoff() {
        let adapter = Script::new(vec![
            Err(AdapterError::from_status(503, "unavailable")),
            Err(AdapterError::connection_refused("refused")),
            Ok(200),
        ]);
        let (outcome, ctx) = run(&step(), &adapter, RetryPolicy::new(3, 2.0, 50)).await;

        assert!(outcome.result.is_ok());
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.delays, vec![Duration::from_millis(50), Duration::from_millis(100)]);
        assert_eq!(outcome.interaction.attempt, 3);
        assert_eq!(ctx.events_of(EventKind::StepRetried).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_is_tagged_with_attempts_and_policy() {
        let policy = RetryPolicy::new(2, 2.0, 10);
        let adapter = Script::new(vec![
            Err(AdapterError::circuit_open("open")),
            Err(AdapterError::circuit_open("still open")),
            Ok(200),
        ]);
        let (outcome, _) = run(&step(), &adapter, policy).await;

        let error = outcome.result.unwrap_err();
        assert_eq!(error.kind, ErrorKind::RetryableAdapterError);
        assert_eq!(error.attempts, 2);
        assert_eq!(error.policy, Some(policy));
        assert!(error.retries_exhausted);
        assert!(!outcome.interaction.outcome.success);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_failure_short_circuits() {
        let adapter = Script::new(vec![Err(AdapterError::from_status(400, "bad request")), Ok(200)]);
        let (outcome, ctx) = run(&step(), &adapter, RetryPolicy::new(5, 2.0, 10)).await;

        let error = outcome.result.unwrap_err();
        assert_eq!(error.kind, ErrorKind::TerminalAdapterError);
        assert_eq!(error.cause, Some(FailureCause::ClientError));
        assert_eq!(outcome.attempts, 1);
        assert!(outcome.delays.is_empty());
        assert!(ctx.events_of(EventKind::StepRetried).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn expectation_mismatch_is_terminal() {
        let adapter = Script::new(vec![Ok(500), Ok(200)]);
        let step = step().expect(Expectation::StatusCode { equals: 200 });
        let (outcome, ctx) = run(&step, &adapter, RetryPolicy::new(3, 1.0, 10)).await;

        let error = outcome.result.unwrap_err();
        assert_eq!(error.cause, Some(FailureCause::AssertionMismatch));
        assert_eq!(outcome.attempts, 1);
        assert_eq!(ctx.metrics_snapshot().assertions_failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_timeout_is_retryable() {
        let adapter = Script::new(vec![]);
        let step = step().with_timeout_ms(100);
        let (outcome, _) = run(&step, &adapter, RetryPolicy::new(3, 2.0, 10)).await;

        let error = outcome.result.unwrap_err();
        assert_eq!(error.kind, ErrorKind::Timeout);
        assert_eq!(error.attempts, 3);
        assert!(error.retries_exhausted);
        assert_eq!(outcome.delays.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn plan_deadline_stops_attempts() {
        let ctx = TestContext::new();
        let adapter = Script::new(vec![]);
        let step = step();
        let controller = RetryController::new(Duration::from_secs(30), Duration::from_secs(60));
        let invocation = Invocation::new(&ctx, step.id.clone(), step.service.clone(), step.action.clone());
        let deadline = Instant::now() + Duration::from_secs(2);

        let outcome = controller
            .execute_with_retry(&step, &adapter, RetryPolicy::default(), invocation, &ctx, deadline)
            .await;
        let error = outcome.result.unwrap_err();
        assert_eq!(error.kind, ErrorKind::Timeout);
        assert!(!error.retries_exhausted);
        assert_eq!(outcome.attempts, 1);
        assert!(Instant::now() >= deadline);
    }
}
