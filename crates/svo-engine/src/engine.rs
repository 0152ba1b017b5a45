//! Execution engine
//!
//! Turns a validated plan into correlated, retried and possibly compensated
//! adapter calls:
//! - Steps become ready once every dependency has finished
//! - Ready steps are dispatched in plan order onto their own tasks, at most
//!   `max_fan_out` at a time
//! - A blocking step failure stops further dispatch; in-flight steps finish,
//!   then the rollback ledger is drained
//! - The plan deadline bounds every in-flight step and stops dispatch

use crate::adapter::{AdapterRegistry, Invocation};
use crate::config::EngineConfig;
use crate::context::TestContext;
use crate::graph::StepGraph;
use crate::retry::RetryController;
use crate::rollback::AdapterCompensation;
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use svo_model::{
    CompensationStatus, ErrorKind, EventKind, FailureCause, FailureRecord, PlanError,
    RetryPolicy, RollbackFailure, RollbackResult, ServiceInteraction, StepError, StepFailure,
    StepResult, TestEvent, TestExecutionPlan, TestResult, TestStatus, TestStep,
};
use tokio::task::JoinError;
use tokio::time::Instant;
use tracing::Instrument;

/// Result of one dispatched step task
#[derive(Debug)]
struct StepRun {
    result: Result<crate::adapter::StepOutcome, StepError>,
    attempts: u32,
    delays: Vec<Duration>,
    interaction: Option<ServiceInteraction>,
    duration: Duration,
}

impl StepRun {
    fn failed(error: StepError, duration: Duration) -> Self {
        Self {
            attempts: error.attempts,
            result: Err(error),
            delays: Vec::new(),
            interaction: None,
            duration,
        }
    }

    fn crashed(err: &JoinError) -> Self {
        let message = if err.is_panic() {
            "step task panicked"
        } else {
            "step task cancelled"
        };
        Self::failed(
            StepError::new(ErrorKind::TerminalAdapterError, message)
                .with_cause(FailureCause::AdapterCrashed),
            Duration::ZERO,
        )
    }
}

/// Sequences the steps of one run
#[derive(Debug, Clone)]
pub struct ExecutionEngine {
    registry: Arc<AdapterRegistry>,
    config: Arc<EngineConfig>,
    retry: RetryController,
}

impl ExecutionEngine {
    /// Create engine
    #[must_use]
    pub fn new(registry: AdapterRegistry, config: EngineConfig) -> Self {
        let retry = RetryController::new(config.max_backoff(), config.step_timeout());
        Self {
            registry: Arc::new(registry),
            config: Arc::new(config),
            retry,
        }
    }

    /// Adapter registry
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    /// Configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Execute `plan` within `context`
    ///
    /// Step failures are reported inside the returned `TestResult`.
    ///
    /// # Errors
    /// `PlanError` if the plan is structurally invalid; no step runs.
    pub async fn run(
        &self,
        plan: &TestExecutionPlan,
        context: Arc<TestContext>,
    ) -> Result<TestResult, PlanError> {
        plan.validate()?;
        let graph = StepGraph::build(plan)?;

        let span = tracing::info_span!(
            "run",
            run_id = %context.run_id(),
            plan = %plan.name,
            correlation_id = %context.correlation_id(),
        );
        Ok(self.drive(plan, &graph, context).instrument(span).await)
    }

    async fn drive(
        &self,
        plan: &TestExecutionPlan,
        graph: &StepGraph,
        context: Arc<TestContext>,
    ) -> TestResult {
        context.seed_variables(&plan.variables);
        context.emit(
            TestEvent::new(EventKind::RunStarted)
                .with_detail(format!("{} step(s)", plan.steps.len())),
        );
        tracing::info!(steps = plan.steps.len(), parallel = plan.parallel, "run started");

        let deadline = Instant::now() + plan.timeout().unwrap_or_else(|| self.config.plan_timeout());
        let fallback = plan.default_retry.unwrap_or(self.config.default_retry);
        let fan_out = self.config.max_fan_out.max(1);

        let mut waiting_on = graph.in_degrees();
        let mut ready: BTreeSet<usize> = waiting_on
            .iter()
            .enumerate()
            .filter(|(_, deps)| **deps == 0)
            .map(|(index, _)| index)
            .collect();
        let mut results: Vec<Option<StepResult>> = vec![None; plan.steps.len()];
        let mut in_flight = FuturesUnordered::new();
        let mut halt: Option<StepFailure> = None;
        let mut deadline_passed = false;
        let mut best_effort_failed = false;

        loop {
            while halt.is_none() && !deadline_passed && in_flight.len() < fan_out {
                let Some(index) = ready.pop_first() else {
                    break;
                };
                if Instant::now() >= deadline {
                    deadline_passed = true;
                    break;
                }
                in_flight.push(self.dispatch(index, &plan.steps[index], &context, fallback, deadline));
            }

            let Some((index, joined)) = in_flight.next().await else {
                break;
            };
            let step = &plan.steps[index];
            let run = joined.unwrap_or_else(|err| StepRun::crashed(&err));

            if let Some(interaction) = run.interaction {
                context.record_interaction(interaction);
            }

            let result = match run.result {
                Ok(outcome) => {
                    context.merge_output(&step.id, outcome.output.clone(), outcome.status_code);
                    if let Some(descriptor) = &step.compensation {
                        let boundary = context.rollback().open_boundary(Some(step.id.clone()));
                        let action = AdapterCompensation::bind(step, descriptor, &context, &self.registry);
                        context.rollback().register(boundary, Arc::new(action));
                    }
                    context.emit(
                        TestEvent::new(EventKind::StepCompleted)
                            .for_step(&step.id)
                            .with_detail(format!("{} attempt(s)", run.attempts)),
                    );
                    tracing::info!(step_id = %step.id, attempts = run.attempts, "step completed");
                    release(graph, index, &mut waiting_on, &mut ready);
                    StepResult::passed(step, run.attempts, outcome.output)
                }
                Err(error) => {
                    context.emit(
                        TestEvent::new(EventKind::StepFailed)
                            .for_step(&step.id)
                            .with_detail(error.to_string()),
                    );
                    tracing::error!(step_id = %step.id, kind = %error.kind, "step failed: {}", error.message);

                    if error.kind == ErrorKind::Timeout && Instant::now() >= deadline && !deadline_passed {
                        deadline_passed = true;
                        context.emit(TestEvent::new(EventKind::PlanTimeout).for_step(&step.id));
                    }
                    if step.best_effort {
                        best_effort_failed = true;
                        release(graph, index, &mut waiting_on, &mut ready);
                    } else if halt.is_none() {
                        halt = Some(StepFailure {
                            step_id: Some(step.id.clone()),
                            kind: error.kind,
                            message: error.message.clone(),
                        });
                    }
                    StepResult::failed(step, error)
                }
            }
            .with_timing(millis(run.duration), run.delays.iter().map(|d| millis(*d)).collect());

            context.record_step_result(&result);
            results[index] = Some(result);
        }

        let unfinished = results.iter().filter(|r| r.is_none()).count();
        if deadline_passed && halt.is_none() && unfinished > 0 {
            tracing::error!(unfinished, "plan deadline passed between steps");
            context.emit(
                TestEvent::new(EventKind::PlanTimeout)
                    .with_detail(format!("{unfinished} step(s) never dispatched")),
            );
            halt = Some(StepFailure {
                step_id: None,
                kind: ErrorKind::Timeout,
                message: format!("plan deadline exceeded with {unfinished} step(s) not dispatched"),
            });
        }

        let step_results: Vec<StepResult> = results
            .into_iter()
            .zip(&plan.steps)
            .map(|(result, step)| result.unwrap_or_else(|| skip(step, &context)))
            .collect();

        let rollback = match &halt {
            Some(_) => self.roll_back(&context).await,
            None => RollbackResult::default(),
        };

        let status = if halt.is_some() {
            TestStatus::Failed
        } else if best_effort_failed {
            TestStatus::Partial
        } else {
            TestStatus::Passed
        };

        let failure = halt.map(|step_failure| FailureRecord {
            step_failure: Some(step_failure),
            rollback_failures: rollback
                .records
                .iter()
                .filter(|r| r.status == CompensationStatus::Failed)
                .map(|r| RollbackFailure {
                    action_id: r.action_id.clone(),
                    step_id: r.step_id.clone(),
                    message: r.message.clone().unwrap_or_default(),
                })
                .collect(),
        });

        context.emit(TestEvent::new(EventKind::RunCompleted).with_detail(status.to_string()));
        tracing::info!(%status, "run completed");

        TestResult {
            run_id: context.run_id(),
            plan_name: plan.name.clone(),
            correlation_id: context.correlation_id(),
            status,
            started_at: context.started_at(),
            finished_at: Utc::now(),
            step_results,
            interactions: context.trace(),
            events: context.events(),
            rollback,
            metrics: context.metrics_snapshot(),
            failure,
            failure_analysis: None,
        }
    }

    fn dispatch(
        &self,
        index: usize,
        step: &TestStep,
        context: &Arc<TestContext>,
        fallback: RetryPolicy,
        deadline: Instant,
    ) -> impl Future<Output = (usize, Result<StepRun, JoinError>)> {
        context.emit(TestEvent::new(EventKind::StepStarted).for_step(&step.id));
        tracing::info!(step_id = %step.id, kind = %step.kind(), "step started");

        let span = tracing::info_span!("step", step_id = %step.id, service = %step.service);
        let task = execute_step(
            step.clone(),
            Arc::clone(context),
            Arc::clone(&self.registry),
            self.retry.clone(),
            fallback,
            deadline,
        );
        tokio::spawn(task.instrument(span)).map(move |joined| (index, joined))
    }

    async fn roll_back(&self, context: &TestContext) -> RollbackResult {
        let pending = context.rollback().len();
        context.emit(
            TestEvent::new(EventKind::RollbackInitiated)
                .with_detail(format!("{pending} action(s) registered")),
        );
        tracing::warn!(pending, "rolling back");

        let rollback = context.rollback().drain(context).await;
        context.record_rollback(&rollback);

        context.emit(TestEvent::new(EventKind::RollbackCompleted).with_detail(format!(
            "{} compensated, {} skipped, {} failed",
            rollback.count(CompensationStatus::Compensated),
            rollback.count(CompensationStatus::Skipped),
            rollback.count(CompensationStatus::Failed),
        )));
        rollback
    }
}

async fn execute_step(
    step: TestStep,
    context: Arc<TestContext>,
    registry: Arc<AdapterRegistry>,
    retry: RetryController,
    fallback: RetryPolicy,
    deadline: Instant,
) -> StepRun {
    let started = Instant::now();

    let body = match context.bind(step.action.body()) {
        Ok(body) => body,
        Err(err) => {
            tracing::error!("{err}");
            return StepRun::failed(
                StepError::new(ErrorKind::DataBindingError, err.to_string()),
                started.elapsed(),
            );
        }
    };

    let Some(adapter) = registry.get(step.kind()) else {
        return StepRun::failed(
            StepError::new(
                ErrorKind::TerminalAdapterError,
                format!("no adapter registered for {}", step.kind()),
            )
            .with_cause(FailureCause::NoAdapter),
            started.elapsed(),
        );
    };

    let policy = step.effective_retry(fallback);
    let invocation = Invocation::new(
        &context,
        step.id.clone(),
        step.service.clone(),
        step.action.with_body(body),
    );
    let outcome = retry
        .execute_with_retry(&step, adapter.as_ref(), policy, invocation, &context, deadline)
        .await;

    StepRun {
        result: outcome.result,
        attempts: outcome.attempts,
        delays: outcome.delays,
        interaction: Some(outcome.interaction),
        duration: started.elapsed(),
    }
}

fn release(graph: &StepGraph, index: usize, waiting_on: &mut [usize], ready: &mut BTreeSet<usize>) {
    for dependent in graph.dependents(index) {
        waiting_on[dependent] = waiting_on[dependent].saturating_sub(1);
        if waiting_on[dependent] == 0 {
            ready.insert(dependent);
        }
    }
}

fn skip(step: &TestStep, context: &TestContext) -> StepResult {
    context.emit(TestEvent::new(EventKind::StepSkipped).for_step(&step.id));
    let result = StepResult::not_run(step);
    context.record_step_result(&result);
    result
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
