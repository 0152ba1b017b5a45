//! End-to-end runs against scripted services
//!
//! Run with: cargo test --package svo-engine --test scenarios

use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use svo_engine::{AdapterRegistry, EngineConfig, ExecutionEngine, TestContext, TestOrchestrator};
use svo_model::{
    CompensationStatus, ErrorKind, EventKind, Expectation, FailureCause, RetryPolicy, StepAction,
    StepId, StepKind, StepStatus, TestExecutionPlan, TestStatus, TestStep,
};
use svo_test_utils::{
    init_test_tracing, journal, rest_compensation, rest_step, RecordingRollbackAction, Reply,
    ScriptedAdapter,
};
use tokio::time::Instant;

fn orchestrator(adapter: &Arc<ScriptedAdapter>, config: EngineConfig) -> TestOrchestrator {
    let registry = AdapterRegistry::with_builtins().with_adapter(Arc::clone(adapter) as _);
    TestOrchestrator::new(registry, config).unwrap()
}

#[tokio::test]
async fn independent_steps_pass_with_one_interaction_each() {
    init_test_tracing();
    let adapter = ScriptedAdapter::rest().into_arc();
    let plan = TestExecutionPlan::new("three-gets")
        .parallel()
        .with_step(rest_step("users", "/users"))
        .with_step(rest_step("orders", "/orders"))
        .with_step(rest_step("stock", "/stock"));

    let result = orchestrator(&adapter, EngineConfig::default())
        .execute_plan(&plan)
        .await
        .unwrap();

    assert_eq!(result.status, TestStatus::Passed);
    assert_eq!(result.interactions.len(), 3);
    assert!(result.rollback.is_empty());
    assert!(result.failure.is_none());
    assert!(result.failure_analysis.is_none());
    assert_eq!(result.metrics.steps_passed, 3);
    assert_eq!(result.metrics.total_retries, 0);
    assert!(result
        .step_results
        .iter()
        .all(|r| r.status == StepStatus::Passed && r.attempts == 1));
}

#[tokio::test]
async fn client_error_rolls_back_completed_steps() {
    let adapter = ScriptedAdapter::rest()
        .script("create", vec![Reply::ok(json!({"id": 42}))])
        .script("pay", vec![Reply::status(404)])
        .into_arc();
    let plan = TestExecutionPlan::new("create-then-pay")
        .with_step(
            rest_step("create", "/orders")
                .with_compensation(rest_compensation("/orders/${create.output.id}")),
        )
        .with_step(rest_step("pay", "/payments/${create.output.id}"))
        .with_step(rest_step("notify", "/notify"));

    let result = orchestrator(&adapter, EngineConfig::default())
        .execute_plan(&plan)
        .await
        .unwrap();

    assert_eq!(result.status, TestStatus::Failed);

    let pay = result.step(&"pay".into()).unwrap();
    assert_eq!(pay.error_kind(), Some(ErrorKind::TerminalAdapterError));
    assert_eq!(pay.error.as_ref().unwrap().cause, Some(FailureCause::ClientError));
    assert_eq!(pay.attempts, 1);
    assert_eq!(result.step(&"notify".into()).unwrap().status, StepStatus::NotRun);

    assert_eq!(result.rollback.records.len(), 1);
    let record = &result.rollback.records[0];
    assert_eq!(record.action_id.as_str(), "create:compensate");
    assert_eq!(record.status, CompensationStatus::Compensated);
    assert_eq!(adapter.compensated(), vec![StepId::new("create")]);

    let compensation = adapter.calls().into_iter().find(|c| c.compensation).unwrap();
    assert_eq!(compensation.body, json!({"method": "DELETE", "path": "/orders/42"}));
    assert_eq!(adapter.calls_for("pay")[0].body["path"], json!("/payments/42"));

    let failure = result.failure.as_ref().unwrap();
    assert_eq!(failure.step_failure.as_ref().unwrap().step_id, Some("pay".into()));
    assert!(!failure.rollback_failed());
}

#[tokio::test(start_paused = true)]
async fn transient_failures_back_off_then_pass() {
    let adapter = ScriptedAdapter::rest()
        .script("flaky", vec![Reply::refused(), Reply::refused()])
        .into_arc();
    let plan = TestExecutionPlan::new("flaky").with_step(
        rest_step("flaky", "/health").with_retry(RetryPolicy::new(3, 2.0, 50)),
    );

    let result = orchestrator(&adapter, EngineConfig::default())
        .execute_plan(&plan)
        .await
        .unwrap();

    assert_eq!(result.status, TestStatus::Passed);
    let flaky = &result.step_results[0];
    assert_eq!(flaky.attempts, 3);
    assert_eq!(flaky.retry_delays_ms, vec![50, 100]);
    assert_eq!(result.metrics.total_retries, 2);
    assert_eq!(result.events_of_kind(EventKind::StepRetried), 2);

    let calls = adapter.calls_for("flaky");
    assert_eq!(calls.iter().map(|c| c.attempt).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert!(calls[1].at - calls[0].at >= Duration::from_millis(50));
    assert!(calls[2].at - calls[1].at >= Duration::from_millis(100));

    // only the final attempt is traced
    assert_eq!(result.interactions.len(), 1);
    assert_eq!(result.interactions[0].attempt, 3);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_fail_the_run() {
    let adapter = ScriptedAdapter::rest()
        .script("down", vec![Reply::refused(), Reply::refused(), Reply::refused()])
        .into_arc();
    let plan = TestExecutionPlan::new("down")
        .with_step(rest_step("down", "/").with_retry(RetryPolicy::new(3, 2.0, 10)));

    let result = orchestrator(&adapter, EngineConfig::default())
        .execute_plan(&plan)
        .await
        .unwrap();

    assert_eq!(result.status, TestStatus::Failed);
    let error = result.step_results[0].error.as_ref().unwrap();
    assert_eq!(error.kind, ErrorKind::RetryableAdapterError);
    assert_eq!(error.cause, Some(FailureCause::ConnectionRefused));
    assert!(error.retries_exhausted);
    assert_eq!(error.attempts, 3);
    assert_eq!(error.policy, Some(RetryPolicy::new(3, 2.0, 10)));
}

#[tokio::test(start_paused = true)]
async fn plan_timeout_stops_hanging_step_and_rolls_back() {
    let adapter = ScriptedAdapter::rest()
        .script("hang", vec![Reply::Hang])
        .into_arc();
    let plan = TestExecutionPlan::new("deadline")
        .with_timeout_ms(2_000)
        .with_step(rest_step("reserve", "/stock").with_compensation(rest_compensation("/stock")))
        .with_step(rest_step("hang", "/slow"));

    let started = Instant::now();
    let result = orchestrator(&adapter, EngineConfig::default())
        .execute_plan(&plan)
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(result.status, TestStatus::Failed);
    assert!(elapsed >= Duration::from_secs(2), "finished after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "finished after {elapsed:?}");

    let hang = result.step(&"hang".into()).unwrap();
    assert_eq!(hang.error_kind(), Some(ErrorKind::Timeout));
    assert_eq!(
        result.failure.as_ref().unwrap().step_failure.as_ref().unwrap().kind,
        ErrorKind::Timeout
    );
    assert_eq!(result.events_of_kind(EventKind::PlanTimeout), 1);
    assert_eq!(adapter.compensated(), vec![StepId::new("reserve")]);
    assert_eq!(
        result.rollback.records[0].status,
        CompensationStatus::Compensated
    );
}

#[tokio::test(start_paused = true)]
async fn step_timeout_is_retried_within_policy() {
    let adapter = ScriptedAdapter::rest()
        .script("slow", vec![Reply::Hang])
        .into_arc();
    let plan = TestExecutionPlan::new("step-timeout").with_step(
        rest_step("slow", "/")
            .with_timeout_ms(500)
            .with_retry(RetryPolicy::new(2, 2.0, 100)),
    );

    let result = orchestrator(&adapter, EngineConfig::default())
        .execute_plan(&plan)
        .await
        .unwrap();

    assert_eq!(result.status, TestStatus::Passed);
    assert_eq!(result.step_results[0].attempts, 2);
    assert_eq!(result.step_results[0].retry_delays_ms, vec![100]);
}

#[tokio::test]
async fn best_effort_failure_is_partial_without_rollback() {
    let adapter = ScriptedAdapter::rest()
        .script("optional", vec![Reply::status(500)])
        .into_arc();
    let plan = TestExecutionPlan::new("partial")
        .with_default_retry(RetryPolicy::no_retry())
        .with_step(rest_step("main", "/").with_compensation(rest_compensation("/")))
        .with_step(rest_step("optional", "/extra").best_effort())
        .with_step(rest_step("after", "/after"));

    let result = orchestrator(&adapter, EngineConfig::default())
        .execute_plan(&plan)
        .await
        .unwrap();

    assert_eq!(result.status, TestStatus::Partial);
    assert_eq!(result.step(&"after".into()).unwrap().status, StepStatus::Passed);
    assert!(result.rollback.is_empty());
    assert!(adapter.compensated().is_empty());
}

#[tokio::test]
async fn failed_expectation_is_terminal() {
    let adapter = ScriptedAdapter::rest()
        .script("get", vec![Reply::ok(json!({"state": "PENDING"}))])
        .into_arc();
    let plan = TestExecutionPlan::new("expect").with_step(
        rest_step("get", "/orders/1")
            .expect(Expectation::StatusCode { equals: 200 })
            .expect(Expectation::FieldEquals {
                path: "state".into(),
                value: json!("SHIPPED"),
            }),
    );

    let result = orchestrator(&adapter, EngineConfig::default())
        .execute_plan(&plan)
        .await
        .unwrap();

    assert_eq!(result.status, TestStatus::Failed);
    let error = result.step_results[0].error.as_ref().unwrap();
    assert_eq!(error.kind, ErrorKind::TerminalAdapterError);
    assert_eq!(error.cause, Some(FailureCause::AssertionMismatch));
    assert_eq!(adapter.calls_for("get").len(), 1);
    assert_eq!(result.metrics.assertions_passed, 1);
    assert_eq!(result.metrics.assertions_failed, 1);
}

#[tokio::test]
async fn assertion_steps_check_execution_state() {
    let adapter = ScriptedAdapter::rest()
        .script("order", vec![Reply::ok(json!({"total": 30, "items": 3}))])
        .into_arc();
    let plan = TestExecutionPlan::new("assert")
        .with_step(rest_step("order", "/orders/7"))
        .with_step(
            TestStep::new(
                "total-matches",
                "local",
                StepAction::new(
                    StepKind::Assertion,
                    json!({"actual": "${order.output}", "description": "order total"}),
                ),
            )
            .expect(Expectation::FieldEquals {
                path: "total".into(),
                value: json!(30),
            })
            .expect(Expectation::FieldExists {
                path: "items".into(),
            }),
        );

    let result = orchestrator(&adapter, EngineConfig::default())
        .execute_plan(&plan)
        .await
        .unwrap();

    assert_eq!(result.status, TestStatus::Passed);
    assert_eq!(result.metrics.assertions_passed, 2);
    assert_eq!(result.interactions.len(), 2);
}

#[tokio::test]
async fn pre_registered_actions_compensate_after_step_compensations() {
    let adapter = ScriptedAdapter::rest()
        .script("second", vec![Reply::status(409)])
        .into_arc();
    let registry = AdapterRegistry::with_builtins().with_adapter(Arc::clone(&adapter) as _);
    let engine = ExecutionEngine::new(registry, EngineConfig::default());

    let log = journal();
    let context = Arc::new(TestContext::new());
    context
        .rollback()
        .register_single(RecordingRollbackAction::new("cleanup-fixtures", &log).into_arc());

    let plan = TestExecutionPlan::new("fixtures")
        .with_step(rest_step("first", "/a").with_compensation(rest_compensation("/a")))
        .with_step(rest_step("second", "/b"));

    let result = engine.run(&plan, Arc::clone(&context)).await.unwrap();

    assert_eq!(result.status, TestStatus::Failed);
    let order: Vec<&str> = result.rollback.order().iter().map(|id| id.as_str()).collect();
    assert_eq!(order, vec!["first:compensate", "cleanup-fixtures"]);
    assert_eq!(log.lock().len(), 1);
    assert!(context.rollback().is_empty());
}

#[tokio::test]
async fn result_serializes_to_json() {
    let adapter = ScriptedAdapter::rest().into_arc();
    let plan = TestExecutionPlan::new("json").with_step(rest_step("a", "/"));
    let result = orchestrator(&adapter, EngineConfig::default())
        .execute_plan(&plan)
        .await
        .unwrap();

    let encoded = result.to_json().unwrap();
    let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();
    assert_eq!(value["status"], json!("PASSED"));
    assert_eq!(value["plan_name"], json!("json"));
}

trait EventCount {
    fn events_of_kind(&self, kind: EventKind) -> usize;
}

impl EventCount for svo_model::TestResult {
    fn events_of_kind(&self, kind: EventKind) -> usize {
        self.events.iter().filter(|e| e.kind == kind).count()
    }
}
