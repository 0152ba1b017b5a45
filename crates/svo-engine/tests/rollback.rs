//! Rollback coordinator ordering and failure isolation

use proptest::prelude::*;
use std::time::Duration;
use svo_engine::TestContext;
use svo_model::{CompensationStatus, EventKind};
use svo_test_utils::{journal, Behavior, RecordingRollbackAction};

fn ids(result: &svo_model::RollbackResult) -> Vec<String> {
    result.order().iter().map(|id| id.as_str().to_string()).collect()
}

#[tokio::test]
async fn lower_priority_runs_first_within_a_boundary() {
    let log = journal();
    let context = TestContext::new();
    let coordinator = context.rollback();

    let boundary = coordinator.open_boundary(None);
    coordinator.register(boundary, RecordingRollbackAction::new("a", &log).with_priority(2).into_arc());
    coordinator.register(boundary, RecordingRollbackAction::new("b", &log).with_priority(1).into_arc());

    let result = coordinator.drain(&context).await;
    assert_eq!(ids(&result), vec!["b", "a"]);
    assert_eq!(log.lock().iter().map(|id| id.as_str()).collect::<Vec<_>>(), vec!["b", "a"]);
    assert_eq!(result.count(CompensationStatus::Compensated), 2);
}

#[tokio::test]
async fn later_boundaries_compensate_first() {
    let log = journal();
    let context = TestContext::new();
    let coordinator = context.rollback();

    for id in ["first", "second", "third"] {
        coordinator.register_single(RecordingRollbackAction::new(id, &log).into_arc());
    }
    assert_eq!(
        coordinator.pending().iter().map(|id| id.as_str()).collect::<Vec<_>>(),
        vec!["third", "second", "first"]
    );

    let result = coordinator.drain(&context).await;
    assert_eq!(ids(&result), vec!["third", "second", "first"]);
}

#[tokio::test]
async fn failing_or_unrunnable_actions_do_not_stop_the_drain() {
    let log = journal();
    let context = TestContext::new();
    let coordinator = context.rollback();

    coordinator.register_single(RecordingRollbackAction::new("ok", &log).into_arc());
    coordinator.register_single(
        RecordingRollbackAction::new("broken", &log)
            .behaving(Behavior::Fail)
            .into_arc(),
    );
    coordinator.register_single(
        RecordingRollbackAction::new("blocked", &log)
            .not_runnable()
            .into_arc(),
    );
    coordinator.register_single(
        RecordingRollbackAction::new("explodes", &log)
            .behaving(Behavior::Panic)
            .into_arc(),
    );

    let result = coordinator.drain(&context).await;

    assert_eq!(ids(&result), vec!["explodes", "blocked", "broken", "ok"]);
    let status = |id: &str| result.record(&id.into()).unwrap().status;
    assert_eq!(status("explodes"), CompensationStatus::Failed);
    assert_eq!(status("blocked"), CompensationStatus::Skipped);
    assert_eq!(status("broken"), CompensationStatus::Failed);
    assert_eq!(status("ok"), CompensationStatus::Compensated);
    assert!(result.has_failures());

    // skipped actions are never executed
    assert!(!log.lock().iter().any(|id| id.as_str() == "blocked"));
    assert_eq!(context.events_of(EventKind::RollbackActionFinished).len(), 4);
}

#[tokio::test(start_paused = true)]
async fn stuck_action_times_out() {
    let log = journal();
    let context = TestContext::new().with_rollback_action_timeout(Duration::from_secs(1));
    let coordinator = context.rollback();

    coordinator.register_single(RecordingRollbackAction::new("after", &log).into_arc());
    coordinator.register_single(
        RecordingRollbackAction::new("stuck", &log)
            .behaving(Behavior::Hang)
            .into_arc(),
    );

    let result = coordinator.drain(&context).await;
    let stuck = result.record(&"stuck".into()).unwrap();
    assert_eq!(stuck.status, CompensationStatus::Failed);
    assert!(stuck.message.as_deref().unwrap_or_default().contains("timed out"));
    assert_eq!(
        result.record(&"after".into()).unwrap().status,
        CompensationStatus::Compensated
    );
}

#[tokio::test]
async fn empty_ledger_drains_to_nothing() {
    let context = TestContext::new();
    let result = context.rollback().drain(&context).await;
    assert!(result.is_empty());

    let log = journal();
    context
        .rollback()
        .register_single(RecordingRollbackAction::new("once", &log).into_arc());
    assert_eq!(context.rollback().drain(&context).await.records.len(), 1);
    assert!(context.rollback().drain(&context).await.is_empty());
    assert_eq!(log.lock().len(), 1);
}

proptest! {
    #[test]
    fn prop_drain_order_is_boundary_then_priority(
        layout in proptest::collection::vec((0..4usize, 0..5u32), 1..24)
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let log = journal();
        let context = TestContext::new();
        let coordinator = context.rollback();
        let boundaries: Vec<_> = (0..4).map(|_| coordinator.open_boundary(None)).collect();

        let mut expected = Vec::new();
        for (sequence, (boundary, priority)) in layout.iter().enumerate() {
            let id = format!("action-{sequence}");
            coordinator.register(
                boundaries[*boundary],
                RecordingRollbackAction::new(&id, &log).with_priority(*priority).into_arc(),
            );
            expected.push((*boundary, *priority, sequence, id));
        }
        expected.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then(a.1.cmp(&b.1))
                .then(b.2.cmp(&a.2))
        });

        let result = runtime.block_on(coordinator.drain(&context));
        let expected: Vec<String> = expected.into_iter().map(|e| e.3).collect();
        prop_assert_eq!(ids(&result), expected);
        prop_assert!(coordinator.is_empty());
    }
}
