//! Run-scoped test context
//!
//! One `TestContext` per run: correlation tracker, execution state, event log,
//! metrics and the rollback ledger. Locks are held only to read inputs before
//! an adapter call and to merge results after it, never across an await.

use crate::correlation::{CorrelationTracker, TraceRejection};
use crate::metrics::MetricsAccumulator;
use crate::rollback::RollbackCoordinator;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use svo_model::{
    BindingError, CorrelationId, EventKind, ExecutionState, MetricsSnapshot, RollbackResult,
    RunId, ServiceInteraction, StepId, StepResult, TestEvent,
};
use tokio::time::Instant;

/// Mutable state of one run
#[derive(Debug)]
pub struct TestContext {
    run_id: RunId,
    started: Instant,
    started_at: DateTime<Utc>,
    tracker: CorrelationTracker,
    state: RwLock<ExecutionState>,
    events: Mutex<Vec<TestEvent>>,
    metrics: Mutex<MetricsAccumulator>,
    rollback: RollbackCoordinator,
}

impl TestContext {
    /// Fresh context: new run id, new correlation id, empty state
    #[must_use]
    pub fn new() -> Self {
        Self::with_correlation_id(CorrelationTracker::new_correlation_id())
    }

    /// Fresh context bound to a given correlation id
    #[must_use]
    pub fn with_correlation_id(correlation_id: CorrelationId) -> Self {
        Self {
            run_id: RunId::new(),
            started: Instant::now(),
            started_at: Utc::now(),
            tracker: CorrelationTracker::new(correlation_id),
            state: RwLock::new(ExecutionState::new()),
            events: Mutex::new(Vec::new()),
            metrics: Mutex::new(MetricsAccumulator::new()),
            rollback: RollbackCoordinator::new(),
        }
    }

    /// With per-compensation deadline
    #[must_use]
    pub fn with_rollback_action_timeout(mut self, timeout: Duration) -> Self {
        self.rollback = RollbackCoordinator::new().with_action_timeout(timeout);
        self
    }

    /// Run id
    #[inline]
    #[must_use]
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Correlation id every interaction must carry
    #[inline]
    #[must_use]
    pub fn correlation_id(&self) -> CorrelationId {
        self.tracker.correlation_id()
    }

    /// Wall-clock start
    #[inline]
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Time since the context was created
    #[inline]
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Rollback ledger
    #[inline]
    #[must_use]
    pub fn rollback(&self) -> &RollbackCoordinator {
        &self.rollback
    }

    /// Seed plan variables under `vars.<name>`
    pub fn seed_variables(&self, variables: &BTreeMap<String, Value>) {
        self.state.write().seed_variables(variables);
    }

    /// Insert a state value
    pub fn insert(&self, key: impl Into<String>, value: Value) {
        self.state.write().insert(key, value);
    }

    /// Resolve every `${...}` reference in a value
    ///
    /// # Errors
    /// `BindingError::Unresolved` listing the missing references.
    pub fn bind(&self, value: &Value) -> Result<Value, BindingError> {
        self.state.read().bind(value)
    }

    /// Look up a reference
    #[must_use]
    pub fn lookup(&self, reference: &str) -> Option<Value> {
        self.state.read().lookup(reference).cloned()
    }

    /// Whether a reference resolves
    #[must_use]
    pub fn contains(&self, reference: &str) -> bool {
        self.state.read().contains(reference)
    }

    /// Merge a completed step's output into the shared state
    pub fn merge_output(&self, step: &StepId, output: Value, status_code: Option<u16>) {
        self.state.write().record_step_output(step, output, status_code);
    }

    /// Copy of the execution state
    #[must_use]
    pub fn state_snapshot(&self) -> ExecutionState {
        self.state.read().clone()
    }

    /// Append an event (sequence assigned here)
    pub fn emit(&self, mut event: TestEvent) {
        let mut events = self.events.lock();
        event.sequence = events.len() as u64;
        tracing::debug!(
            sequence = event.sequence,
            kind = ?event.kind,
            step_id = ?event.step_id,
            "event"
        );
        events.push(event);
    }

    /// Events so far
    #[must_use]
    pub fn events(&self) -> Vec<TestEvent> {
        self.events.lock().clone()
    }

    /// Events of one kind
    #[must_use]
    pub fn events_of(&self, kind: EventKind) -> Vec<TestEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    /// Feed an interaction to the correlation tracker
    ///
    /// A rejected interaction is logged, counted and reported as an event;
    /// it never fails the run. Returns whether it was accepted.
    pub fn record_interaction(&self, interaction: ServiceInteraction) -> bool {
        let step = interaction.step_id.clone();
        let accepted = match self.tracker.record(interaction) {
            Ok(()) => true,
            Err(rejection) => {
                tracing::warn!(step_id = %step, "dropped interaction: {rejection}");
                self.emit(
                    TestEvent::new(EventKind::InteractionRejected)
                        .for_step(&step)
                        .with_detail(rejection.to_string()),
                );
                false
            }
        };
        self.metrics.lock().record_interaction(accepted);
        accepted
    }

    /// Correlation trace so far
    #[must_use]
    pub fn trace(&self) -> Vec<ServiceInteraction> {
        self.tracker.trace()
    }

    /// Rejected interaction count
    #[must_use]
    pub fn rejected_interactions(&self) -> u32 {
        self.tracker.rejected()
    }

    /// Fold evaluated expectations into metrics
    pub fn record_expectations(&self, passed: u32, failed: u32) {
        self.metrics.lock().record_expectations(passed, failed);
    }

    /// Fold a step result into metrics
    pub fn record_step_result(&self, result: &StepResult) {
        self.metrics.lock().record_step(result);
    }

    /// Fold a rollback drain into metrics
    pub fn record_rollback(&self, rollback: &RollbackResult) {
        self.metrics.lock().record_rollback(rollback);
    }

    /// Metrics frozen at the current elapsed time
    #[must_use]
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.lock().snapshot(self.elapsed())
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}
