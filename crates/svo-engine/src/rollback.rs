//! Rollback coordination
//!
//! The coordinator keeps an append-ordered ledger of compensations for one
//! run. Actions are grouped into step boundaries: a boundary is opened when a
//! step completes and every action registered for that step shares it.
//!
//! Drain order:
//! 1. Boundaries in reverse registration order (later effects undone first)
//! 2. Within a boundary, ascending priority
//! 3. Equal priorities in reverse registration order
//!
//! Draining is exhaustive: a failing, timing out or panicking compensation is
//! recorded and the next one still runs.

use crate::adapter::{AdapterRegistry, Invocation, ServiceAdapter};
use crate::context::TestContext;
use crate::error::RollbackError;
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use svo_model::{
    ActionId, BindingError, CompensationDescriptor, CompensationRecord, CompensationStatus,
    EventKind, InteractionOutcome, InteractionType, RollbackResult, ServiceId,
    ServiceInteraction, StepAction, StepId, TestEvent, TestStep,
};
use tokio::time::Instant;

/// Default per-action deadline
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Compensating operation
///
/// `execute` must be idempotent; it runs at most once per drain.
#[async_trait]
pub trait RollbackAction: Send + Sync {
    /// Action id
    fn id(&self) -> &ActionId;

    /// Owning service
    fn service_id(&self) -> &ServiceId;

    /// Lower runs first within a step boundary
    fn priority(&self) -> u32 {
        0
    }

    /// Precondition; `false` records the action as SKIPPED without invoking it
    fn can_execute(&self, _context: &TestContext) -> bool {
        true
    }

    /// Undo the side effect
    ///
    /// # Errors
    /// `RollbackError` is recorded as FAILED; it never aborts the drain.
    async fn execute(&self, context: &TestContext) -> Result<(), RollbackError>;
}

/// Step boundary handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Boundary(u64);

struct LedgerEntry {
    boundary: Boundary,
    sequence: u64,
    step: Option<StepId>,
    action: Arc<dyn RollbackAction>,
}

#[derive(Default)]
struct Ledger {
    entries: Vec<LedgerEntry>,
    boundaries: Vec<Option<StepId>>,
    next_sequence: u64,
}

/// Run-scoped compensation ledger
pub struct RollbackCoordinator {
    ledger: Mutex<Ledger>,
    action_timeout: Duration,
}

impl RollbackCoordinator {
    /// Empty ledger
    #[must_use]
    pub fn new() -> Self {
        Self {
            ledger: Mutex::new(Ledger::default()),
            action_timeout: DEFAULT_ACTION_TIMEOUT,
        }
    }

    /// With per-action deadline
    #[inline]
    #[must_use]
    pub fn with_action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout = timeout;
        self
    }

    /// Open a new step boundary
    pub fn open_boundary(&self, step: Option<StepId>) -> Boundary {
        let mut ledger = self.ledger.lock();
        ledger.boundaries.push(step);
        Boundary(ledger.boundaries.len() as u64 - 1)
    }

    /// Register an action under a boundary
    pub fn register(&self, boundary: Boundary, action: Arc<dyn RollbackAction>) {
        let mut ledger = self.ledger.lock();
        let step = usize::try_from(boundary.0)
            .ok()
            .and_then(|i| ledger.boundaries.get(i).cloned())
            .flatten();
        let sequence = ledger.next_sequence;
        ledger.next_sequence += 1;
        tracing::debug!(action_id = %action.id(), priority = action.priority(), ?boundary, "registered compensation");
        ledger.entries.push(LedgerEntry {
            boundary,
            sequence,
            step,
            action,
        });
    }

    /// Register an action in a boundary of its own
    pub fn register_single(&self, action: Arc<dyn RollbackAction>) -> Boundary {
        let boundary = self.open_boundary(None);
        self.register(boundary, action);
        boundary
    }

    /// Registered actions
    #[must_use]
    pub fn len(&self) -> usize {
        self.ledger.lock().entries.len()
    }

    /// Whether the ledger is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Action ids in the order a drain would run them
    #[must_use]
    pub fn pending(&self) -> Vec<ActionId> {
        let ledger = self.ledger.lock();
        let mut order: Vec<&LedgerEntry> = ledger.entries.iter().collect();
        order.sort_by(|a, b| drain_order(a, b));
        order.into_iter().map(|e| e.action.id().clone()).collect()
    }

    /// Compensate every registered action and empty the ledger
    ///
    /// A second drain returns an empty result.
    pub async fn drain(&self, context: &TestContext) -> RollbackResult {
        let mut entries = std::mem::take(&mut self.ledger.lock().entries);
        entries.sort_by(drain_order);

        let mut result = RollbackResult::default();
        for entry in entries {
            let record = self.compensate(&entry, context).await;
            context.emit(
                TestEvent::new(EventKind::RollbackActionFinished)
                    .with_detail(format!("{} {:?}", record.action_id, record.status)),
            );
            result.records.push(record);
        }
        result
    }

    async fn compensate(&self, entry: &LedgerEntry, context: &TestContext) -> CompensationRecord {
        let action = &entry.action;
        let started = Instant::now();

        let (status, message) = if action.can_execute(context) {
            let call = AssertUnwindSafe(action.execute(context)).catch_unwind();
            match tokio::time::timeout(self.action_timeout, call).await {
                Ok(Ok(Ok(()))) => {
                    tracing::info!(action_id = %action.id(), "compensated");
                    (CompensationStatus::Compensated, None)
                }
                Ok(Ok(Err(err))) => {
                    tracing::error!(action_id = %action.id(), "compensation failed: {err}");
                    (CompensationStatus::Failed, Some(err.to_string()))
                }
                Ok(Err(_panic)) => {
                    tracing::error!(action_id = %action.id(), "compensation panicked");
                    (CompensationStatus::Failed, Some("compensation panicked".to_string()))
                }
                Err(_) => {
                    let err = RollbackError::Timeout(self.action_timeout);
                    tracing::error!(action_id = %action.id(), "{err}");
                    (CompensationStatus::Failed, Some(err.to_string()))
                }
            }
        } else {
            tracing::warn!(action_id = %action.id(), "compensation skipped: precondition not met");
            (CompensationStatus::Skipped, Some("precondition not met".to_string()))
        };

        CompensationRecord {
            action_id: action.id().clone(),
            service_id: action.service_id().clone(),
            step_id: entry.step.clone(),
            priority: action.priority(),
            status,
            message,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    }
}

fn drain_order(a: &LedgerEntry, b: &LedgerEntry) -> std::cmp::Ordering {
    b.boundary
        .cmp(&a.boundary)
        .then_with(|| a.action.priority().cmp(&b.action.priority()))
        .then_with(|| b.sequence.cmp(&a.sequence))
}

impl Default for RollbackCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RollbackCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RollbackCoordinator")
            .field("pending", &self.pending())
            .field("action_timeout", &self.action_timeout)
            .finish()
    }
}

/// Compensation issued through the adapter registered for its kind
///
/// The payload is bound against the execution state when the compensated step
/// completes. An unbound payload, a missing adapter or an unresolved
/// `requires` reference makes the action SKIPPED.
pub struct AdapterCompensation {
    id: ActionId,
    service_id: ServiceId,
    step_id: StepId,
    priority: u32,
    action: Result<StepAction, BindingError>,
    requires: Vec<String>,
    adapter: Option<Arc<dyn ServiceAdapter>>,
}

impl AdapterCompensation {
    /// Bind a step's compensation descriptor
    #[must_use]
    pub fn bind(
        step: &TestStep,
        descriptor: &CompensationDescriptor,
        context: &TestContext,
        registry: &AdapterRegistry,
    ) -> Self {
        let action = context
            .bind(descriptor.action.body())
            .map(|body| descriptor.action.with_body(body));
        if let Err(err) = &action {
            tracing::warn!(step_id = %step.id, "compensation payload not bound: {err}");
        }
        Self {
            id: descriptor
                .id
                .clone()
                .unwrap_or_else(|| ActionId::new(format!("{}:compensate", step.id))),
            service_id: descriptor.service.clone().unwrap_or_else(|| step.service.clone()),
            step_id: step.id.clone(),
            priority: descriptor.priority,
            action,
            requires: descriptor.requires.clone(),
            adapter: registry.get(descriptor.action.kind()),
        }
    }
}

#[async_trait]
impl RollbackAction for AdapterCompensation {
    fn id(&self) -> &ActionId {
        &self.id
    }

    fn service_id(&self) -> &ServiceId {
        &self.service_id
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn can_execute(&self, context: &TestContext) -> bool {
        self.action.is_ok()
            && self.adapter.is_some()
            && self.requires.iter().all(|r| context.contains(r))
    }

    async fn execute(&self, context: &TestContext) -> Result<(), RollbackError> {
        let action = self
            .action
            .as_ref()
            .map_err(|e| RollbackError::Failed(e.to_string()))?;
        let adapter = self
            .adapter
            .as_ref()
            .ok_or_else(|| RollbackError::Failed(format!("no adapter for {}", action.kind())))?;

        let invocation = Invocation::new(
            context,
            self.step_id.clone(),
            self.service_id.clone(),
            action.clone(),
        )
        .as_compensation();

        let started = Instant::now();
        let result = adapter.execute(&invocation).await;
        let interaction = match &result {
            Ok(outcome) => ServiceInteraction::new(
                outcome.correlation_id,
                self.step_id.clone(),
                self.service_id.clone(),
                InteractionType::Compensation,
                if outcome.latency.is_zero() { started.elapsed() } else { outcome.latency },
                InteractionOutcome::success(outcome.status_code, outcome.summary.clone()),
            ),
            Err(err) => ServiceInteraction::new(
                Some(invocation.correlation_id),
                self.step_id.clone(),
                self.service_id.clone(),
                InteractionType::Compensation,
                started.elapsed(),
                InteractionOutcome::failure(err.status_code, err.to_string()),
            ),
        };
        context.record_interaction(interaction);

        result.map(|_| ()).map_err(RollbackError::from)
    }
}

impl fmt::Debug for AdapterCompensation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterCompensation")
            .field("id", &self.id)
            .field("service_id", &self.service_id)
            .field("step_id", &self.step_id)
            .field("priority", &self.priority)
            .field("bound", &self.action.is_ok())
            .field("has_adapter", &self.adapter.is_some())
            .finish()
    }
}
