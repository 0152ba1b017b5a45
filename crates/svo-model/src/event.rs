//! Run lifecycle events
//!
//! Events are append-only markers; the engine's event log assigns the
//! sequence number on insertion and never mutates an event afterwards.

use crate::ids::StepId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle marker kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum EventKind {
    RunStarted,
    StepStarted,
    StepRetried,
    StepCompleted,
    StepFailed,
    /// Step never dispatched (forward execution stopped first)
    StepSkipped,
    /// Interaction dropped by the correlation tracker
    InteractionRejected,
    PlanTimeout,
    RollbackInitiated,
    RollbackActionFinished,
    RollbackCompleted,
    RunCompleted,
}

/// Timestamped lifecycle marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestEvent {
    /// Position in the run's event log
    pub sequence: u64,
    /// When the event was emitted
    pub timestamp: DateTime<Utc>,
    /// Marker kind
    pub kind: EventKind,
    /// Related step, if any
    pub step_id: Option<StepId>,
    /// Free-form detail
    pub detail: Option<String>,
}

impl TestEvent {
    /// Create an event stamped now (sequence assigned on append)
    #[inline]
    #[must_use]
    pub fn new(kind: EventKind) -> Self {
        Self {
            sequence: 0,
            timestamp: Utc::now(),
            kind,
            step_id: None,
            detail: None,
        }
    }

    /// For step
    #[inline]
    #[must_use]
    pub fn for_step(mut self, step: &StepId) -> Self {
        self.step_id = Some(step.clone());
        self
    }

    /// With detail
    #[inline]
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
