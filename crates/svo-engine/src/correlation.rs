//! Correlation tracking
//!
//! Each run owns one tracker bound to the run's correlation id. Interactions
//! carrying any other id (or none) are dropped so concurrent runs never
//! contaminate each other's traces.

use parking_lot::Mutex;
use svo_model::{CorrelationId, ServiceInteraction, StepId};

/// Why an interaction was dropped
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TraceRejection {
    /// Interaction carried no correlation id
    #[error("interaction from step {step} carries no correlation id")]
    Missing {
        /// Producing step
        step: StepId,
    },

    /// Interaction carried another run's id
    #[error("interaction from step {step} carries correlation id {actual}, expected {expected}")]
    Mismatch {
        /// Producing step
        step: StepId,
        /// Active id
        expected: CorrelationId,
        /// Id found on the interaction
        actual: CorrelationId,
    },
}

#[derive(Debug, Default)]
struct TraceState {
    accepted: Vec<ServiceInteraction>,
    rejected: u32,
}

/// Run-scoped interaction trace
#[derive(Debug)]
pub struct CorrelationTracker {
    active: CorrelationId,
    state: Mutex<TraceState>,
}

impl CorrelationTracker {
    /// Fresh random correlation id
    #[inline]
    #[must_use]
    pub fn new_correlation_id() -> CorrelationId {
        CorrelationId::new()
    }

    /// Tracker bound to a correlation id
    #[must_use]
    pub fn new(active: CorrelationId) -> Self {
        Self {
            active,
            state: Mutex::new(TraceState::default()),
        }
    }

    /// Active correlation id
    #[inline]
    #[must_use]
    pub fn correlation_id(&self) -> CorrelationId {
        self.active
    }

    /// Accept an interaction into the trace
    ///
    /// # Errors
    /// `TraceRejection` if the id is missing or belongs to another run; the
    /// interaction is dropped and counted.
    pub fn record(&self, interaction: ServiceInteraction) -> Result<(), TraceRejection> {
        let verdict = match interaction.correlation_id {
            Some(id) if id == self.active => Ok(()),
            Some(actual) => Err(TraceRejection::Mismatch {
                step: interaction.step_id.clone(),
                expected: self.active,
                actual,
            }),
            None => Err(TraceRejection::Missing {
                step: interaction.step_id.clone(),
            }),
        };

        let mut state = self.state.lock();
        match verdict {
            Ok(()) => state.accepted.push(interaction),
            Err(_) => state.rejected += 1,
        }
        verdict
    }

    /// Trace ordered by completion timestamp, ties broken by step id
    #[must_use]
    pub fn trace(&self) -> Vec<ServiceInteraction> {
        let mut trace = self.state.lock().accepted.clone();
        trace.sort_by(ServiceInteraction::trace_cmp);
        trace
    }

    /// Accepted interactions
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().accepted.len()
    }

    /// Whether nothing was accepted
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dropped interactions
    #[must_use]
    pub fn rejected(&self) -> u32 {
        self.state.lock().rejected
    }
}
