//! Service interaction records
//!
//! Immutable records of one adapter call, stamped with the run's correlation
//! id. The trace of a run is ordered by completion timestamp, ties broken by
//! step id.

use crate::ids::{CorrelationId, ServiceId, StepId};
use crate::step::StepKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::Duration;

/// Interaction type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum InteractionType {
    RestCall,
    MessageProduce,
    MessageConsume,
    DbQuery,
    Assertion,
    /// Compensating call issued during rollback
    Compensation,
}

impl From<StepKind> for InteractionType {
    fn from(kind: StepKind) -> Self {
        match kind {
            StepKind::RestCall => InteractionType::RestCall,
            StepKind::MessageProduce => InteractionType::MessageProduce,
            StepKind::MessageConsume => InteractionType::MessageConsume,
            StepKind::DbQuery => InteractionType::DbQuery,
            StepKind::Assertion => InteractionType::Assertion,
        }
    }
}

/// Success/failure plus raw response summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionOutcome {
    /// Whether the call succeeded
    pub success: bool,
    /// Protocol status code, if any
    pub status_code: Option<u16>,
    /// Short summary of the raw response or error
    pub summary: String,
}

impl InteractionOutcome {
    /// Successful outcome
    #[inline]
    #[must_use]
    pub fn success(status_code: Option<u16>, summary: impl Into<String>) -> Self {
        Self {
            success: true,
            status_code,
            summary: summary.into(),
        }
    }

    /// Failed outcome
    #[inline]
    #[must_use]
    pub fn failure(status_code: Option<u16>, summary: impl Into<String>) -> Self {
        Self {
            success: false,
            status_code,
            summary: summary.into(),
        }
    }
}

/// One adapter call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInteraction {
    /// Correlation id carried by the call (`None` if the adapter dropped it)
    pub correlation_id: Option<CorrelationId>,
    /// Owning step
    pub step_id: StepId,
    /// Target service
    pub service_id: ServiceId,
    /// Interaction type
    pub interaction_type: InteractionType,
    /// Completion timestamp
    pub timestamp: DateTime<Utc>,
    /// Latency in milliseconds
    pub latency_ms: u64,
    /// Attempt number (1-based)
    pub attempt: u32,
    /// Outcome
    pub outcome: InteractionOutcome,
}

impl ServiceInteraction {
    /// Create a record completed now
    #[must_use]
    pub fn new(
        correlation_id: Option<CorrelationId>,
        step_id: StepId,
        service_id: ServiceId,
        interaction_type: InteractionType,
        latency: Duration,
        outcome: InteractionOutcome,
    ) -> Self {
        Self {
            correlation_id,
            step_id,
            service_id,
            interaction_type,
            timestamp: Utc::now(),
            latency_ms: u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
            attempt: 1,
            outcome,
        }
    }

    /// With attempt number
    #[inline]
    #[must_use]
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    /// Latency as a `Duration`
    #[inline]
    #[must_use]
    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }

    /// Trace order: completion timestamp, then step id
    #[must_use]
    pub fn trace_cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.step_id.cmp(&other.step_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(step: &str, secs: i64) -> ServiceInteraction {
        let mut interaction = ServiceInteraction::new(
            Some(CorrelationId::new()),
            StepId::new(step),
            ServiceId::new("svc"),
            InteractionType::RestCall,
            Duration::from_millis(5),
            InteractionOutcome::success(Some(200), "ok"),
        );
        interaction.timestamp = Utc.timestamp_opt(secs, 0).unwrap();
        interaction
    }

    #[test]
    fn trace_order_uses_timestamp_then_step_id() {
        let mut trace = vec![at("c", 2), at("b", 1), at("a", 1)];
        trace.sort_by(ServiceInteraction::trace_cmp);
        let ids: Vec<_> = trace.iter().map(|i| i.step_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn step_kind_maps_to_interaction_type() {
        assert_eq!(InteractionType::from(StepKind::DbQuery), InteractionType::DbQuery);
        assert_eq!(at("a", 0).latency(), Duration::from_millis(5));
    }
}
