//! Protocol adapter capability
//!
//! One adapter per step kind, selected through an [`AdapterRegistry`]. The
//! engine hands each adapter a bound [`Invocation`]; adapters decode the
//! action body into their own typed payload and must stamp the invocation's
//! correlation id onto the returned [`StepOutcome`].

use crate::context::TestContext;
use crate::error::AdapterError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use svo_model::{
    AssertionPayload, CorrelationId, RunId, ServiceId, StepAction, StepId, StepKind,
};

/// One adapter call
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    /// Run
    pub run_id: RunId,
    /// Correlation id the adapter must propagate
    pub correlation_id: CorrelationId,
    /// Step being executed (or compensated)
    pub step_id: StepId,
    /// Target service
    pub service_id: ServiceId,
    /// Action with every reference already bound
    pub action: StepAction,
    /// Attempt number (1-based)
    pub attempt: u32,
    /// Whether this is a compensating call
    pub compensation: bool,
}

impl Invocation {
    /// Create a first-attempt invocation for the context's run
    #[must_use]
    pub fn new(
        context: &TestContext,
        step_id: StepId,
        service_id: ServiceId,
        action: StepAction,
    ) -> Self {
        Self {
            run_id: context.run_id(),
            correlation_id: context.correlation_id(),
            step_id,
            service_id,
            action,
            attempt: 1,
            compensation: false,
        }
    }

    /// Mark as compensating call
    #[inline]
    #[must_use]
    pub fn as_compensation(mut self) -> Self {
        self.compensation = true;
        self
    }

    /// Step kind of the action
    #[inline]
    #[must_use]
    pub fn kind(&self) -> StepKind {
        self.action.kind()
    }

    /// Decode the action body into an adapter-owned schema
    ///
    /// # Errors
    /// `AdapterError` with cause `MALFORMED_PAYLOAD` if the body does not fit.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, AdapterError> {
        Ok(self.action.decode_as(self.kind())?)
    }
}

/// Successful adapter call
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    /// Correlation id carried back by the adapter
    pub correlation_id: Option<CorrelationId>,
    /// Captured output, stored under `<step>.output`
    pub output: Value,
    /// Protocol status code, stored under `<step>.status`
    pub status_code: Option<u16>,
    /// Call latency
    pub latency: Duration,
    /// Short raw-response summary for the trace
    pub summary: String,
}

impl StepOutcome {
    /// Success stamped with the invocation's correlation id
    #[must_use]
    pub fn success(invocation: &Invocation, output: Value) -> Self {
        Self {
            correlation_id: Some(invocation.correlation_id),
            output,
            status_code: None,
            latency: Duration::ZERO,
            summary: "ok".to_string(),
        }
    }

    /// With status code
    #[inline]
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    /// With latency
    #[inline]
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// With summary
    #[inline]
    #[must_use]
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }
}

/// Adapter capability, one implementation per step kind
#[async_trait]
pub trait ServiceAdapter: Send + Sync {
    /// Step kind served
    fn kind(&self) -> StepKind;

    /// Execute one call
    ///
    /// # Errors
    /// `AdapterError` classified by cause; the retry controller decides
    /// whether to re-invoke.
    async fn execute(&self, invocation: &Invocation) -> Result<StepOutcome, AdapterError>;
}

/// Adapters keyed by step kind
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<StepKind, Arc<dyn ServiceAdapter>>,
}

impl AdapterRegistry {
    /// Empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the in-process assertion adapter
    #[must_use]
    pub fn with_builtins() -> Self {
        Self::new().with_adapter(Arc::new(AssertionAdapter))
    }

    /// With adapter (replaces any adapter for the same kind)
    #[must_use]
    pub fn with_adapter(mut self, adapter: Arc<dyn ServiceAdapter>) -> Self {
        self.register(adapter);
        self
    }

    /// Register an adapter, returning the one it replaced
    pub fn register(&mut self, adapter: Arc<dyn ServiceAdapter>) -> Option<Arc<dyn ServiceAdapter>> {
        self.adapters.insert(adapter.kind(), adapter)
    }

    /// Adapter for a kind
    #[must_use]
    pub fn get(&self, kind: StepKind) -> Option<Arc<dyn ServiceAdapter>> {
        self.adapters.get(&kind).cloned()
    }

    /// Registered kinds in declaration order
    #[must_use]
    pub fn kinds(&self) -> Vec<StepKind> {
        StepKind::ALL
            .into_iter()
            .filter(|k| self.adapters.contains_key(k))
            .collect()
    }
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// Serves `ASSERTION` steps in-process
///
/// Echoes the bound `actual` value as output so expectations can be checked
/// against execution state without a service call.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssertionAdapter;

#[async_trait]
impl ServiceAdapter for AssertionAdapter {
    fn kind(&self) -> StepKind {
        StepKind::Assertion
    }

    async fn execute(&self, invocation: &Invocation) -> Result<StepOutcome, AdapterError> {
        let payload: AssertionPayload = invocation.decode()?;
        let summary = payload
            .description
            .unwrap_or_else(|| "assertion".to_string());
        Ok(StepOutcome::success(invocation, payload.actual).with_summary(summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use svo_model::FailureCause;

    fn invocation(action: StepAction) -> Invocation {
        Invocation::new(
            &TestContext::new(),
            StepId::new("check"),
            ServiceId::new("local"),
            action,
        )
    }

    #[tokio::test]
    async fn assertion_adapter_echoes_actual() {
        let inv = invocation(StepAction::new(
            StepKind::Assertion,
            json!({"actual": {"total": 3}, "description": "order total"}),
        ));
        let outcome = AssertionAdapter.execute(&inv).await.unwrap();
        assert_eq!(outcome.output, json!({"total": 3}));
        assert_eq!(outcome.correlation_id, Some(inv.correlation_id));
        assert_eq!(outcome.summary, "order total");
    }

    #[tokio::test]
    async fn malformed_assertion_payload_is_terminal() {
        let inv = invocation(StepAction::new(StepKind::Assertion, json!({"nope": 1})));
        let err = AssertionAdapter.execute(&inv).await.unwrap_err();
        assert_eq!(err.cause, FailureCause::MalformedPayload);
        assert!(!err.is_retryable());
    }

    #[test]
    fn registry_selects_by_kind() {
        let registry = AdapterRegistry::with_builtins();
        assert!(registry.get(StepKind::Assertion).is_some());
        assert!(registry.get(StepKind::RestCall).is_none());
        assert_eq!(registry.kinds(), vec![StepKind::Assertion]);
        assert!(format!("{registry:?}").contains("Assertion"));
    }
}
