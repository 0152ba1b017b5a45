//! Test steps
//!
//! A step is one unit of interaction with one target service. Its action is a
//! tagged variant keyed by step kind; the body stays a JSON value inside the
//! engine and is decoded into a typed schema at the adapter boundary.

use crate::binding;
use crate::error::PayloadError;
use crate::expectation::Expectation;
use crate::ids::{ActionId, ServiceId, StepId};
use crate::policy::RetryPolicy;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Step kinds, one adapter per kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepKind {
    /// HTTP request against a service endpoint
    RestCall,
    /// Publish a message to a broker topic
    MessageProduce,
    /// Consume (and match) a message from a broker topic
    MessageConsume,
    /// Query or mutate a database
    DbQuery,
    /// In-process assertion over execution state
    Assertion,
}

impl StepKind {
    /// All kinds, in declaration order
    pub const ALL: [StepKind; 5] = [
        StepKind::RestCall,
        StepKind::MessageProduce,
        StepKind::MessageConsume,
        StepKind::DbQuery,
        StepKind::Assertion,
    ];

    /// Wire name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::RestCall => "REST_CALL",
            StepKind::MessageProduce => "MESSAGE_PRODUCE",
            StepKind::MessageConsume => "MESSAGE_CONSUME",
            StepKind::DbQuery => "DB_QUERY",
            StepKind::Assertion => "ASSERTION",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Step action: kind tag plus opaque body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepAction {
    /// HTTP call, body decodes to [`RestCallPayload`]
    RestCall(Value),
    /// Publish, body decodes to [`MessageProducePayload`]
    MessageProduce(Value),
    /// Consume, body decodes to [`MessageConsumePayload`]
    MessageConsume(Value),
    /// Database, body decodes to [`DbQueryPayload`]
    DbQuery(Value),
    /// Assertion, body decodes to [`AssertionPayload`]
    Assertion(Value),
}

impl StepAction {
    /// Build from kind and body
    #[must_use]
    pub fn new(kind: StepKind, body: Value) -> Self {
        match kind {
            StepKind::RestCall => Self::RestCall(body),
            StepKind::MessageProduce => Self::MessageProduce(body),
            StepKind::MessageConsume => Self::MessageConsume(body),
            StepKind::DbQuery => Self::DbQuery(body),
            StepKind::Assertion => Self::Assertion(body),
        }
    }

    /// Encode a typed payload
    ///
    /// # Errors
    /// `PayloadError::Malformed` if the payload cannot be serialized.
    pub fn encode<T: Serialize>(kind: StepKind, payload: &T) -> Result<Self, PayloadError> {
        Ok(Self::new(kind, serde_json::to_value(payload)?))
    }

    /// Step kind carried by the tag
    #[must_use]
    pub fn kind(&self) -> StepKind {
        match self {
            Self::RestCall(_) => StepKind::RestCall,
            Self::MessageProduce(_) => StepKind::MessageProduce,
            Self::MessageConsume(_) => StepKind::MessageConsume,
            Self::DbQuery(_) => StepKind::DbQuery,
            Self::Assertion(_) => StepKind::Assertion,
        }
    }

    /// Borrow the opaque body
    #[must_use]
    pub fn body(&self) -> &Value {
        match self {
            Self::RestCall(v)
            | Self::MessageProduce(v)
            | Self::MessageConsume(v)
            | Self::DbQuery(v)
            | Self::Assertion(v) => v,
        }
    }

    /// Replace the body, keeping the kind
    #[must_use]
    pub fn with_body(&self, body: Value) -> Self {
        Self::new(self.kind(), body)
    }

    /// Decode the body into an adapter-owned schema
    ///
    /// # Errors
    /// `PayloadError::Malformed` if the body does not fit `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, PayloadError> {
        Ok(serde_json::from_value(self.body().clone())?)
    }

    /// Decode, requiring a specific kind
    ///
    /// # Errors
    /// `PayloadError::KindMismatch` if the tag differs, otherwise as [`Self::decode`].
    pub fn decode_as<T: DeserializeOwned>(&self, expected: StepKind) -> Result<T, PayloadError> {
        if self.kind() != expected {
            return Err(PayloadError::KindMismatch {
                expected: expected.to_string(),
                actual: self.kind().to_string(),
            });
        }
        self.decode()
    }

    /// `${...}` references in the body
    #[must_use]
    pub fn references(&self) -> Vec<String> {
        binding::references(self.body())
    }
}

/// HTTP methods understood by REST adapters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[allow(missing_docs)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
}

/// Typed body of a `REST_CALL` action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestCallPayload {
    /// HTTP method
    pub method: HttpMethod,
    /// Path relative to the service base URL
    pub path: String,
    /// Request headers
    #[serde(default)]
    pub headers: std::collections::BTreeMap<String, String>,
    /// Query parameters
    #[serde(default)]
    pub query: std::collections::BTreeMap<String, String>,
    /// JSON body
    #[serde(default)]
    pub body: Option<Value>,
}

/// Typed body of a `MESSAGE_PRODUCE` action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageProducePayload {
    /// Destination topic
    pub topic: String,
    /// Partition key
    #[serde(default)]
    pub key: Option<String>,
    /// Message value
    pub value: Value,
    /// Message headers
    #[serde(default)]
    pub headers: std::collections::BTreeMap<String, String>,
}

/// Typed body of a `MESSAGE_CONSUME` action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageConsumePayload {
    /// Source topic
    pub topic: String,
    /// Consumer group
    #[serde(default)]
    pub group: Option<String>,
    /// Partial JSON document a message must contain to match
    #[serde(default)]
    pub matcher: Option<Value>,
    /// How long to wait for a matching message
    #[serde(default = "default_consume_wait_ms")]
    pub max_wait_ms: u64,
}

fn default_consume_wait_ms() -> u64 {
    5_000
}

/// Typed body of a `DB_QUERY` action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbQueryPayload {
    /// SQL statement with positional placeholders
    pub statement: String,
    /// Positional parameters
    #[serde(default)]
    pub params: Vec<Value>,
}

/// Typed body of an `ASSERTION` action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertionPayload {
    /// Value under test (usually a bound reference)
    pub actual: Value,
    /// Human-readable description
    #[serde(default)]
    pub description: Option<String>,
}

/// How to undo a step if a later step fails
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationDescriptor {
    /// Action identifier, defaults to `<step>:compensate`
    #[serde(default)]
    pub id: Option<ActionId>,
    /// Compensating call (kind selects the adapter)
    pub action: StepAction,
    /// Target service, defaults to the step's service
    #[serde(default)]
    pub service: Option<ServiceId>,
    /// Lower runs first within one step boundary
    #[serde(default)]
    pub priority: u32,
    /// State references that must resolve for the compensation to run
    #[serde(default)]
    pub requires: Vec<String>,
}

impl CompensationDescriptor {
    /// Create a descriptor for an action
    #[inline]
    #[must_use]
    pub fn new(action: StepAction) -> Self {
        Self {
            id: None,
            action,
            service: None,
            priority: 0,
            requires: Vec::new(),
        }
    }

    /// With priority
    #[inline]
    #[must_use]
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// With explicit action id
    #[inline]
    #[must_use]
    pub fn with_id(mut self, id: impl Into<ActionId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Require a state reference before running
    #[inline]
    #[must_use]
    pub fn requires(mut self, reference: impl Into<String>) -> Self {
        self.requires.push(reference.into());
        self
    }
}

/// One unit of interaction with one target service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestStep {
    /// Identifier, unique within the plan
    pub id: StepId,
    /// Target service
    pub service: ServiceId,
    /// Tagged action
    pub action: StepAction,
    /// Expected outcomes
    #[serde(default)]
    pub expect: Vec<Expectation>,
    /// Step-local retry policy (falls back to plan default)
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    /// Per-attempt timeout in milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Explicit dependencies
    #[serde(default)]
    pub depends_on: Vec<StepId>,
    /// Non-blocking: failure yields PARTIAL instead of FAILED
    #[serde(default)]
    pub best_effort: bool,
    /// Compensation registered once this step succeeds
    #[serde(default)]
    pub compensation: Option<CompensationDescriptor>,
}

impl TestStep {
    /// Create a step
    #[must_use]
    pub fn new(id: impl Into<StepId>, service: impl Into<ServiceId>, action: StepAction) -> Self {
        Self {
            id: id.into(),
            service: service.into(),
            action,
            expect: Vec::new(),
            retry: None,
            timeout_ms: None,
            depends_on: Vec::new(),
            best_effort: false,
            compensation: None,
        }
    }

    /// Step kind
    #[inline]
    #[must_use]
    pub fn kind(&self) -> StepKind {
        self.action.kind()
    }

    /// With expectation
    #[inline]
    #[must_use]
    pub fn expect(mut self, expectation: Expectation) -> Self {
        self.expect.push(expectation);
        self
    }

    /// With retry policy
    #[inline]
    #[must_use]
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// With per-attempt timeout
    #[inline]
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// With dependency
    #[inline]
    #[must_use]
    pub fn depends_on(mut self, step: impl Into<StepId>) -> Self {
        self.depends_on.push(step.into());
        self
    }

    /// Mark best-effort
    #[inline]
    #[must_use]
    pub fn best_effort(mut self) -> Self {
        self.best_effort = true;
        self
    }

    /// With compensation
    #[inline]
    #[must_use]
    pub fn with_compensation(mut self, compensation: CompensationDescriptor) -> Self {
        self.compensation = Some(compensation);
        self
    }

    /// Per-attempt timeout, if declared
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Effective retry policy given the plan default
    #[inline]
    #[must_use]
    pub fn effective_retry(&self, fallback: RetryPolicy) -> RetryPolicy {
        self.retry.unwrap_or(fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn action_serializes_adjacently_tagged() {
        let action = StepAction::new(StepKind::RestCall, json!({"method": "GET", "path": "/orders"}));
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["kind"], "REST_CALL");
        assert_eq!(json["payload"]["path"], "/orders");
    }

    #[test]
    fn decode_typed_rest_payload() {
        let action = StepAction::new(
            StepKind::RestCall,
            json!({"method": "POST", "path": "/orders", "body": {"sku": "A-1"}}),
        );
        let payload: RestCallPayload = action.decode_as(StepKind::RestCall).unwrap();
        assert_eq!(payload.method, HttpMethod::Post);
        assert!(payload.headers.is_empty());
        assert_eq!(payload.body, Some(json!({"sku": "A-1"})));
    }

    #[test]
    fn decode_rejects_kind_mismatch_and_bad_shape() {
        let action = StepAction::new(StepKind::DbQuery, json!({"statement": "SELECT 1"}));
        assert!(matches!(
            action.decode_as::<RestCallPayload>(StepKind::RestCall),
            Err(PayloadError::KindMismatch { .. })
        ));

        let broken = StepAction::new(StepKind::DbQuery, json!({"params": []}));
        assert!(matches!(
            broken.decode::<DbQueryPayload>(),
            Err(PayloadError::Malformed(_))
        ));
    }

    #[test]
    fn consume_payload_defaults_wait() {
        let action = StepAction::new(StepKind::MessageConsume, json!({"topic": "orders"}));
        let payload: MessageConsumePayload = action.decode().unwrap();
        assert_eq!(payload.max_wait_ms, 5_000);
    }

    #[test]
    fn step_deserializes_with_defaults() {
        let step: TestStep = serde_json::from_value(json!({
            "id": "ping",
            "service": "gateway",
            "action": {"kind": "REST_CALL", "payload": {"method": "GET", "path": "/ping"}}
        }))
        .unwrap();
        assert_eq!(step.kind(), StepKind::RestCall);
        assert!(step.expect.is_empty());
        assert!(!step.best_effort);
        assert_eq!(step.effective_retry(RetryPolicy::no_retry()), RetryPolicy::no_retry());
    }
}
