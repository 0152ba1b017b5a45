//! Testing utilities for the SVO workspace
//!
//! Scripted adapters, recording rollback actions, canned analyzers and plan
//! fixtures shared by the integration tests.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use svo_engine::{
    AdapterError, AnalysisError, FailureAnalyzer, Invocation, RollbackAction, RollbackError,
    ServiceAdapter, StepOutcome, TestContext,
};
use svo_model::{
    ActionId, CompensationDescriptor, CorrelationId, FailureAnalysis, FailurePayload, ServiceId,
    StepAction, StepId, StepKind, TestStep,
};
use tokio::time::Instant;

/// Scripted reply of a [`ScriptedAdapter`]
#[derive(Debug, Clone)]
pub enum Reply {
    /// Succeed with output and status code
    Ok { output: Value, status: u16 },
    /// Fail with the given error
    Fail(AdapterError),
    /// Never answer
    Hang,
    /// Succeed but stamp a foreign correlation id
    WrongCorrelation,
}

impl Reply {
    pub fn ok(output: Value) -> Self {
        Self::Ok { output, status: 200 }
    }

    pub fn status(code: u16) -> Self {
        if code >= 400 {
            Self::Fail(AdapterError::from_status(code, format!("HTTP {code}")))
        } else {
            Self::Ok {
                output: json!({"status": code}),
                status: code,
            }
        }
    }

    pub fn refused() -> Self {
        Self::Fail(AdapterError::connection_refused("connection refused"))
    }
}

/// One call seen by a [`ScriptedAdapter`]
#[derive(Debug, Clone)]
pub struct Call {
    pub step_id: StepId,
    pub attempt: u32,
    pub compensation: bool,
    pub correlation_id: CorrelationId,
    pub body: Value,
    pub at: Instant,
}

/// Adapter answering from per-step scripts
///
/// Replies are consumed in order; once a script runs dry the step succeeds
/// with `{"step": <id>}`. Compensating calls use their own scripts.
#[derive(Debug)]
pub struct ScriptedAdapter {
    kind: StepKind,
    latency: Duration,
    scripts: Mutex<HashMap<StepId, VecDeque<Reply>>>,
    compensations: Mutex<HashMap<StepId, VecDeque<Reply>>>,
    calls: Mutex<Vec<Call>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn new(kind: StepKind) -> Self {
        Self {
            kind,
            latency: Duration::ZERO,
            scripts: Mutex::new(HashMap::new()),
            compensations: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn rest() -> Self {
        Self::new(StepKind::RestCall)
    }

    /// Sleep this long before every reply
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    #[must_use]
    pub fn script(self, step: &str, replies: Vec<Reply>) -> Self {
        self.scripts
            .lock()
            .entry(StepId::new(step))
            .or_default()
            .extend(replies);
        self
    }

    #[must_use]
    pub fn compensation(self, step: &str, reply: Reply) -> Self {
        self.compensations
            .lock()
            .entry(StepId::new(step))
            .or_default()
            .push_back(reply);
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Forward calls for a step
    pub fn calls_for(&self, step: &str) -> Vec<Call> {
        self.calls
            .lock()
            .iter()
            .filter(|c| !c.compensation && c.step_id.as_str() == step)
            .cloned()
            .collect()
    }

    /// Compensated steps in call order
    pub fn compensated(&self) -> Vec<StepId> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.compensation)
            .map(|c| c.step_id.clone())
            .collect()
    }

    /// Highest number of concurrent calls observed
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn next_reply(&self, invocation: &Invocation) -> Option<Reply> {
        let scripts = if invocation.compensation {
            &self.compensations
        } else {
            &self.scripts
        };
        scripts
            .lock()
            .get_mut(&invocation.step_id)
            .and_then(VecDeque::pop_front)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ServiceAdapter for ScriptedAdapter {
    fn kind(&self) -> StepKind {
        self.kind
    }

    async fn execute(&self, invocation: &Invocation) -> Result<StepOutcome, AdapterError> {
        self.calls.lock().push(Call {
            step_id: invocation.step_id.clone(),
            attempt: invocation.attempt,
            compensation: invocation.compensation,
            correlation_id: invocation.correlation_id,
            body: invocation.action.body().clone(),
            at: Instant::now(),
        });

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let reply = self
            .next_reply(invocation)
            .unwrap_or_else(|| Reply::ok(json!({"step": invocation.step_id.as_str()})));

        match reply {
            Reply::Ok { output, status } => Ok(StepOutcome::success(invocation, output)
                .with_status(status)
                .with_latency(self.latency)),
            Reply::Fail(err) => Err(err),
            Reply::Hang => std::future::pending().await,
            Reply::WrongCorrelation => {
                let mut outcome = StepOutcome::success(invocation, json!({"foreign": true}))
                    .with_status(200);
                outcome.correlation_id = Some(CorrelationId::new());
                Ok(outcome)
            }
        }
    }
}

/// Shared log of executed rollback actions
pub type Journal = Arc<Mutex<Vec<ActionId>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

/// How a [`RecordingRollbackAction`] behaves when executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Succeed,
    Fail,
    Hang,
    Panic,
}

/// Rollback action that appends its id to a journal
#[derive(Debug)]
pub struct RecordingRollbackAction {
    id: ActionId,
    service_id: ServiceId,
    priority: u32,
    runnable: bool,
    behavior: Behavior,
    journal: Journal,
}

impl RecordingRollbackAction {
    pub fn new(id: &str, journal: &Journal) -> Self {
        Self {
            id: ActionId::new(id),
            service_id: ServiceId::new("svc"),
            priority: 0,
            runnable: true,
            behavior: Behavior::Succeed,
            journal: Arc::clone(journal),
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn not_runnable(mut self) -> Self {
        self.runnable = false;
        self
    }

    #[must_use]
    pub fn behaving(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn into_arc(self) -> Arc<dyn RollbackAction> {
        Arc::new(self)
    }
}

#[async_trait]
impl RollbackAction for RecordingRollbackAction {
    fn id(&self) -> &ActionId {
        &self.id
    }

    fn service_id(&self) -> &ServiceId {
        &self.service_id
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn can_execute(&self, _context: &TestContext) -> bool {
        self.runnable
    }

    async fn execute(&self, _context: &TestContext) -> Result<(), RollbackError> {
        self.journal.lock().push(self.id.clone());
        match self.behavior {
            Behavior::Succeed => Ok(()),
            Behavior::Fail => Err(RollbackError::Failed(format!("{} refused", self.id))),
            Behavior::Hang => std::future::pending().await,
            Behavior::Panic => panic!("{} exploded", self.id),
        }
    }
}

/// Analyzer returning a fixed verdict and keeping the payloads it saw
#[derive(Debug)]
pub struct FixedAnalyzer {
    verdict: FailureAnalysis,
    seen: Mutex<Vec<FailurePayload>>,
}

impl FixedAnalyzer {
    pub fn new(verdict: FailureAnalysis) -> Arc<Self> {
        Arc::new(Self {
            verdict,
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn payloads(&self) -> Vec<FailurePayload> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl FailureAnalyzer for FixedAnalyzer {
    async fn analyze(&self, payload: &FailurePayload) -> Result<FailureAnalysis, AnalysisError> {
        self.seen.lock().push(payload.clone());
        Ok(self.verdict.clone())
    }
}

/// Analyzer that is always unavailable
#[derive(Debug, Default)]
pub struct FailingAnalyzer;

#[async_trait]
impl FailureAnalyzer for FailingAnalyzer {
    async fn analyze(&self, _payload: &FailurePayload) -> Result<FailureAnalysis, AnalysisError> {
        Err(AnalysisError::Unavailable("analysis backend down".to_string()))
    }
}

/// Analyzer that answers only after a delay
#[derive(Debug)]
pub struct SlowAnalyzer {
    pub delay: Duration,
    pub verdict: FailureAnalysis,
}

#[async_trait]
impl FailureAnalyzer for SlowAnalyzer {
    async fn analyze(&self, _payload: &FailurePayload) -> Result<FailureAnalysis, AnalysisError> {
        tokio::time::sleep(self.delay).await;
        Ok(self.verdict.clone())
    }
}

/// `GET <path>` against service `svc`
pub fn rest_step(id: &str, path: &str) -> TestStep {
    rest_step_on(id, "svc", "GET", path)
}

pub fn rest_step_on(id: &str, service: &str, method: &str, path: &str) -> TestStep {
    TestStep::new(
        id,
        service,
        StepAction::new(StepKind::RestCall, json!({"method": method, "path": path})),
    )
}

/// `DELETE <path>` compensation
pub fn rest_compensation(path: &str) -> CompensationDescriptor {
    CompensationDescriptor::new(StepAction::new(
        StepKind::RestCall,
        json!({"method": "DELETE", "path": path}),
    ))
}

pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("debug")
        .try_init();
}
