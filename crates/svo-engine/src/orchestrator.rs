//! Test orchestrator
//!
//! Entry point for callers: admits the run, allocates a fresh context, runs
//! the engine, asks the analyzer about FAILED runs and finalizes metrics.
//!
//! Admission: up to `max_concurrent_runs` runs execute at once; further runs
//! wait in a queue of at most `max_queued_runs`, beyond which submission fails
//! fast with `RESOURCE_EXHAUSTED` before any step executes.

use crate::adapter::AdapterRegistry;
use crate::analysis::{build_payload, FailureAnalyzer};
use crate::config::EngineConfig;
use crate::context::TestContext;
use crate::engine::ExecutionEngine;
use crate::error::{AnalysisError, OrchestratorError};
use chrono::Utc;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use svo_model::{FailureAnalysis, TestExecutionPlan, TestResult, TestStatus};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Orchestrator statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrchestratorStats {
    /// Runs currently executing
    pub active: usize,
    /// Runs waiting for a slot
    pub queued: usize,
    /// Runs finished (any status)
    pub completed: usize,
    /// Runs refused with RESOURCE_EXHAUSTED
    pub rejected: usize,
}

/// Top-level entry point
pub struct TestOrchestrator {
    engine: ExecutionEngine,
    analyzer: Option<Arc<dyn FailureAnalyzer>>,
    slots: Arc<Semaphore>,
    queued: AtomicUsize,
    completed: AtomicUsize,
    rejected: AtomicUsize,
}

/// Decrements the queue counter when the waiting run leaves the queue
struct QueueSlot<'a>(&'a AtomicUsize);

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl TestOrchestrator {
    /// Create orchestrator
    ///
    /// # Errors
    /// `OrchestratorError::Config` if the configuration is out of bounds.
    pub fn new(registry: AdapterRegistry, config: EngineConfig) -> Result<Self, OrchestratorError> {
        config.validate()?;
        Ok(Self {
            slots: Arc::new(Semaphore::new(config.max_concurrent_runs)),
            engine: ExecutionEngine::new(registry, config),
            analyzer: None,
            queued: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            rejected: AtomicUsize::new(0),
        })
    }

    /// With failure analyzer
    #[must_use]
    pub fn with_analyzer(mut self, analyzer: Arc<dyn FailureAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    /// Underlying engine
    #[inline]
    #[must_use]
    pub fn engine(&self) -> &ExecutionEngine {
        &self.engine
    }

    /// Current statistics
    #[must_use]
    pub fn stats(&self) -> OrchestratorStats {
        OrchestratorStats {
            active: self.engine.config().max_concurrent_runs - self.slots.available_permits(),
            queued: self.queued.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            rejected: self.rejected.load(Ordering::SeqCst),
        }
    }

    /// Execute a plan end to end
    ///
    /// # Errors
    /// - `OrchestratorError::InvalidPlan` for structurally invalid plans
    /// - `OrchestratorError::ResourceExhausted` when the run queue is full
    pub async fn execute_plan(&self, plan: &TestExecutionPlan) -> Result<TestResult, OrchestratorError> {
        plan.validate()?;
        let _permit = self.admit().await?;

        let config = self.engine.config();
        let context = Arc::new(
            TestContext::new().with_rollback_action_timeout(config.rollback_action_timeout()),
        );
        let mut result = self.engine.run(plan, Arc::clone(&context)).await?;

        if result.status == TestStatus::Failed {
            result.failure_analysis = self.analyze(&result).await;
        }

        result.metrics.total_duration_ms =
            u64::try_from(context.elapsed().as_millis()).unwrap_or(u64::MAX);
        result.finished_at = Utc::now();

        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(result)
    }

    async fn admit(&self) -> Result<OwnedSemaphorePermit, OrchestratorError> {
        if let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() {
            return Ok(permit);
        }

        let limit = self.engine.config().max_concurrent_runs;
        let max_queued = self.engine.config().max_queued_runs;
        let position = self.queued.fetch_add(1, Ordering::SeqCst) + 1;
        let _slot = QueueSlot(&self.queued);

        if position > max_queued {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            tracing::warn!(limit, max_queued, "run rejected: queue full");
            return Err(OrchestratorError::ResourceExhausted {
                limit,
                queued: max_queued,
            });
        }

        tracing::debug!(position, "run queued");
        Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| OrchestratorError::ResourceExhausted {
                limit,
                queued: max_queued,
            })
    }

    async fn analyze(&self, result: &TestResult) -> Option<FailureAnalysis> {
        let analyzer = Arc::clone(self.analyzer.as_ref()?);
        let config = self.engine.config();
        let payload = build_payload(result, config.failure_payload_interactions);
        let deadline = config.analysis_timeout();

        let mut call = tokio::spawn(async move { analyzer.analyze(&payload).await });
        let outcome = match tokio::time::timeout(deadline, &mut call).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join)) => Err(AnalysisError::Unavailable(format!("analyzer task failed: {join}"))),
            Err(_) => {
                call.abort();
                Err(AnalysisError::Timeout(deadline))
            }
        };

        match outcome {
            Ok(analysis) => {
                tracing::info!(root_cause = ?analysis.root_cause, "failure analyzed");
                Some(analysis)
            }
            Err(err) => {
                tracing::warn!("failure analysis unavailable: {err}");
                None
            }
        }
    }
}

impl fmt::Debug for TestOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestOrchestrator")
            .field("engine", &self.engine)
            .field("has_analyzer", &self.analyzer.is_some())
            .field("stats", &self.stats())
            .finish()
    }
}
