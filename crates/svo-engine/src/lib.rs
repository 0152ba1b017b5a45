//! SVO Engine - execution-and-recovery core
//!
//! Drives a `TestExecutionPlan` against live services through pluggable
//! protocol adapters:
//! - Correlates every interaction of a run under one correlation id
//! - Retries transient failures with bounded exponential backoff
//! - Compensates completed steps in reverse order when a step fails
//! - Admits runs under a global concurrency limit
//! - Hands FAILED runs to an optional failure analyzer
//!
//! # Example
//!
//! ```rust,ignore
//! use svo_engine::{AdapterRegistry, EngineConfig, TestOrchestrator};
//! use svo_model::TestExecutionPlan;
//!
//! # async fn example(plan: TestExecutionPlan) -> Result<(), Box<dyn std::error::Error>> {
//! let registry = AdapterRegistry::with_builtins().with_adapter(my_http_adapter());
//! let orchestrator = TestOrchestrator::new(registry, EngineConfig::default())?;
//!
//! let result = orchestrator.execute_plan(&plan).await?;
//! println!("{}: {} interaction(s)", result.status, result.interactions.len());
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod adapter;
pub mod analysis;
pub mod config;
pub mod context;
pub mod correlation;
pub mod engine;
pub mod error;
pub mod graph;
pub mod metrics;
pub mod orchestrator;
pub mod retry;
pub mod rollback;
pub mod telemetry;

pub use adapter::{AdapterRegistry, AssertionAdapter, Invocation, ServiceAdapter, StepOutcome};
pub use analysis::{build_payload, FailureAnalyzer};
pub use config::{EngineConfig, TelemetryConfig};
pub use context::TestContext;
pub use correlation::{CorrelationTracker, TraceRejection};
pub use engine::ExecutionEngine;
pub use error::{AdapterError, AnalysisError, ConfigError, OrchestratorError, RollbackError};
pub use graph::StepGraph;
pub use metrics::MetricsAccumulator;
pub use orchestrator::{OrchestratorStats, TestOrchestrator};
pub use retry::{RetryController, RetryOutcome};
pub use rollback::{AdapterCompensation, Boundary, RollbackAction, RollbackCoordinator};
pub use telemetry::init_tracing;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for hosting the engine
    pub use crate::{
        AdapterError, AdapterRegistry, EngineConfig, FailureAnalyzer, Invocation,
        OrchestratorError, RollbackAction, ServiceAdapter, StepOutcome, TestContext,
        TestOrchestrator,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
