//! SVO Model - shared data model for service validation runs
//!
//! Plain data types exchanged between the planner, the execution engine and
//! the result consumer:
//! - Plans, steps and typed step payloads
//! - Retry policies and backoff arithmetic
//! - Data binding between steps (`${step.output.field}`)
//! - Service interactions, lifecycle events and run results
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//! use svo_model::prelude::*;
//!
//! let plan = TestExecutionPlan::new("smoke")
//!     .with_step(TestStep::new(
//!         "ping",
//!         "gateway",
//!         StepAction::new(StepKind::RestCall, json!({"method": "GET", "path": "/ping"})),
//!     ))
//!     .with_default_retry(RetryPolicy::new(3, 2.0, 50));
//!
//! assert!(plan.validate().is_ok());
//! ```

#![warn(unreachable_pub)]

pub mod analysis;
pub mod binding;
pub mod error;
pub mod event;
pub mod expectation;
pub mod ids;
pub mod interaction;
pub mod plan;
pub mod policy;
pub mod result;
pub mod step;

pub use analysis::{FailureAnalysis, FailurePayload, RemediationSuggestion, RootCauseCategory};
pub use binding::{ExecutionState, VARIABLES_PREFIX};
pub use error::{BindingError, PayloadError, PlanError, PolicyError};
pub use event::{EventKind, TestEvent};
pub use expectation::{Expectation, ExpectationFailure, ExpectationReport, Observation};
pub use ids::{ActionId, CorrelationId, RunId, ServiceId, StepId};
pub use interaction::{InteractionOutcome, InteractionType, ServiceInteraction};
pub use plan::TestExecutionPlan;
pub use policy::RetryPolicy;
pub use result::{
    CompensationRecord, CompensationStatus, ErrorKind, FailureCause, FailureRecord,
    MetricsSnapshot, RollbackFailure, RollbackResult, StepError, StepFailure, StepResult,
    StepStatus, TestResult, TestStatus,
};
pub use step::{
    AssertionPayload, CompensationDescriptor, DbQueryPayload, HttpMethod, MessageConsumePayload,
    MessageProducePayload, RestCallPayload, StepAction, StepKind, TestStep,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for building plans and reading results
    pub use crate::{
        CompensationDescriptor, CorrelationId, ErrorKind, Expectation, RetryPolicy, RunId,
        ServiceId, StepAction, StepId, StepKind, StepStatus, TestExecutionPlan, TestResult,
        TestStatus, TestStep,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
