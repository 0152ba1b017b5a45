//! Test execution plans
//!
//! A plan is the immutable input of one run. Steps run in declaration order
//! unless the plan is marked `parallel`, in which case only declared and
//! reference-derived dependencies constrain scheduling.

use crate::error::PlanError;
use crate::ids::StepId;
use crate::policy::RetryPolicy;
use crate::step::TestStep;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

/// Ordered set of steps plus run-wide defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestExecutionPlan {
    /// Plan name
    pub name: String,
    /// Steps in declaration order
    pub steps: Vec<TestStep>,
    /// Only explicit/implicit dependencies order steps
    #[serde(default)]
    pub parallel: bool,
    /// Plan-level retry fallback
    #[serde(default)]
    pub default_retry: Option<RetryPolicy>,
    /// Overall deadline in milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Values seeded under `vars.<name>`
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,
}

impl TestExecutionPlan {
    /// Create an empty sequential plan
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            parallel: false,
            default_retry: None,
            timeout_ms: None,
            variables: BTreeMap::new(),
        }
    }

    /// With step
    #[inline]
    #[must_use]
    pub fn with_step(mut self, step: TestStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Mark independent steps as parallelizable
    #[inline]
    #[must_use]
    pub fn parallel(mut self) -> Self {
        self.parallel = true;
        self
    }

    /// With plan-level retry default
    #[inline]
    #[must_use]
    pub fn with_default_retry(mut self, policy: RetryPolicy) -> Self {
        self.default_retry = Some(policy);
        self
    }

    /// With overall timeout
    #[inline]
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// With variable
    #[inline]
    #[must_use]
    pub fn with_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    /// Parse from JSON
    ///
    /// # Errors
    /// `PlanError::Parse` on malformed documents. Structure is not validated.
    pub fn from_json_str(input: &str) -> Result<Self, PlanError> {
        serde_json::from_str(input).map_err(|e| PlanError::Parse(e.to_string()))
    }

    /// Parse from YAML
    ///
    /// # Errors
    /// `PlanError::Parse` on malformed documents. Structure is not validated.
    pub fn from_yaml_str(input: &str) -> Result<Self, PlanError> {
        serde_yaml::from_str(input).map_err(|e| PlanError::Parse(e.to_string()))
    }

    /// Overall timeout, if declared
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Step by id
    #[must_use]
    pub fn step(&self, id: &StepId) -> Option<&TestStep> {
        self.steps.iter().find(|s| &s.id == id)
    }

    /// Position of a step in declaration order
    #[must_use]
    pub fn position(&self, id: &StepId) -> Option<usize> {
        self.steps.iter().position(|s| &s.id == id)
    }

    /// Steps whose state keys the given step references (`${other.output...}`)
    #[must_use]
    pub fn referenced_steps(&self, step: &TestStep) -> Vec<StepId> {
        let mut found: Vec<StepId> = Vec::new();
        for reference in step.action.references() {
            for candidate in &self.steps {
                if candidate.id == step.id || found.contains(&candidate.id) {
                    continue;
                }
                let id = candidate.id.as_str();
                let owned = reference
                    .strip_prefix(id)
                    .and_then(|rest| rest.strip_prefix('.'))
                    .is_some_and(|rest| {
                        rest == "output" || rest == "status" || rest.starts_with("output.")
                    });
                if owned {
                    found.push(candidate.id.clone());
                }
            }
        }
        found
    }

    /// Check structure: non-empty, unique ids, known dependencies, valid policies
    ///
    /// Cycles are detected when the step graph is built.
    ///
    /// # Errors
    /// The first `PlanError` found.
    pub fn validate(&self) -> Result<(), PlanError> {
        if self.steps.is_empty() {
            return Err(PlanError::Empty(self.name.clone()));
        }

        if let Some(policy) = &self.default_retry {
            policy
                .validate()
                .map_err(|source| PlanError::InvalidRetryPolicy { step: None, source })?;
        }

        let mut seen = HashSet::with_capacity(self.steps.len());
        for step in &self.steps {
            if !seen.insert(&step.id) {
                return Err(PlanError::DuplicateStep(step.id.clone()));
            }
        }

        for step in &self.steps {
            for dependency in &step.depends_on {
                if dependency == &step.id {
                    return Err(PlanError::SelfDependency(step.id.clone()));
                }
                if !seen.contains(dependency) {
                    return Err(PlanError::UnknownDependency {
                        step: step.id.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
            if let Some(policy) = &step.retry {
                policy.validate().map_err(|source| PlanError::InvalidRetryPolicy {
                    step: Some(step.id.clone()),
                    source,
                })?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{StepAction, StepKind};
    use serde_json::json;

    fn rest(id: &str, path: &str) -> TestStep {
        TestStep::new(
            id,
            "orders",
            StepAction::new(StepKind::RestCall, json!({"method": "GET", "path": path})),
        )
    }

    #[test]
    fn validate_accepts_well_formed_plan() {
        let plan = TestExecutionPlan::new("checkout")
            .with_step(rest("a", "/a"))
            .with_step(rest("b", "/b").depends_on("a"));
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn validate_rejects_structural_errors() {
        assert!(matches!(
            TestExecutionPlan::new("empty").validate(),
            Err(PlanError::Empty(_))
        ));

        let dup = TestExecutionPlan::new("dup")
            .with_step(rest("a", "/a"))
            .with_step(rest("a", "/b"));
        assert!(matches!(dup.validate(), Err(PlanError::DuplicateStep(_))));

        let unknown = TestExecutionPlan::new("unknown").with_step(rest("a", "/a").depends_on("z"));
        assert!(matches!(unknown.validate(), Err(PlanError::UnknownDependency { .. })));

        let own = TestExecutionPlan::new("self").with_step(rest("a", "/a").depends_on("a"));
        assert!(matches!(own.validate(), Err(PlanError::SelfDependency(_))));

        let policy = TestExecutionPlan::new("policy")
            .with_step(rest("a", "/a").with_retry(RetryPolicy::new(0, 2.0, 10)));
        assert!(matches!(
            policy.validate(),
            Err(PlanError::InvalidRetryPolicy { step: Some(_), .. })
        ));
    }

    #[test]
    fn referenced_steps_follow_output_references() {
        let plan = TestExecutionPlan::new("refs")
            .with_step(rest("create", "/orders"))
            .with_step(rest("create-2", "/orders"))
            .with_step(rest("fetch", "/orders/${create.output.id}?s=${create.status}"));
        let fetch = &plan.steps[2];
        assert_eq!(plan.referenced_steps(fetch), vec![StepId::new("create")]);
    }

    #[test]
    fn parses_yaml_plan() {
        let yaml = r#"
name: smoke
parallel: true
timeout_ms: 2000
variables:
  tenant: acme
steps:
  - id: ping
    service: gateway
    action:
      kind: REST_CALL
      payload:
        method: GET
        path: /ping
    expect:
      - type: STATUS_CODE
        equals: 200
"#;
        let plan = TestExecutionPlan::from_yaml_str(yaml).unwrap();
        assert!(plan.parallel);
        assert_eq!(plan.timeout(), Some(Duration::from_secs(2)));
        assert_eq!(plan.steps[0].expect.len(), 1);
        assert_eq!(plan.variables["tenant"], json!("acme"));
    }

    #[test]
    fn parse_errors_are_reported() {
        assert!(matches!(
            TestExecutionPlan::from_json_str("{not json"),
            Err(PlanError::Parse(_))
        ));
    }
}
