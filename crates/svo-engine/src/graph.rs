//! Step dependency graph
//!
//! Nodes are step positions in the plan. Edges come from declared
//! `depends_on`, from `${other.output...}` references and, for sequential
//! plans, from each step to its successor.

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;
use svo_model::{PlanError, TestExecutionPlan};

/// Validated, acyclic dependency graph of a plan
#[derive(Debug, Clone)]
pub struct StepGraph {
    graph: DiGraphMap<usize, ()>,
    order: Vec<usize>,
}

impl StepGraph {
    /// Build and check for cycles
    ///
    /// # Errors
    /// - `PlanError::UnknownDependency` / `PlanError::SelfDependency` for bad `depends_on`
    /// - `PlanError::DependencyCycle` naming a step on the cycle
    pub fn build(plan: &TestExecutionPlan) -> Result<Self, PlanError> {
        let mut graph = DiGraphMap::new();
        for index in 0..plan.steps.len() {
            graph.add_node(index);
        }

        for (index, step) in plan.steps.iter().enumerate() {
            if !plan.parallel && index > 0 {
                graph.add_edge(index - 1, index, ());
            }

            for dependency in &step.depends_on {
                let from = plan
                    .position(dependency)
                    .ok_or_else(|| PlanError::UnknownDependency {
                        step: step.id.clone(),
                        dependency: dependency.clone(),
                    })?;
                if from == index {
                    return Err(PlanError::SelfDependency(step.id.clone()));
                }
                graph.add_edge(from, index, ());
            }

            for referenced in plan.referenced_steps(step) {
                if let Some(from) = plan.position(&referenced) {
                    tracing::debug!(step_id = %step.id, depends_on = %referenced, "implicit dependency");
                    graph.add_edge(from, index, ());
                }
            }
        }

        let order = toposort(&graph, None)
            .map_err(|cycle| PlanError::DependencyCycle(plan.steps[cycle.node_id()].id.clone()))?;

        Ok(Self { graph, order })
    }

    /// Number of steps
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the graph has no steps
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// A topological order of step positions
    #[inline]
    #[must_use]
    pub fn topological_order(&self) -> &[usize] {
        &self.order
    }

    /// Steps that must finish before `index`, ascending
    #[must_use]
    pub fn dependencies(&self, index: usize) -> Vec<usize> {
        self.neighbors(index, Direction::Incoming)
    }

    /// Steps waiting on `index`, ascending
    #[must_use]
    pub fn dependents(&self, index: usize) -> Vec<usize> {
        self.neighbors(index, Direction::Outgoing)
    }

    /// Unfinished-dependency count per step
    #[must_use]
    pub fn in_degrees(&self) -> Vec<usize> {
        (0..self.len())
            .map(|i| self.graph.neighbors_directed(i, Direction::Incoming).count())
            .collect()
    }

    fn neighbors(&self, index: usize, direction: Direction) -> Vec<usize> {
        let mut found: Vec<usize> = self.graph.neighbors_directed(index, direction).collect();
        found.sort_unstable();
        found
    }
}
