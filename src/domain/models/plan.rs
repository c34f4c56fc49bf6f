//! Plan domain model.
//!
//! A plan decomposes a task into ordered, dependency-linked steps, each
//! assigned to an agent role. Step dependencies form a DAG; every dependency
//! index must be strictly less than the dependent's own index, so ascending
//! index order is always a valid execution order.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use crate::domain::errors::ErrorKind;
use crate::domain::models::task::AgentRole;

/// One step of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    /// Order index, unique within the plan
    pub index: u32,
    /// What this step does
    pub description: String,
    /// Role assigned to execute it
    pub role: AgentRole,
    /// Repo-relative files this step will touch
    pub files: Vec<String>,
    /// Indices of steps that must precede this one
    #[serde(default)]
    pub depends_on: Vec<u32>,
}

/// A task's decomposition into steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// One-paragraph summary of the approach
    pub summary: String,
    /// Ordered steps
    pub steps: Vec<PlanStep>,
    /// Estimated complexity, 1 (trivial) to 10 (major rework)
    pub estimated_complexity: u8,
    /// All files the plan expects to touch
    #[serde(default)]
    pub affected_files: Vec<String>,
    /// Known risks
    #[serde(default)]
    pub risks: Vec<String>,
}

/// Plan validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("Plan has no steps")]
    Empty,

    #[error("Duplicate step index {0}")]
    DuplicateIndex(u32),

    #[error("Step {step} depends on unknown step {dependency}")]
    UnknownDependency { step: u32, dependency: u32 },

    #[error("Step {step} depends on step {dependency}, which does not precede it")]
    ForwardDependency { step: u32, dependency: u32 },

    #[error("Estimated complexity {0} outside 1..=10")]
    ComplexityOutOfRange(u8),

    #[error("Step {0} has an empty description")]
    EmptyDescription(u32),
}

impl PlanError {
    /// Stable classification for the failing task.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ForwardDependency { .. } => ErrorKind::CyclicPlan,
            _ => ErrorKind::InvalidPlan,
        }
    }
}

impl Plan {
    /// Validate the structural invariants of the plan.
    ///
    /// Checks, in order: non-empty, unique indices, complexity range,
    /// non-empty descriptions, dependency indices resolvable and strictly
    /// smaller than the dependent's index. A forward or self dependency is
    /// how a cycle manifests under the strict ordering rule, so it is
    /// reported as a cyclic plan.
    pub fn validate(&self) -> Result<(), PlanError> {
        if self.steps.is_empty() {
            return Err(PlanError::Empty);
        }
        if !(1..=10).contains(&self.estimated_complexity) {
            return Err(PlanError::ComplexityOutOfRange(self.estimated_complexity));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.index) {
                return Err(PlanError::DuplicateIndex(step.index));
            }
            if step.description.trim().is_empty() {
                return Err(PlanError::EmptyDescription(step.index));
            }
        }

        for step in &self.steps {
            for &dep in &step.depends_on {
                if !seen.contains(&dep) {
                    return Err(PlanError::UnknownDependency {
                        step: step.index,
                        dependency: dep,
                    });
                }
                if dep >= step.index {
                    return Err(PlanError::ForwardDependency {
                        step: step.index,
                        dependency: dep,
                    });
                }
            }
        }

        Ok(())
    }

    /// Steps sorted by index (execution order).
    pub fn ordered_steps(&self) -> Vec<&PlanStep> {
        let mut steps: Vec<&PlanStep> = self.steps.iter().collect();
        steps.sort_by_key(|s| s.index);
        steps
    }

    /// Look up a step by index.
    pub fn step(&self, index: u32) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.index == index)
    }

    /// Union of every step's declared files plus the plan-level set.
    pub fn all_declared_files(&self) -> Vec<String> {
        let mut files: Vec<String> = self.affected_files.clone();
        for step in &self.steps {
            for file in &step.files {
                if !files.contains(file) {
                    files.push(file.clone());
                }
            }
        }
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(index: u32, role: AgentRole, deps: Vec<u32>) -> PlanStep {
        PlanStep {
            index,
            description: format!("step {index}"),
            role,
            files: vec![format!("src/file_{index}.rs")],
            depends_on: deps,
        }
    }

    fn plan(steps: Vec<PlanStep>) -> Plan {
        Plan {
            summary: "test plan".to_string(),
            steps,
            estimated_complexity: 3,
            affected_files: vec![],
            risks: vec![],
        }
    }

    #[test]
    fn test_valid_plan() {
        let p = plan(vec![
            step(0, AgentRole::CoderBe, vec![]),
            step(1, AgentRole::CoderBe, vec![0]),
            step(2, AgentRole::Docs, vec![0, 1]),
        ]);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_empty_plan_rejected() {
        let p = plan(vec![]);
        assert_eq!(p.validate(), Err(PlanError::Empty));
        assert_eq!(PlanError::Empty.kind(), ErrorKind::InvalidPlan);
    }

    #[test]
    fn test_duplicate_index_rejected() {
        let p = plan(vec![
            step(0, AgentRole::CoderBe, vec![]),
            step(0, AgentRole::Qa, vec![]),
        ]);
        assert_eq!(p.validate(), Err(PlanError::DuplicateIndex(0)));
    }

    #[test]
    fn test_forward_dependency_is_cyclic() {
        let p = plan(vec![
            step(0, AgentRole::CoderBe, vec![1]),
            step(1, AgentRole::CoderBe, vec![0]),
        ]);
        let err = p.validate().unwrap_err();
        assert_eq!(
            err,
            PlanError::ForwardDependency {
                step: 0,
                dependency: 1
            }
        );
        assert_eq!(err.kind(), ErrorKind::CyclicPlan);
    }

    #[test]
    fn test_self_dependency_is_cyclic() {
        let p = plan(vec![step(0, AgentRole::CoderBe, vec![0])]);
        assert_eq!(p.validate().unwrap_err().kind(), ErrorKind::CyclicPlan);
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let p = plan(vec![step(1, AgentRole::CoderBe, vec![0])]);
        assert_eq!(
            p.validate(),
            Err(PlanError::UnknownDependency {
                step: 1,
                dependency: 0
            })
        );
    }

    #[test]
    fn test_complexity_bounds() {
        let mut p = plan(vec![step(0, AgentRole::CoderBe, vec![])]);
        p.estimated_complexity = 0;
        assert_eq!(p.validate(), Err(PlanError::ComplexityOutOfRange(0)));
        p.estimated_complexity = 11;
        assert_eq!(p.validate(), Err(PlanError::ComplexityOutOfRange(11)));
        p.estimated_complexity = 10;
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_ordered_steps_sorts_by_index() {
        let p = plan(vec![
            step(2, AgentRole::Docs, vec![]),
            step(0, AgentRole::CoderBe, vec![]),
            step(1, AgentRole::Qa, vec![0]),
        ]);
        let order: Vec<u32> = p.ordered_steps().iter().map(|s| s.index).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn test_all_declared_files_dedupes() {
        let mut p = plan(vec![
            step(0, AgentRole::CoderBe, vec![]),
            step(1, AgentRole::CoderBe, vec![0]),
        ]);
        p.affected_files = vec!["src/file_0.rs".to_string()];
        let files = p.all_declared_files();
        assert_eq!(
            files,
            vec!["src/file_0.rs".to_string(), "src/file_1.rs".to_string()]
        );
    }
}
