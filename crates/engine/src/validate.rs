//! Structural validation — run this before executing a workflow.
//!
//! Rules enforced:
//! 1. The workflow has a non-empty name and at least one step.
//! 2. Step IDs are unique within the workflow.
//! 3. Every `next_steps` reference resolves to an existing step ID.
//! 4. The reference graph is acyclic (DFS with recursion-stack detection).
//! 5. Trigger-specific required fields are present (`cron_expression` for
//!    schedule triggers, `event_type` for event triggers).
//!
//! Unlike execution errors, validation problems are *collected*, never
//! thrown: the report lists every violation found.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use steps::WorkflowStep;

use crate::models::{Trigger, Workflow};

/// One structural violation.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ValidationError {
    #[error("workflow name must not be empty")]
    EmptyName,

    #[error("workflow must have at least one step")]
    NoSteps,

    #[error("duplicate step id: '{0}'")]
    DuplicateStepId(String),

    #[error("step '{step_id}' references unknown next step '{target}'")]
    UnknownNextStep { step_id: String, target: String },

    #[error("circular dependency involving step '{0}'")]
    CircularDependency(String),

    #[error("schedule trigger requires a cron expression")]
    MissingCronExpression,

    #[error("invalid cron expression '{0}': expected 5 whitespace-separated fields")]
    InvalidCronExpression(String),

    #[error("event trigger requires an event type")]
    MissingEventType,
}

/// The outcome of [`Workflow::validate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<ValidationError>,
}

impl ValidationReport {
    fn from_errors(errors: Vec<ValidationError>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
        }
    }
}

impl Workflow {
    /// Collect every structural violation in the definition.
    pub fn validate(&self) -> ValidationReport {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push(ValidationError::EmptyName);
        }
        if self.steps.is_empty() {
            errors.push(ValidationError::NoSteps);
        }

        // Unique step ids.
        let mut seen: HashSet<&str> = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.id.as_str()) {
                errors.push(ValidationError::DuplicateStepId(step.id.clone()));
            }
        }

        // Every edge target must exist.
        for step in &self.steps {
            for target in &step.next_steps {
                if !seen.contains(target.as_str()) {
                    errors.push(ValidationError::UnknownNextStep {
                        step_id: step.id.clone(),
                        target: target.clone(),
                    });
                }
            }
        }

        if let Some(step_id) = find_cycle(&self.steps) {
            errors.push(ValidationError::CircularDependency(step_id));
        }

        match &self.trigger {
            Trigger::Schedule { cron_expression } => {
                if cron_expression.trim().is_empty() {
                    errors.push(ValidationError::MissingCronExpression);
                } else if cron_expression.split_whitespace().count() != 5 {
                    errors.push(ValidationError::InvalidCronExpression(
                        cron_expression.clone(),
                    ));
                }
            }
            Trigger::Event { event_type } => {
                if event_type.trim().is_empty() {
                    errors.push(ValidationError::MissingEventType);
                }
            }
            Trigger::Manual | Trigger::Api => {}
        }

        ValidationReport::from_errors(errors)
    }
}

/// Steps never named in any other step's `next_steps` — the in-degree-zero
/// entry points of the graph, in definition order.
pub fn starting_steps(steps: &[WorkflowStep]) -> Vec<String> {
    let referenced: HashSet<&str> = steps
        .iter()
        .flat_map(|s| s.next_steps.iter().map(String::as_str))
        .collect();

    steps
        .iter()
        .filter(|s| !referenced.contains(s.id.as_str()))
        .map(|s| s.id.clone())
        .collect()
}

// ---------------------------------------------------------------------------
// Cycle detection
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq)]
enum VisitState {
    Unvisited,
    InStack,
    Done,
}

/// DFS with a recursion stack; returns the step at which a back-edge was
/// found, or `None` for an acyclic graph. Edges to unknown ids are ignored
/// here — they are reported separately as `UnknownNextStep`.
fn find_cycle(workflow_steps: &[WorkflowStep]) -> Option<String> {
    let adjacency: HashMap<&str, &[String]> = workflow_steps
        .iter()
        .map(|s| (s.id.as_str(), s.next_steps.as_slice()))
        .collect();

    let mut states: HashMap<&str, VisitState> = workflow_steps
        .iter()
        .map(|s| (s.id.as_str(), VisitState::Unvisited))
        .collect();

    fn dfs<'a>(
        node: &'a str,
        adjacency: &HashMap<&'a str, &'a [String]>,
        states: &mut HashMap<&'a str, VisitState>,
    ) -> Option<String> {
        states.insert(node, VisitState::InStack);

        for target in adjacency.get(node).copied().unwrap_or_default() {
            match states.get(target.as_str()) {
                Some(VisitState::InStack) => return Some(target.clone()),
                Some(VisitState::Unvisited) => {
                    if let Some(found) = dfs(target, adjacency, states) {
                        return Some(found);
                    }
                }
                Some(VisitState::Done) | None => {}
            }
        }

        states.insert(node, VisitState::Done);
        None
    }

    for step in workflow_steps {
        if states[step.id.as_str()] == VisitState::Unvisited {
            if let Some(found) = dfs(&step.id, &adjacency, &mut states) {
                return Some(found);
            }
        }
    }
    None
}
