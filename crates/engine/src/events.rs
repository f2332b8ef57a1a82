//! Domain events emitted by the `Workflow` aggregate.
//!
//! Events are buffered on the aggregate and drained with
//! `Workflow::take_events`; consumers decide what to do with them
//! (persist, broadcast, log, ignore).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle events of a workflow definition and its executions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// A new execution record was created.
    ExecutionStarted {
        workflow_id: Uuid,
        execution_id: Uuid,
        triggered_by: String,
    },

    StepAdded {
        workflow_id: Uuid,
        step_id: String,
    },

    StepRemoved {
        workflow_id: Uuid,
        step_id: String,
    },

    /// A step was partially updated; `changed` lists the merged field names.
    StepUpdated {
        workflow_id: Uuid,
        step_id: String,
        changed: Vec<String>,
    },

    TriggerUpdated {
        workflow_id: Uuid,
    },

    Activated {
        workflow_id: Uuid,
    },

    Deactivated {
        workflow_id: Uuid,
    },

    /// The workflow was deep-copied into a fresh inactive definition.
    Cloned {
        source_id: Uuid,
        new_id: Uuid,
    },
}
