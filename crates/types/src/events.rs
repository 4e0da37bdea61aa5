//! Progress events emitted while a workflow executes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::workflow::{StepKind, StepResult, StepState, StepSummary, WorkflowStatus};

/// Lifecycle notifications pushed to progress observers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// The workflow moved to `Running`.
    WorkflowStarted {
        workflow_id: String,
        steps: Vec<StepSummary>,
        at: DateTime<Utc>,
    },
    /// A step was dispatched to its adapter.
    StepStarted {
        workflow_id: String,
        index: usize,
        kind: StepKind,
        description: String,
        started_at: DateTime<Utc>,
    },
    /// A step finished and its result was recorded.
    StepUpdated {
        workflow_id: String,
        index: usize,
        state: StepState,
        result: StepResult,
    },
    /// The workflow reached a terminal status.
    WorkflowCompleted {
        workflow_id: String,
        status: WorkflowStatus,
        completed_at: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl ProgressEvent {
    pub fn workflow_id(&self) -> &str {
        match self {
            Self::WorkflowStarted { workflow_id, .. }
            | Self::StepStarted { workflow_id, .. }
            | Self::StepUpdated { workflow_id, .. }
            | Self::WorkflowCompleted { workflow_id, .. } => workflow_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::WorkflowStarted { .. } => "workflow_started",
            Self::StepStarted { .. } => "step_started",
            Self::StepUpdated { .. } => "step_updated",
            Self::WorkflowCompleted { .. } => "workflow_completed",
        }
    }
}
