//! Durable workflow records.
//!
//! Backends implement [`WorkflowStore`]. Both share the mutation rules in this module so
//! status monotonicity and the one-result-per-step rule are enforced no matter where the
//! record lives.

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;
use zkflow_types::{Step, StepResult, Workflow, WorkflowStatus, WorkflowSummary};

use crate::error::StoreError;

mod file;
mod memory;

pub use file::FileWorkflowStore;
pub use memory::MemoryWorkflowStore;

/// Storage contract used by the orchestrator. Every write is durable before it returns.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Persist a new workflow in status `Created`.
    async fn create(&self, description: &str, steps: Vec<Step>) -> Result<Workflow, StoreError>;

    /// Fetch a workflow; unknown ids yield [`StoreError::NotFound`].
    async fn get(&self, id: &str) -> Result<Workflow, StoreError>;

    /// Move a workflow forward in its lifecycle.
    async fn update_status(&self, id: &str, status: WorkflowStatus) -> Result<Workflow, StoreError>;

    /// Record the single result of step `index` and advance the step cursor past it.
    async fn record_step_result(&self, id: &str, index: usize, result: StepResult) -> Result<Workflow, StoreError>;

    /// Summaries of every stored workflow, oldest first.
    async fn list(&self) -> Result<Vec<WorkflowSummary>, StoreError>;
}

/// Mint a new workflow id: `wf_<date>_<time>_<random suffix>`.
pub fn new_workflow_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("wf_{}_{}", Utc::now().format("%Y%m%d_%H%M%S"), &suffix[..8])
}

pub(crate) fn apply_status(workflow: &mut Workflow, status: WorkflowStatus) -> Result<(), StoreError> {
    if !workflow.status.can_transition_to(status) {
        return Err(StoreError::InvalidTransition {
            id: workflow.id.clone(),
            from: workflow.status,
            to: status,
        });
    }
    workflow.status = status;
    if status.is_terminal() {
        workflow.completed_at = Some(Utc::now());
    }
    Ok(())
}

pub(crate) fn apply_step_result(workflow: &mut Workflow, index: usize, result: StepResult) -> Result<(), StoreError> {
    if index >= workflow.steps.len() {
        return Err(StoreError::IndexOutOfRange {
            id: workflow.id.clone(),
            index,
            len: workflow.steps.len(),
        });
    }
    if workflow.results.contains_key(&index) {
        return Err(StoreError::DuplicateResult {
            id: workflow.id.clone(),
            index,
        });
    }
    workflow.results.insert(index, result);
    workflow.current_step_index = workflow.current_step_index.max(index + 1);
    Ok(())
}

pub(crate) fn sort_summaries(summaries: &mut [WorkflowSummary]) {
    summaries.sort_by(|left, right| left.created_at.cmp(&right.created_at).then_with(|| left.id.cmp(&right.id)));
}
