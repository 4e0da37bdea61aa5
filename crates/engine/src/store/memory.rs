use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use zkflow_types::{Step, StepResult, Workflow, WorkflowStatus, WorkflowSummary};

use super::{WorkflowStore, apply_status, apply_step_result, new_workflow_id, sort_summaries};
use crate::error::StoreError;

/// In-process store for tests and ephemeral runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryWorkflowStore {
    workflows: Arc<Mutex<HashMap<String, Workflow>>>,
}

impl MemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a workflow as-is, bypassing lifecycle checks. Used to seed recovery scenarios.
    pub async fn insert(&self, workflow: Workflow) {
        self.workflows.lock().await.insert(workflow.id.clone(), workflow);
    }

    /// Drop a workflow, simulating a record that disappeared underneath the engine.
    pub async fn remove(&self, id: &str) -> Option<Workflow> {
        self.workflows.lock().await.remove(id)
    }
}

#[async_trait]
impl WorkflowStore for MemoryWorkflowStore {
    async fn create(&self, description: &str, steps: Vec<Step>) -> Result<Workflow, StoreError> {
        let workflow = Workflow::new(new_workflow_id(), description, steps);
        self.workflows.lock().await.insert(workflow.id.clone(), workflow.clone());
        Ok(workflow)
    }

    async fn get(&self, id: &str) -> Result<Workflow, StoreError> {
        self.workflows
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(id))
    }

    async fn update_status(&self, id: &str, status: WorkflowStatus) -> Result<Workflow, StoreError> {
        let mut workflows = self.workflows.lock().await;
        let workflow = workflows.get_mut(id).ok_or_else(|| StoreError::not_found(id))?;
        apply_status(workflow, status)?;
        Ok(workflow.clone())
    }

    async fn record_step_result(&self, id: &str, index: usize, result: StepResult) -> Result<Workflow, StoreError> {
        let mut workflows = self.workflows.lock().await;
        let workflow = workflows.get_mut(id).ok_or_else(|| StoreError::not_found(id))?;
        apply_step_result(workflow, index, result)?;
        Ok(workflow.clone())
    }

    async fn list(&self) -> Result<Vec<WorkflowSummary>, StoreError> {
        let mut summaries: Vec<WorkflowSummary> = self.workflows.lock().await.values().map(Workflow::summary).collect();
        sort_summaries(&mut summaries);
        Ok(summaries)
    }
}
