use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use zkflow_types::{Step, StepResult, Workflow, WorkflowStatus, WorkflowSummary};
use zkflow_util::{sanitize_identifier, write_atomic};

use super::{WorkflowStore, apply_status, apply_step_result, new_workflow_id, sort_summaries};
use crate::error::StoreError;

/// One pretty-printed `<id>.json` file per workflow under a single directory.
///
/// Writes go through a temporary file and a rename, so a crash leaves either the previous
/// or the new record. Read-modify-write cycles are serialised by an in-process lock.
#[derive(Debug)]
pub struct FileWorkflowStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FileWorkflowStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the record for `id`. Ids that could escape the directory are reported as unknown.
    fn record_path(&self, id: &str) -> Result<PathBuf, StoreError> {
        match sanitize_identifier(id) {
            Ok(sanitized) if sanitized == id => Ok(self.root.join(format!("{sanitized}.json"))),
            _ => Err(StoreError::not_found(id)),
        }
    }

    async fn read(&self, id: &str) -> Result<Workflow, StoreError> {
        let path = self.record_path(id)?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Err(StoreError::not_found(id)),
            Err(error) => return Err(StoreError::io(format!("read {}: {error}", path.display()))),
        };
        serde_json::from_str(&content).map_err(|error| StoreError::serialization(format!("parse {}: {error}", path.display())))
    }

    async fn write(&self, workflow: &Workflow) -> Result<(), StoreError> {
        let path = self.record_path(&workflow.id)?;
        let content = serde_json::to_string_pretty(workflow)
            .map_err(|error| StoreError::serialization(format!("encode workflow {}: {error}", workflow.id)))?;
        let target = path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&target, &content))
            .await
            .map_err(|error| StoreError::io(format!("write task for {} failed: {error}", path.display())))?
            .map_err(|error| StoreError::io(format!("{error:#}")))?;
        debug!(workflow_id = %workflow.id, path = %path.display(), "persisted workflow");
        Ok(())
    }

    async fn modify(&self, id: &str, change: impl FnOnce(&mut Workflow) -> Result<(), StoreError> + Send) -> Result<Workflow, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut workflow = self.read(id).await?;
        change(&mut workflow)?;
        self.write(&workflow).await?;
        Ok(workflow)
    }
}

#[async_trait]
impl WorkflowStore for FileWorkflowStore {
    async fn create(&self, description: &str, steps: Vec<Step>) -> Result<Workflow, StoreError> {
        let workflow = Workflow::new(new_workflow_id(), description, steps);
        let _guard = self.write_lock.lock().await;
        self.write(&workflow).await?;
        Ok(workflow)
    }

    async fn get(&self, id: &str) -> Result<Workflow, StoreError> {
        self.read(id).await
    }

    async fn update_status(&self, id: &str, status: WorkflowStatus) -> Result<Workflow, StoreError> {
        self.modify(id, move |workflow| apply_status(workflow, status)).await
    }

    async fn record_step_result(&self, id: &str, index: usize, result: StepResult) -> Result<Workflow, StoreError> {
        self.modify(id, move |workflow| apply_step_result(workflow, index, result)).await
    }

    async fn list(&self) -> Result<Vec<WorkflowSummary>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(StoreError::io(format!("read directory {}: {error}", self.root.display()))),
        };

        let mut summaries = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|error| StoreError::io(format!("walk directory {}: {error}", self.root.display())))?
        {
            let path = entry.path();
            if path.extension().and_then(|extension| extension.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            match self.read(id).await {
                Ok(workflow) => summaries.push(workflow.summary()),
                Err(error) => warn!(path = %path.display(), %error, "skipping unreadable workflow record"),
            }
        }
        sort_summaries(&mut summaries);
        Ok(summaries)
    }
}
