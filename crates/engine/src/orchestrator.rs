//! The workflow state machine.
//!
//! [`Orchestrator::execute`] moves a workflow `Created -> Running`, runs every step in plan
//! order, records each result before moving on and finalises the status:
//!
//! - failed or skipped steps never halt the run; the workflow still ends `Completed`
//! - transfers gated on an unverified proof are recorded as skipped without a boundary call
//! - a store failure aborts the remaining steps and ends the workflow `Failed`
//!
//! Each workflow id executes at most once at a time within one orchestrator.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use zkflow_api::{HttpDeviceService, HttpProofService, HttpTransferService, ServiceClient};
use zkflow_types::{
    PlanDocument, PlanFormat, ProgressEvent, StatusReport, Step, StepResult, Workflow, WorkflowStatus, WorkflowSummary, parse_plan,
};

use crate::adapters::{StepAdapters, check_gate};
use crate::broadcaster::{DEFAULT_SINK_QUEUE_CAPACITY, HttpProgressSink, ProgressBroadcaster, ProgressSink};
use crate::cache::ProofResultCache;
use crate::config::EngineConfig;
use crate::error::{EngineError, StoreError};
use crate::outcome::WorkflowOutcome;
use crate::recipients::AddressBook;
use crate::store::{FileWorkflowStore, WorkflowStore};

const ABORTED_MESSAGE: &str = "aborted: workflow store became unavailable";
const INTERRUPTED_MESSAGE: &str = "interrupted: engine stopped before the step completed";

pub struct Orchestrator {
    store: Arc<dyn WorkflowStore>,
    adapters: StepAdapters,
    cache: ProofResultCache,
    broadcaster: ProgressBroadcaster,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn WorkflowStore>, adapters: StepAdapters, broadcaster: ProgressBroadcaster) -> Self {
        Self {
            store,
            adapters,
            cache: ProofResultCache::new(),
            broadcaster,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Wire the HTTP boundary clients, the file store and the optional webhook from configuration.
    /// No connection is opened until a step needs one. A configured webhook spawns its delivery
    /// task, which requires a Tokio runtime.
    pub fn from_config(config: &EngineConfig) -> Result<Self, EngineError> {
        let token = config.api_token.as_deref();
        let client = |url: &str| ServiceClient::new(url, token).map_err(|error| EngineError::configuration(error.to_string()));

        let proofs = Arc::new(HttpProofService::new(client(&config.proof_service_url)?));
        let transfers = Arc::new(HttpTransferService::new(client(&config.payment_service_url)?));
        let devices = Arc::new(HttpDeviceService::new(client(&config.device_service_url)?));

        let adapters = StepAdapters::new(proofs, transfers, devices)
            .with_address_book(AddressBook::with_overrides(&config.recipients))
            .with_timeouts(config.timeouts.step_timeouts())
            .with_step_size_hint(config.step_size_hint)
            .with_demo_fallback(config.demo_fallback);

        let mut sinks: Vec<Arc<dyn ProgressSink>> = Vec::new();
        if let Some(webhook) = &config.progress_webhook_url {
            let sink = HttpProgressSink::new(webhook, config.timeouts.progress(), token)
                .map_err(|error| EngineError::configuration(error.to_string()))?;
            sinks.push(Arc::new(sink));
        }
        let broadcaster = ProgressBroadcaster::with_sinks(sinks, DEFAULT_SINK_QUEUE_CAPACITY, config.timeouts.progress());

        let store = Arc::new(FileWorkflowStore::new(config.data_dir.clone()));
        Ok(Self::new(store, adapters, broadcaster))
    }

    pub fn cache(&self) -> &ProofResultCache {
        &self.cache
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.broadcaster.subscribe()
    }

    /// Validate a plan and persist it as a new `Created` workflow. Invalid plans leave no record.
    pub async fn submit(&self, plan: PlanDocument) -> Result<Workflow, EngineError> {
        let (description, steps) = plan.compile()?;
        let workflow = self.store.create(&description, steps).await?;
        info!(workflow_id = %workflow.id, steps = workflow.steps.len(), "workflow created");
        Ok(workflow)
    }

    /// Parse plan text (YAML or JSON) and submit it.
    pub async fn submit_text(&self, content: &str, format: Option<PlanFormat>) -> Result<Workflow, EngineError> {
        let plan = parse_plan(content, format)?;
        self.submit(plan).await
    }

    pub async fn get(&self, workflow_id: &str) -> Result<Workflow, EngineError> {
        Ok(self.store.get(workflow_id).await?)
    }

    pub async fn status(&self, workflow_id: &str) -> Result<StatusReport, EngineError> {
        Ok(self.store.get(workflow_id).await?.status_report())
    }

    pub async fn list(&self) -> Result<Vec<WorkflowSummary>, EngineError> {
        Ok(self.store.list().await?)
    }

    /// Run a `Created` workflow to completion.
    ///
    /// Returns `Err` only when execution never started (unknown id, already running, not in
    /// `Created`, or the initial status change failed). Once running, infrastructure failures
    /// are reported through an outcome with status `Failed`.
    pub async fn execute(&self, workflow_id: &str) -> Result<WorkflowOutcome, EngineError> {
        let _flight = InFlightGuard::acquire(&self.in_flight, workflow_id)?;

        let workflow = self.store.get(workflow_id).await?;
        if workflow.status != WorkflowStatus::Created {
            return Err(EngineError::InvalidState {
                id: workflow.id,
                status: workflow.status,
            });
        }
        self.store.update_status(workflow_id, WorkflowStatus::Running).await?;
        info!(workflow_id, steps = workflow.steps.len(), "workflow started");
        self.broadcaster.emit(ProgressEvent::WorkflowStarted {
            workflow_id: workflow_id.to_string(),
            steps: workflow.steps.iter().map(Step::summary).collect(),
            at: Utc::now(),
        });

        let mut results = BTreeMap::new();
        for step in &workflow.steps {
            self.broadcaster.emit(ProgressEvent::StepStarted {
                workflow_id: workflow_id.to_string(),
                index: step.index,
                kind: step.kind(),
                description: step.description.clone(),
                started_at: Utc::now(),
            });

            let result = self.dispatch(workflow_id, step).await;
            info!(
                workflow_id,
                step_index = step.index,
                kind = %step.kind(),
                success = result.success,
                skipped = result.skipped,
                "step finished"
            );

            results.insert(step.index, result.clone());
            if let Err(store_error) = self.store.record_step_result(workflow_id, step.index, result.clone()).await {
                return Ok(self.abort(&workflow, results, store_error).await);
            }
            self.broadcaster.emit(ProgressEvent::StepUpdated {
                workflow_id: workflow_id.to_string(),
                index: step.index,
                state: result.state(),
                result,
            });
        }

        if let Err(store_error) = self.store.update_status(workflow_id, WorkflowStatus::Completed).await {
            return Ok(self.abort(&workflow, results, store_error).await);
        }

        info!(workflow_id, "workflow completed");
        self.broadcaster.emit(ProgressEvent::WorkflowCompleted {
            workflow_id: workflow_id.to_string(),
            status: WorkflowStatus::Completed,
            completed_at: Utc::now(),
            error: None,
        });
        Ok(WorkflowOutcome::from_results(
            workflow_id,
            &workflow.steps,
            results,
            WorkflowStatus::Completed,
            None,
        ))
    }

    /// Finalise workflows left `Running` by a previous process as `Failed`, filling in the
    /// missing step results. Returns the ids that were recovered.
    pub async fn recover_interrupted(&self) -> Result<Vec<String>, EngineError> {
        let mut recovered = Vec::new();
        for summary in self.store.list().await? {
            if summary.status != WorkflowStatus::Running {
                continue;
            }
            // Workflows executing in this process are not interrupted.
            let Ok(_flight) = InFlightGuard::acquire(&self.in_flight, &summary.id) else {
                continue;
            };
            let workflow = self.store.get(&summary.id).await?;
            if workflow.status != WorkflowStatus::Running {
                continue;
            }

            for step in workflow.steps.iter().filter(|step| !workflow.results.contains_key(&step.index)) {
                let now = Utc::now();
                self.store
                    .record_step_result(&workflow.id, step.index, StepResult::failed(now, INTERRUPTED_MESSAGE))
                    .await?;
            }
            self.store.update_status(&workflow.id, WorkflowStatus::Failed).await?;
            warn!(workflow_id = %workflow.id, "recovered interrupted workflow as failed");
            self.broadcaster.emit(ProgressEvent::WorkflowCompleted {
                workflow_id: workflow.id.clone(),
                status: WorkflowStatus::Failed,
                completed_at: Utc::now(),
                error: Some(INTERRUPTED_MESSAGE.to_string()),
            });
            recovered.push(workflow.id);
        }
        Ok(recovered)
    }

    async fn dispatch(&self, workflow_id: &str, step: &Step) -> StepResult {
        if let Err(blocked) = check_gate(step, &self.cache).await {
            info!(workflow_id, step_index = step.index, reason = %blocked, "transfer skipped");
            return StepResult::skipped(Utc::now(), blocked.to_string());
        }
        self.adapters.run(workflow_id, step, &self.cache).await
    }

    /// Infrastructure failure: fill the remaining steps with aborted results, persist what can
    /// still be persisted and mark the workflow `Failed`.
    async fn abort(&self, workflow: &Workflow, mut results: BTreeMap<usize, StepResult>, cause: StoreError) -> WorkflowOutcome {
        let message = format!("infrastructure failure: {cause}");
        error!(workflow_id = %workflow.id, error = %cause, "workflow store failed; aborting workflow");

        let now = Utc::now();
        for step in &workflow.steps {
            results
                .entry(step.index)
                .or_insert_with(|| StepResult::failed(now, ABORTED_MESSAGE));
        }

        if let Ok(stored) = self.store.get(&workflow.id).await {
            for (index, result) in &results {
                if !stored.results.contains_key(index)
                    && let Err(error) = self.store.record_step_result(&workflow.id, *index, result.clone()).await
                {
                    warn!(workflow_id = %workflow.id, step_index = index, %error, "could not persist aborted step");
                    break;
                }
            }
        }
        if let Err(error) = self.store.update_status(&workflow.id, WorkflowStatus::Failed).await {
            warn!(workflow_id = %workflow.id, %error, "could not persist failed status");
        }

        self.broadcaster.emit(ProgressEvent::WorkflowCompleted {
            workflow_id: workflow.id.clone(),
            status: WorkflowStatus::Failed,
            completed_at: Utc::now(),
            error: Some(message.clone()),
        });
        WorkflowOutcome::from_results(&workflow.id, &workflow.steps, results, WorkflowStatus::Failed, Some(message))
    }
}

/// Marks a workflow id as executing; released on drop.
struct InFlightGuard {
    in_flight: Arc<Mutex<HashSet<String>>>,
    workflow_id: String,
}

impl InFlightGuard {
    fn acquire(in_flight: &Arc<Mutex<HashSet<String>>>, workflow_id: &str) -> Result<Self, EngineError> {
        if !lock_in_flight(in_flight).insert(workflow_id.to_string()) {
            return Err(EngineError::already_running(workflow_id));
        }
        Ok(Self {
            in_flight: Arc::clone(in_flight),
            workflow_id: workflow_id.to_string(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock_in_flight(&self.in_flight).remove(&self.workflow_id);
    }
}

fn lock_in_flight(in_flight: &Mutex<HashSet<String>>) -> std::sync::MutexGuard<'_, HashSet<String>> {
    in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
