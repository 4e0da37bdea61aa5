use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::sync::Notify;
use zkflow_api::{
    BoundaryError, DeviceReceipt, DeviceRegistrationRequest, DeviceService, ProofReceipt, ProofRequest, ProofService,
    ProximityRequest, RewardClaimRequest, TransferReceipt, TransferRequest, TransferService, VerificationRequest,
    VerificationVerdict,
};
use zkflow_engine::{
    EngineConfig, EngineError, MemoryWorkflowStore, Orchestrator, ProgressBroadcaster, StepAdapters, StepTimeouts, StoreError, WorkflowStore,
};
use zkflow_types::{
    ProgressEvent, ProofType, Step, StepAction, StepResult, StepState, Workflow, WorkflowStatus, WorkflowSummary,
};

#[derive(Default)]
struct FakeProofs {
    generated: AtomicUsize,
    verified: AtomicUsize,
    generation_delay: Option<Duration>,
    release: Option<Arc<Notify>>,
    reject_verification: bool,
}

#[async_trait]
impl ProofService for FakeProofs {
    async fn generate(&self, request: ProofRequest) -> Result<ProofReceipt, BoundaryError> {
        self.generated.fetch_add(1, Ordering::SeqCst);
        if let Some(release) = &self.release {
            release.notified().await;
        }
        if let Some(delay) = self.generation_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(ProofReceipt {
            proof_id: request.proof_id,
            output: json!({"function": request.function, "arguments": request.arguments}),
        })
    }

    async fn verify(&self, request: VerificationRequest) -> Result<VerificationVerdict, BoundaryError> {
        self.verified.fetch_add(1, Ordering::SeqCst);
        Ok(VerificationVerdict {
            proof_id: request.proof_id,
            is_valid: !self.reject_verification,
            output: json!({"isValid": !self.reject_verification}),
        })
    }
}

#[derive(Default)]
struct FakeTransfers {
    calls: AtomicUsize,
}

#[async_trait]
impl TransferService for FakeTransfers {
    async fn transfer(&self, request: TransferRequest) -> Result<TransferReceipt, BoundaryError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(TransferReceipt {
            transfer_id: format!("tx-{call}"),
            output: json!({"recipientAddress": request.recipient_address, "amount": request.amount}),
        })
    }
}

#[derive(Default)]
struct FakeDevices {
    calls: AtomicUsize,
    unavailable: bool,
}

impl FakeDevices {
    fn answer(&self, within_proximity: Option<bool>) -> Result<DeviceReceipt, BoundaryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable {
            return Err(BoundaryError::unavailable("connection refused"));
        }
        Ok(DeviceReceipt {
            success: true,
            transaction_hash: Some("0xfeed".to_string()),
            within_proximity,
            error: None,
            output: json!({"success": true}),
        })
    }
}

#[async_trait]
impl DeviceService for FakeDevices {
    async fn register_device(&self, _request: DeviceRegistrationRequest) -> Result<DeviceReceipt, BoundaryError> {
        self.answer(None)
    }

    async fn verify_proximity(&self, _request: ProximityRequest) -> Result<DeviceReceipt, BoundaryError> {
        self.answer(Some(true))
    }

    async fn claim_rewards(&self, _request: RewardClaimRequest) -> Result<DeviceReceipt, BoundaryError> {
        self.answer(None)
    }
}

/// Memory store whose `record_step_result` fails exactly once, on the given call.
struct FlakyStore {
    inner: MemoryWorkflowStore,
    record_calls: AtomicUsize,
    fail_on_call: usize,
}

#[async_trait]
impl WorkflowStore for FlakyStore {
    async fn create(&self, description: &str, steps: Vec<Step>) -> Result<Workflow, StoreError> {
        self.inner.create(description, steps).await
    }

    async fn get(&self, id: &str) -> Result<Workflow, StoreError> {
        self.inner.get(id).await
    }

    async fn update_status(&self, id: &str, status: WorkflowStatus) -> Result<Workflow, StoreError> {
        self.inner.update_status(id, status).await
    }

    async fn record_step_result(&self, id: &str, index: usize, result: StepResult) -> Result<Workflow, StoreError> {
        let call = self.record_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on_call {
            return Err(StoreError::io("disk full"));
        }
        self.inner.record_step_result(id, index, result).await
    }

    async fn list(&self) -> Result<Vec<WorkflowSummary>, StoreError> {
        self.inner.list().await
    }
}

struct Harness {
    orchestrator: Orchestrator,
    proofs: Arc<FakeProofs>,
    transfers: Arc<FakeTransfers>,
    devices: Arc<FakeDevices>,
}

fn harness_with(store: Arc<dyn WorkflowStore>, proofs: FakeProofs, devices: FakeDevices, configure: impl FnOnce(StepAdapters) -> StepAdapters) -> Harness {
    let proofs = Arc::new(proofs);
    let transfers = Arc::new(FakeTransfers::default());
    let devices = Arc::new(devices);
    let adapters = configure(StepAdapters::new(proofs.clone(), transfers.clone(), devices.clone()));
    Harness {
        orchestrator: Orchestrator::new(store, adapters, ProgressBroadcaster::new()),
        proofs,
        transfers,
        devices,
    }
}

fn harness(proofs: FakeProofs) -> Harness {
    harness_with(Arc::new(MemoryWorkflowStore::new()), proofs, FakeDevices::default(), |adapters| adapters)
}

const KYC_THEN_TRANSFER: &str = r#"
description: prove kyc and pay alice
steps:
  - kind: proof_generation
    description: generate kyc proof
    proof_type: kyc
  - kind: verification
    description: verify kyc proof
    proof_type: kyc
  - kind: transfer
    description: send 1 to alice
    amount: 1
    recipient: alice
    requires_proof_of_type: kyc
"#;

#[tokio::test]
async fn verified_proof_unlocks_exactly_one_transfer() {
    let harness = harness(FakeProofs::default());
    let workflow = harness.orchestrator.submit_text(KYC_THEN_TRANSFER, None).await.expect("submit");
    let outcome = harness.orchestrator.execute(&workflow.id).await.expect("execute");

    assert_eq!(outcome.status, WorkflowStatus::Completed);
    assert_eq!(outcome.results.len(), 3);
    assert!(outcome.results.values().all(|result| result.success));
    assert!(!outcome.results[&2].skipped);
    assert_eq!(outcome.results[&2].transfer_id.as_deref(), Some("tx-0"));
    assert_eq!(harness.transfers.calls.load(Ordering::SeqCst), 1);
    assert_eq!(outcome.transfer_ids, vec!["tx-0".to_string()]);
    assert!(outcome.proof_summary[&ProofType::Kyc].verified);
    assert!(outcome.results[&0].proof_id.as_deref().is_some_and(|id| id.starts_with("proof_kyc_")));

    let report = harness.orchestrator.status(&workflow.id).await.expect("status");
    assert_eq!(report.status, WorkflowStatus::Completed);
    assert_eq!(report.current_step_index, 3);
    assert_eq!(report.step_states, vec![StepState::Succeeded; 3]);
}

#[tokio::test]
async fn transfer_without_verified_proof_is_skipped_without_boundary_call() {
    let harness = harness(FakeProofs::default());
    let plan = r#"{"steps": [{"kind": "transfer", "amount": 5, "recipient": "bob", "requires_proof_of_type": "location"}]}"#;
    let workflow = harness.orchestrator.submit_text(plan, None).await.expect("submit");
    let outcome = harness.orchestrator.execute(&workflow.id).await.expect("execute");

    assert_eq!(outcome.status, WorkflowStatus::Completed);
    assert_eq!(outcome.results.len(), 1);
    let result = &outcome.results[&0];
    assert!(result.skipped);
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("location proof not verified"));
    assert_eq!(harness.transfers.calls.load(Ordering::SeqCst), 0);

    let report = harness.orchestrator.status(&workflow.id).await.expect("status");
    assert_eq!(report.step_states, vec![StepState::Skipped]);
}

#[tokio::test]
async fn unverified_proof_still_blocks_transfer() {
    let harness = harness(FakeProofs::default());
    let plan = r#"
steps:
  - kind: proof_generation
    proof_type: kyc
  - kind: transfer
    amount: "0.5"
    recipient: charlie
    blockchain: SOL
    requires_proof_of_type: kyc
"#;
    let workflow = harness.orchestrator.submit_text(plan, None).await.expect("submit");
    let outcome = harness.orchestrator.execute(&workflow.id).await.expect("execute");

    assert!(outcome.results[&0].success);
    assert!(outcome.results[&1].skipped);
    assert_eq!(harness.transfers.calls.load(Ordering::SeqCst), 0);
    assert!(!outcome.proof_summary[&ProofType::Kyc].verified);
}

#[tokio::test]
async fn proof_timeout_fails_the_step_but_completes_the_workflow() {
    let proofs = FakeProofs {
        generation_delay: Some(Duration::from_millis(500)),
        ..FakeProofs::default()
    };
    let harness = harness_with(Arc::new(MemoryWorkflowStore::new()), proofs, FakeDevices::default(), |adapters| {
        adapters.with_timeouts(StepTimeouts {
            proof_generation: Duration::from_millis(20),
            ..StepTimeouts::default()
        })
    });
    let workflow = harness.orchestrator.submit_text(KYC_THEN_TRANSFER, None).await.expect("submit");
    let outcome = harness.orchestrator.execute(&workflow.id).await.expect("execute");

    assert_eq!(outcome.status, WorkflowStatus::Completed);
    assert_eq!(outcome.results.len(), 3);
    let generation = &outcome.results[&0];
    assert!(!generation.success);
    assert!(generation.error.as_deref().is_some_and(|error| error.contains("timeout")), "{generation:?}");
    assert_eq!(outcome.results[&1].error.as_deref(), Some("No proof found for kyc"));
    assert!(outcome.results[&2].skipped);
    assert_eq!(harness.proofs.verified.load(Ordering::SeqCst), 0);
    assert_eq!(harness.transfers.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn rejected_verification_keeps_transfer_gated() {
    let harness = harness(FakeProofs {
        reject_verification: true,
        ..FakeProofs::default()
    });
    let workflow = harness.orchestrator.submit_text(KYC_THEN_TRANSFER, None).await.expect("submit");
    let outcome = harness.orchestrator.execute(&workflow.id).await.expect("execute");

    assert!(!outcome.results[&1].success);
    assert!(outcome.results[&1].error.as_deref().is_some_and(|error| error.contains("failed verification")));
    assert!(outcome.results[&2].skipped);
    assert_eq!(outcome.status, WorkflowStatus::Completed);
}

#[tokio::test]
async fn unknown_recipient_fails_before_the_payment_rail() {
    let harness = harness(FakeProofs::default());
    let plan = r#"{"steps": [{"kind": "transfer", "amount": "2", "recipient": "mallory"}]}"#;
    let workflow = harness.orchestrator.submit_text(plan, None).await.expect("submit");
    let outcome = harness.orchestrator.execute(&workflow.id).await.expect("execute");

    let result = &outcome.results[&0];
    assert!(!result.success);
    assert!(!result.skipped);
    assert!(result.error.as_deref().is_some_and(|error| error.contains("unknown recipient")));
    assert_eq!(harness.transfers.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unknown_workflow_ids_are_not_found() {
    let harness = harness(FakeProofs::default());
    assert!(matches!(
        harness.orchestrator.execute("wf_missing").await,
        Err(EngineError::NotFound { id }) if id == "wf_missing"
    ));
    assert!(matches!(harness.orchestrator.status("wf_missing").await, Err(EngineError::NotFound { .. })));
}

#[tokio::test]
async fn invalid_plans_create_nothing() {
    let harness = harness(FakeProofs::default());
    let plan = r#"{"steps": [{"kind": "verification", "proof_type": "kyc", "requires_proof_of_type": "kyc"}]}"#;
    assert!(matches!(
        harness.orchestrator.submit_text(plan, None).await,
        Err(EngineError::PlanInvalid(_))
    ));
    assert!(matches!(
        harness.orchestrator.submit_text("steps: [", None).await,
        Err(EngineError::PlanInvalid(_))
    ));
    assert!(harness.orchestrator.list().await.expect("list").is_empty());
}

#[tokio::test]
async fn lifecycle_events_follow_the_status_order() {
    let harness = harness(FakeProofs::default());
    let mut events = harness.orchestrator.subscribe();
    let workflow = harness.orchestrator.submit_text(KYC_THEN_TRANSFER, None).await.expect("submit");
    assert_eq!(harness.orchestrator.status(&workflow.id).await.expect("status").status, WorkflowStatus::Created);

    harness.orchestrator.execute(&workflow.id).await.expect("execute");

    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }
    assert_eq!(received.len(), 1 + 3 * 2 + 1);
    assert!(matches!(&received[0], ProgressEvent::WorkflowStarted { steps, .. } if steps.len() == 3));
    assert!(matches!(received[1], ProgressEvent::StepStarted { index: 0, .. }));
    assert!(matches!(received[2], ProgressEvent::StepUpdated { index: 0, state: StepState::Succeeded, .. }));
    assert!(matches!(
        received.last(),
        Some(ProgressEvent::WorkflowCompleted {
            status: WorkflowStatus::Completed,
            ..
        })
    ));

    assert!(matches!(
        harness.orchestrator.execute(&workflow.id).await,
        Err(EngineError::InvalidState {
            status: WorkflowStatus::Completed,
            ..
        })
    ));
    assert_eq!(harness.orchestrator.status(&workflow.id).await.expect("status").status, WorkflowStatus::Completed);
}

#[tokio::test]
async fn store_failure_marks_the_workflow_failed() {
    let store = Arc::new(FlakyStore {
        inner: MemoryWorkflowStore::new(),
        record_calls: AtomicUsize::new(0),
        fail_on_call: 2,
    });
    let harness = harness_with(store.clone(), FakeProofs::default(), FakeDevices::default(), |adapters| adapters);
    let workflow = harness.orchestrator.submit_text(KYC_THEN_TRANSFER, None).await.expect("submit");
    let outcome = harness.orchestrator.execute(&workflow.id).await.expect("outcome");

    assert_eq!(outcome.status, WorkflowStatus::Failed);
    assert!(outcome.error.as_deref().is_some_and(|error| error.contains("disk full")));
    assert_eq!(outcome.results.len(), 3);
    assert!(outcome.results[&2].error.as_deref().is_some_and(|error| error.starts_with("aborted")));
    assert_eq!(harness.transfers.calls.load(Ordering::SeqCst), 0);

    let stored = store.get(&workflow.id).await.expect("stored");
    assert_eq!(stored.status, WorkflowStatus::Failed);
    assert_eq!(stored.results.len(), stored.steps.len());
    assert!(stored.completed_at.is_some());
}

/// Deletes the workflow record while the registration call is in flight.
struct VanishingDevices {
    store: Arc<MemoryWorkflowStore>,
    workflow_id: std::sync::Mutex<Option<String>>,
}

#[async_trait]
impl DeviceService for VanishingDevices {
    async fn register_device(&self, _request: DeviceRegistrationRequest) -> Result<DeviceReceipt, BoundaryError> {
        let id = self.workflow_id.lock().expect("lock").clone();
        if let Some(id) = id {
            self.store.remove(&id).await;
        }
        Ok(DeviceReceipt {
            success: true,
            transaction_hash: None,
            within_proximity: None,
            error: None,
            output: json!({}),
        })
    }

    async fn verify_proximity(&self, _request: ProximityRequest) -> Result<DeviceReceipt, BoundaryError> {
        Err(BoundaryError::failed("not used"))
    }

    async fn claim_rewards(&self, _request: RewardClaimRequest) -> Result<DeviceReceipt, BoundaryError> {
        Err(BoundaryError::failed("not used"))
    }
}

#[tokio::test]
async fn vanished_record_fails_the_workflow() {
    let store = Arc::new(MemoryWorkflowStore::new());
    let devices = Arc::new(VanishingDevices {
        store: store.clone(),
        workflow_id: std::sync::Mutex::new(None),
    });
    let adapters = StepAdapters::new(Arc::new(FakeProofs::default()), Arc::new(FakeTransfers::default()), devices.clone());
    let orchestrator = Orchestrator::new(store.clone(), adapters, ProgressBroadcaster::new());
    let mut events = orchestrator.subscribe();

    let plan = r#"{"steps": [{"kind": "device_registration", "device_id": "DEV-1"}, {"kind": "reward_claim", "device_id": "DEV-1"}]}"#;
    let workflow = orchestrator.submit_text(plan, None).await.expect("submit");
    *devices.workflow_id.lock().expect("lock") = Some(workflow.id.clone());

    let outcome = orchestrator.execute(&workflow.id).await.expect("outcome");
    assert_eq!(outcome.status, WorkflowStatus::Failed);
    assert_eq!(outcome.results.len(), 2);
    assert!(outcome.error.as_deref().is_some_and(|error| error.starts_with("infrastructure failure")));
    assert!(outcome.results[&1].error.as_deref().is_some_and(|error| error.starts_with("aborted")));
    assert!(matches!(orchestrator.status(&workflow.id).await, Err(EngineError::NotFound { .. })));

    let mut last = None;
    while let Ok(event) = events.try_recv() {
        last = Some(event);
    }
    assert!(matches!(
        last,
        Some(ProgressEvent::WorkflowCompleted {
            status: WorkflowStatus::Failed,
            ..
        })
    ));
}

#[tokio::test]
async fn concurrent_execution_of_the_same_id_is_rejected() {
    let release = Arc::new(Notify::new());
    let harness = Arc::new(harness(FakeProofs {
        release: Some(release.clone()),
        ..FakeProofs::default()
    }));
    let workflow = harness.orchestrator.submit_text(KYC_THEN_TRANSFER, None).await.expect("submit");
    let mut events = harness.orchestrator.subscribe();

    let first = {
        let harness = Arc::clone(&harness);
        let id = workflow.id.clone();
        tokio::spawn(async move { harness.orchestrator.execute(&id).await })
    };
    loop {
        if let ProgressEvent::StepStarted { index: 0, .. } = events.recv().await.expect("event") {
            break;
        }
    }

    assert!(matches!(
        harness.orchestrator.execute(&workflow.id).await,
        Err(EngineError::AlreadyRunning { .. })
    ));
    let report = harness.orchestrator.status(&workflow.id).await.expect("status");
    assert_eq!(report.status, WorkflowStatus::Running);
    assert_eq!(report.step_states[0], StepState::Running);

    release.notify_one();
    let outcome = first.await.expect("join").expect("execute");
    assert_eq!(outcome.status, WorkflowStatus::Completed);
    assert_eq!(harness.proofs.generated.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn device_steps_use_placeholders_when_the_network_is_down() {
    let harness = harness_with(
        Arc::new(MemoryWorkflowStore::new()),
        FakeProofs::default(),
        FakeDevices {
            unavailable: true,
            ..FakeDevices::default()
        },
        |adapters| adapters,
    );
    let plan = r#"
steps:
  - kind: device_registration
    device_id: DEV-42
  - kind: proximity_verification
    device_id: DEV-42
  - kind: reward_claim
    device_id: DEV-42
"#;
    let workflow = harness.orchestrator.submit_text(plan, None).await.expect("submit");
    let outcome = harness.orchestrator.execute(&workflow.id).await.expect("execute");

    assert_eq!(harness.devices.calls.load(Ordering::SeqCst), 3);
    assert!(outcome.results.values().all(|result| result.demo_mode));

    let registration = &outcome.results[&0];
    assert!(registration.success);
    let hash = registration.transaction_hash.as_deref().expect("hash");
    assert!(hash.starts_with("0x") && hash.ends_with(&"0".repeat(48)));
    assert_eq!(hash.len(), 2 + 16 + 48);

    let proximity = &outcome.results[&1];
    assert!(proximity.success);
    assert_eq!(proximity.verified, Some(true));
    assert!(proximity.transaction_hash.as_deref().is_some_and(|hash| hash.ends_with(&"1".repeat(48))));

    let reward = &outcome.results[&2];
    assert!(!reward.success);
    assert_eq!(reward.error.as_deref(), Some("no rewards available (demo mode)"));
    assert_eq!(reward.transaction_hash.as_deref(), Some("no_rewards_available"));
    assert_eq!(outcome.status, WorkflowStatus::Completed);
}

#[tokio::test]
async fn disabling_demo_fallback_surfaces_device_failures() {
    let harness = harness_with(
        Arc::new(MemoryWorkflowStore::new()),
        FakeProofs::default(),
        FakeDevices {
            unavailable: true,
            ..FakeDevices::default()
        },
        |adapters| adapters.with_demo_fallback(false),
    );
    let plan = r#"{"steps": [{"kind": "device_registration", "device_id": "DEV-1"}]}"#;
    let workflow = harness.orchestrator.submit_text(plan, None).await.expect("submit");
    let outcome = harness.orchestrator.execute(&workflow.id).await.expect("execute");

    let result = &outcome.results[&0];
    assert!(!result.success);
    assert!(!result.demo_mode);
    assert!(result.error.as_deref().is_some_and(|error| error.contains("connection refused")));
}

#[tokio::test]
async fn interrupted_workflows_are_recovered_as_failed() {
    let store = Arc::new(MemoryWorkflowStore::new());
    let harness = harness_with(store.clone(), FakeProofs::default(), FakeDevices::default(), |adapters| adapters);

    let steps: Vec<Step> = (0..3)
        .map(|index| Step {
            index,
            description: String::new(),
            action: StepAction::DeviceRegistration {
                device_id: format!("DEV-{index}"),
            },
            requires_proof_of_type: None,
        })
        .collect();
    let mut interrupted = Workflow::new("wf_interrupted", "left running", steps);
    interrupted.status = WorkflowStatus::Running;
    interrupted.results.insert(0, StepResult::succeeded(Utc::now()));
    interrupted.current_step_index = 1;
    store.insert(interrupted).await;
    let untouched = store.create("fresh", Vec::new()).await.expect("create");

    let recovered = harness.orchestrator.recover_interrupted().await.expect("recover");
    assert_eq!(recovered, vec!["wf_interrupted".to_string()]);

    let workflow = store.get("wf_interrupted").await.expect("get");
    assert_eq!(workflow.status, WorkflowStatus::Failed);
    assert_eq!(workflow.results.len(), 3);
    assert!(workflow.results[&2].error.as_deref().is_some_and(|error| error.starts_with("interrupted")));
    assert_eq!(store.get(&untouched.id).await.expect("get").status, WorkflowStatus::Created);
}

#[test]
fn wiring_from_configuration_opens_no_connections() {
    // Outside a runtime: any eager listener or delivery task would panic on spawn.
    let config = EngineConfig {
        progress_webhook_url: None,
        ..EngineConfig::default()
    };
    assert!(Orchestrator::from_config(&config).is_ok());
}
