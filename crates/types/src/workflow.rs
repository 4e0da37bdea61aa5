//! Strongly typed workflow model shared by the engine, the boundary clients and the CLI.
//!
//! A [`Workflow`] is created once per submitted plan. Its [`Step`]s are immutable after
//! compilation; only the status, the step cursor and the per-step [`StepResult`]s change
//! while the orchestrator drives it.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

pub mod plan;
pub mod validation;

/// Proof categories understood by the proof service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ProofType {
    /// Identity (know-your-customer) attestation.
    Kyc,
    /// Geographic location attestation.
    Location,
    /// Authenticity of AI generated content.
    AiContent,
}

impl ProofType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Kyc => "kyc",
            Self::Location => "location",
            Self::AiContent => "ai_content",
        }
    }

    /// Identifier of the proving function invoked on the proof service.
    pub fn function_name(self) -> &'static str {
        match self {
            Self::Kyc => "prove_kyc",
            Self::Location => "prove_location",
            Self::AiContent => "prove_ai_content",
        }
    }
}

impl fmt::Display for ProofType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProofType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "kyc" => Ok(Self::Kyc),
            "location" => Ok(Self::Location),
            "ai_content" | "ai-content" => Ok(Self::AiContent),
            other => Err(format!("unknown proof type '{other}'")),
        }
    }
}

/// Settlement chain for a transfer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Blockchain {
    #[default]
    Eth,
    Sol,
}

impl Blockchain {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eth => "ETH",
            Self::Sol => "SOL",
        }
    }
}

impl fmt::Display for Blockchain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional inputs that shape the arguments of a proof generation request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProofParameters {
    /// Latitude in decimal degrees, used by location proofs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    /// Longitude in decimal degrees, used by location proofs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    /// Content hash, used by AI content proofs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

pub const DEFAULT_PROXIMITY_X: u64 = 5080;
pub const DEFAULT_PROXIMITY_Y: u64 = 5020;

fn default_proximity_x() -> u64 {
    DEFAULT_PROXIMITY_X
}

fn default_proximity_y() -> u64 {
    DEFAULT_PROXIMITY_Y
}

/// Capability-specific payload of a step. Exactly one adapter handles each variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepAction {
    ProofGeneration {
        proof_type: ProofType,
        #[serde(default)]
        parameters: ProofParameters,
    },
    Verification {
        proof_type: ProofType,
    },
    Transfer {
        #[serde(deserialize_with = "deserialize_amount")]
        amount: String,
        recipient: String,
        #[serde(default)]
        blockchain: Blockchain,
    },
    DeviceRegistration {
        device_id: String,
    },
    ProximityVerification {
        device_id: String,
        #[serde(default = "default_proximity_x")]
        x: u64,
        #[serde(default = "default_proximity_y")]
        y: u64,
    },
    RewardClaim {
        device_id: String,
    },
}

impl StepAction {
    pub fn kind(&self) -> StepKind {
        match self {
            Self::ProofGeneration { .. } => StepKind::ProofGeneration,
            Self::Verification { .. } => StepKind::Verification,
            Self::Transfer { .. } => StepKind::Transfer,
            Self::DeviceRegistration { .. } => StepKind::DeviceRegistration,
            Self::ProximityVerification { .. } => StepKind::ProximityVerification,
            Self::RewardClaim { .. } => StepKind::RewardClaim,
        }
    }
}

/// Payload-free discriminant of [`StepAction`], used in events and listings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    ProofGeneration,
    Verification,
    Transfer,
    DeviceRegistration,
    ProximityVerification,
    RewardClaim,
}

impl StepKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProofGeneration => "proof_generation",
            Self::Verification => "verification",
            Self::Transfer => "transfer",
            Self::DeviceRegistration => "device_registration",
            Self::ProximityVerification => "proximity_verification",
            Self::RewardClaim => "reward_claim",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A compiled plan entry. Never mutated once the workflow exists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Step {
    /// Zero-based position in the plan.
    pub index: usize,
    /// Human-readable summary shown in progress output.
    #[serde(default)]
    pub description: String,
    /// Capability and its parameters.
    #[serde(flatten)]
    pub action: StepAction,
    /// Proof type that must be verified before a transfer step may run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_proof_of_type: Option<ProofType>,
}

impl Step {
    pub fn kind(&self) -> StepKind {
        self.action.kind()
    }

    pub fn summary(&self) -> StepSummary {
        StepSummary {
            index: self.index,
            kind: self.kind(),
            description: self.description.clone(),
        }
    }
}

/// Compact step description carried in `WorkflowStarted` events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepSummary {
    pub index: usize,
    pub kind: StepKind,
    pub description: String,
}

/// Lifecycle of a workflow. Transitions only move forward.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Created,
    Running,
    Completed,
    Failed,
}

impl WorkflowStatus {
    /// Returns true when `next` is a legal successor of `self`.
    pub fn can_transition_to(self, next: WorkflowStatus) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Running) | (Self::Running, Self::Completed) | (Self::Running, Self::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-step status as surfaced to status queries and progress observers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

/// Outcome of a single step execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepResult {
    /// Whether the step's boundary call (or its placeholder) succeeded.
    pub success: bool,
    /// Failure description when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// True when the step was not executed because its gating proof was not verified.
    #[serde(default)]
    pub skipped: bool,
    /// Proof identifier produced or verified by the step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof_id: Option<String>,
    /// Payment rail transfer identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_id: Option<String>,
    /// Verification verdict for verification and proximity steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
    /// On-chain transaction hash reported by the device network.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
    /// True when the result is a deterministic placeholder produced without the boundary.
    #[serde(default)]
    pub demo_mode: bool,
    /// Raw boundary payload kept for reporting.
    #[serde(default, skip_serializing_if = "JsonValue::is_null")]
    pub output: JsonValue,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl StepResult {
    pub fn succeeded(started_at: DateTime<Utc>) -> Self {
        Self {
            success: true,
            error: None,
            skipped: false,
            proof_id: None,
            transfer_id: None,
            verified: None,
            transaction_hash: None,
            demo_mode: false,
            output: JsonValue::Null,
            started_at,
            completed_at: Utc::now(),
        }
    }

    pub fn failed(started_at: DateTime<Utc>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::succeeded(started_at)
        }
    }

    /// A gated step that never reached its boundary.
    pub fn skipped(started_at: DateTime<Utc>, reason: impl Into<String>) -> Self {
        Self {
            skipped: true,
            ..Self::failed(started_at, reason)
        }
    }

    pub fn with_proof_id(mut self, proof_id: impl Into<String>) -> Self {
        self.proof_id = Some(proof_id.into());
        self
    }

    pub fn with_transfer_id(mut self, transfer_id: impl Into<String>) -> Self {
        self.transfer_id = Some(transfer_id.into());
        self
    }

    pub fn with_verified(mut self, verified: bool) -> Self {
        self.verified = Some(verified);
        self
    }

    pub fn with_transaction_hash(mut self, transaction_hash: impl Into<String>) -> Self {
        self.transaction_hash = Some(transaction_hash.into());
        self
    }

    pub fn with_output(mut self, output: JsonValue) -> Self {
        self.output = output;
        self
    }

    pub fn in_demo_mode(mut self) -> Self {
        self.demo_mode = true;
        self
    }

    pub fn state(&self) -> StepState {
        if self.skipped {
            StepState::Skipped
        } else if self.success {
            StepState::Succeeded
        } else {
            StepState::Failed
        }
    }
}

/// Latest proof known for a proof type. Lives only as long as the engine process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProofResult {
    pub proof_type: ProofType,
    pub proof_id: String,
    pub verified: bool,
    pub timestamp: DateTime<Utc>,
}

/// Durable record of one submitted plan and its execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workflow {
    /// Opaque unique identifier.
    pub id: String,
    /// Free-form description copied from the plan.
    #[serde(default)]
    pub description: String,
    /// Ordered plan steps.
    pub steps: Vec<Step>,
    pub status: WorkflowStatus,
    /// Index of the next step to execute; equals `steps.len()` once every step ran.
    #[serde(default)]
    pub current_step_index: usize,
    /// Recorded results keyed by step index.
    #[serde(default)]
    pub results: BTreeMap<usize, StepResult>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Workflow {
    pub fn new(id: impl Into<String>, description: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            steps,
            status: WorkflowStatus::Created,
            current_step_index: 0,
            results: BTreeMap::new(),
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Per-step status derived from recorded results and the step cursor.
    pub fn step_states(&self) -> Vec<StepState> {
        self.steps
            .iter()
            .map(|step| match self.results.get(&step.index) {
                Some(result) => result.state(),
                None if self.status == WorkflowStatus::Running && step.index == self.current_step_index => StepState::Running,
                None => StepState::Pending,
            })
            .collect()
    }

    pub fn status_report(&self) -> StatusReport {
        StatusReport {
            workflow_id: self.id.clone(),
            description: self.description.clone(),
            status: self.status,
            current_step_index: self.current_step_index,
            step_states: self.step_states(),
            results: self.results.clone(),
            created_at: self.created_at,
            completed_at: self.completed_at,
        }
    }

    pub fn summary(&self) -> WorkflowSummary {
        WorkflowSummary {
            id: self.id.clone(),
            description: self.description.clone(),
            status: self.status,
            step_count: self.steps.len(),
            created_at: self.created_at,
            completed_at: self.completed_at,
        }
    }
}

/// Answer to a status query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusReport {
    pub workflow_id: String,
    pub description: String,
    pub status: WorkflowStatus,
    pub current_step_index: usize,
    pub step_states: Vec<StepState>,
    pub results: BTreeMap<usize, StepResult>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Listing entry for stored workflows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkflowSummary {
    pub id: String,
    pub description: String,
    pub status: WorkflowStatus,
    pub step_count: usize,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Accepts amounts written either as strings (`"0.1"`) or bare numbers (`5`).
fn deserialize_amount<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawAmount {
        Text(String),
        Integer(u64),
        Decimal(f64),
    }

    Ok(match RawAmount::deserialize(deserializer)? {
        RawAmount::Text(text) => text.trim().to_string(),
        RawAmount::Integer(value) => value.to_string(),
        RawAmount::Decimal(value) => value.to_string(),
    })
}
