//! Contracts for the three external collaborators the engine talks to.
//!
//! The engine depends only on these traits. The HTTP implementations in this crate are
//! one choice of transport; tests substitute in-process fakes that count calls.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use zkflow_types::Blockchain;

use crate::BoundaryError;

/// Caller context forwarded with a proof request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProofContext {
    pub workflow_id: String,
    pub step_index: usize,
}

/// Request to run a proving function.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProofRequest {
    /// Correlation id minted by the caller; completion events are matched against it.
    pub proof_id: String,
    pub function: String,
    pub arguments: Vec<String>,
    pub step_size_hint: u32,
    pub context: ProofContext,
}

/// Successful proof generation.
#[derive(Debug, Clone, PartialEq)]
pub struct ProofReceipt {
    /// Identifier reported by the service, or the caller's correlation id when absent.
    pub proof_id: String,
    pub output: JsonValue,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRequest {
    pub proof_id: String,
    pub function: String,
}

/// Verdict for a previously generated proof.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationVerdict {
    pub proof_id: String,
    pub is_valid: bool,
    pub output: JsonValue,
}

/// Value transfer on the payment rail. `recipient_address` is already resolved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub amount: String,
    pub recipient_address: String,
    pub blockchain: Blockchain,
    /// Sent as the `Idempotency-Key` header so a retried request cannot pay twice.
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferReceipt {
    pub transfer_id: String,
    pub output: JsonValue,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRegistrationRequest {
    pub device_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProximityRequest {
    pub device_id: String,
    pub x: u64,
    pub y: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RewardClaimRequest {
    pub device_id: String,
}

/// Normalised answer from any device network call.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceReceipt {
    pub success: bool,
    pub transaction_hash: Option<String>,
    /// Only meaningful for proximity checks.
    pub within_proximity: Option<bool>,
    pub error: Option<String>,
    pub output: JsonValue,
}

/// Zero-knowledge proof generation and verification.
#[async_trait]
pub trait ProofService: Send + Sync {
    /// Dispatch a proving function and wait for its correlated completion.
    async fn generate(&self, request: ProofRequest) -> Result<ProofReceipt, BoundaryError>;

    /// Verify a proof and wait for its correlated verdict.
    async fn verify(&self, request: VerificationRequest) -> Result<VerificationVerdict, BoundaryError>;
}

/// Payment rail used by transfer steps.
#[async_trait]
pub trait TransferService: Send + Sync {
    async fn transfer(&self, request: TransferRequest) -> Result<TransferReceipt, BoundaryError>;
}

/// Device network used by registration, proximity and reward steps.
#[async_trait]
pub trait DeviceService: Send + Sync {
    async fn register_device(&self, request: DeviceRegistrationRequest) -> Result<DeviceReceipt, BoundaryError>;

    async fn verify_proximity(&self, request: ProximityRequest) -> Result<DeviceReceipt, BoundaryError>;

    async fn claim_rewards(&self, request: RewardClaimRequest) -> Result<DeviceReceipt, BoundaryError>;
}
