//! Error taxonomy for the orchestration engine.

use std::time::Duration;

use thiserror::Error;
use zkflow_api::BoundaryError;
use zkflow_types::{Blockchain, PlanError, ProofType, WorkflowStatus};

/// Errors surfaced to callers of the [`Orchestrator`](crate::Orchestrator).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("plan rejected: {0}")]
    PlanInvalid(#[from] PlanError),

    #[error("workflow not found: {id}")]
    NotFound { id: String },

    #[error("workflow {id} is already running")]
    AlreadyRunning { id: String },

    #[error("workflow {id} is {status}; only created workflows can be executed")]
    InvalidState { id: String, status: WorkflowStatus },

    #[error("workflow store error: {0}")]
    Store(StoreError),

    #[error("engine configuration error: {message}")]
    Configuration { message: String },

    #[error("infrastructure failure: {message}")]
    Infrastructure { message: String },
}

impl EngineError {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    pub fn already_running(id: impl Into<String>) -> Self {
        Self::AlreadyRunning { id: id.into() }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    pub fn infrastructure(message: impl Into<String>) -> Self {
        Self::Infrastructure { message: message.into() }
    }
}

impl From<StoreError> for EngineError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound { id } => Self::NotFound { id },
            other => Self::Store(other),
        }
    }
}

/// Errors raised by a [`WorkflowStore`](crate::WorkflowStore) backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("workflow not found: {id}")]
    NotFound { id: String },

    #[error("workflow {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: WorkflowStatus,
        to: WorkflowStatus,
    },

    #[error("result for step {index} of workflow {id} is already recorded")]
    DuplicateResult { id: String, index: usize },

    #[error("step {index} is out of range for workflow {id} with {len} steps")]
    IndexOutOfRange { id: String, index: usize, len: usize },

    #[error("store io error: {message}")]
    Io { message: String },

    #[error("store serialization error: {message}")]
    Serialization { message: String },
}

impl StoreError {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::Io { message: message.into() }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into() }
    }
}

/// Why a single step did not succeed. Never escapes an adapter; its text becomes
/// `StepResult.error`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StepError {
    #[error("{operation} timeout after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("{0}")]
    Boundary(#[from] BoundaryError),

    #[error("No proof found for {proof_type}")]
    NoProofFound { proof_type: ProofType },

    #[error("{proof_type} proof not verified")]
    GatingBlocked { proof_type: ProofType },

    #[error("unknown recipient '{name}' on {blockchain}")]
    UnknownRecipient { name: String, blockchain: Blockchain },

    #[error("proof {proof_id} failed verification")]
    ProofRejected { proof_id: String },
}

impl StepError {
    pub fn timeout(operation: impl Into<String>, limit: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms: limit.as_millis().try_into().unwrap_or(u64::MAX),
        }
    }

    pub fn unknown_recipient(name: impl Into<String>, blockchain: Blockchain) -> Self {
        Self::UnknownRecipient {
            name: name.into(),
            blockchain,
        }
    }
}
