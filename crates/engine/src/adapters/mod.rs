//! Step adapters: one handler per step capability.
//!
//! Each handler owns exactly one boundary call, bounded by its own timeout. Handlers
//! return `Result<StepResult, StepError>` internally; [`StepAdapters::run`] folds every
//! error into a failed [`StepResult`] so nothing ever escapes to the orchestrator.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;
use zkflow_api::{BoundaryError, DeviceService, ProofService, TransferService};
use zkflow_types::{Step, StepAction, StepResult};

use crate::cache::ProofResultCache;
use crate::config::StepTimeouts;
use crate::error::StepError;
use crate::recipients::AddressBook;

mod device;
mod proof;
mod transfer;
mod verification;

pub use device::{PROXIMITY_CENTER, PROXIMITY_RADIUS, device_digest, is_within_proximity};
pub use proof::{DEFAULT_LOCATION_ARGUMENT, mint_proof_id, proof_arguments};
pub use transfer::check_gate;

/// What an adapter knows about the step it runs.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    pub workflow_id: &'a str,
    pub started_at: DateTime<Utc>,
}

/// The boundary clients and policies shared by all step handlers.
#[derive(Clone)]
pub struct StepAdapters {
    proofs: Arc<dyn ProofService>,
    transfers: Arc<dyn TransferService>,
    devices: Arc<dyn DeviceService>,
    address_book: AddressBook,
    timeouts: StepTimeouts,
    step_size_hint: u32,
    demo_fallback: bool,
}

impl StepAdapters {
    pub fn new(proofs: Arc<dyn ProofService>, transfers: Arc<dyn TransferService>, devices: Arc<dyn DeviceService>) -> Self {
        Self {
            proofs,
            transfers,
            devices,
            address_book: AddressBook::default(),
            timeouts: StepTimeouts::default(),
            step_size_hint: 50,
            demo_fallback: true,
        }
    }

    pub fn with_address_book(mut self, address_book: AddressBook) -> Self {
        self.address_book = address_book;
        self
    }

    pub fn with_timeouts(mut self, timeouts: StepTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_step_size_hint(mut self, step_size_hint: u32) -> Self {
        self.step_size_hint = step_size_hint;
        self
    }

    pub fn with_demo_fallback(mut self, demo_fallback: bool) -> Self {
        self.demo_fallback = demo_fallback;
        self
    }

    /// Run one step. Always resolves to a result, whatever happens at the boundary.
    pub async fn run(&self, workflow_id: &str, step: &Step, cache: &ProofResultCache) -> StepResult {
        let context = StepContext {
            workflow_id,
            started_at: Utc::now(),
        };
        let outcome = match &step.action {
            StepAction::ProofGeneration { proof_type, parameters } => {
                proof::run(self, context, step.index, *proof_type, parameters, cache).await
            }
            StepAction::Verification { proof_type } => verification::run(self, context, *proof_type, cache).await,
            StepAction::Transfer {
                amount,
                recipient,
                blockchain,
            } => transfer::run(self, context, amount, recipient, *blockchain).await,
            StepAction::DeviceRegistration { device_id } => device::register(self, context, device_id).await,
            StepAction::ProximityVerification { device_id, x, y } => device::verify_proximity(self, context, device_id, *x, *y).await,
            StepAction::RewardClaim { device_id } => device::claim_rewards(self, context, device_id).await,
        };

        outcome.unwrap_or_else(|error| {
            debug!(workflow_id, step_index = step.index, kind = %step.kind(), %error, "step failed");
            StepResult::failed(context.started_at, error.to_string())
        })
    }
}

/// Await a boundary call for at most `limit`. Expiry drops (and so cancels) the call.
async fn bounded<T, F>(operation: &str, limit: Duration, call: F) -> Result<T, StepError>
where
    F: Future<Output = Result<T, BoundaryError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(StepError::from),
        Err(_) => Err(StepError::timeout(operation, limit)),
    }
}
