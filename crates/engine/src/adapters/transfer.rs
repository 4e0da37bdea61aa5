use tracing::info;
use uuid::Uuid;
use zkflow_api::TransferRequest;
use zkflow_types::{Blockchain, Step, StepAction, StepResult};

use super::{StepAdapters, StepContext, bounded};
use crate::cache::ProofResultCache;
use crate::error::StepError;

/// Gate a transfer on its required proof. Non-transfer steps and ungated transfers always pass.
pub async fn check_gate(step: &Step, cache: &ProofResultCache) -> Result<(), StepError> {
    let StepAction::Transfer { .. } = step.action else {
        return Ok(());
    };
    match step.requires_proof_of_type {
        Some(proof_type) if !cache.is_verified(proof_type).await => Err(StepError::GatingBlocked { proof_type }),
        _ => Ok(()),
    }
}

pub(super) async fn run(
    adapters: &StepAdapters,
    context: StepContext<'_>,
    amount: &str,
    recipient: &str,
    blockchain: Blockchain,
) -> Result<StepResult, StepError> {
    let recipient_address = adapters.address_book.resolve(recipient, blockchain)?;
    let request = TransferRequest {
        amount: amount.to_string(),
        recipient_address,
        blockchain,
        idempotency_key: Uuid::new_v4().to_string(),
    };

    let receipt = bounded("transfer", adapters.timeouts.transfer, adapters.transfers.transfer(request)).await?;
    info!(
        workflow_id = context.workflow_id,
        %blockchain,
        amount,
        recipient,
        transfer_id = %receipt.transfer_id,
        "transfer submitted"
    );

    Ok(StepResult::succeeded(context.started_at)
        .with_transfer_id(receipt.transfer_id)
        .with_output(receipt.output))
}
