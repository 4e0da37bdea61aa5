use tracing::{info, warn};
use zkflow_api::VerificationRequest;
use zkflow_types::{ProofType, StepResult};

use super::{StepAdapters, StepContext, bounded};
use crate::cache::ProofResultCache;
use crate::error::StepError;

/// Verify the latest cached proof of `proof_type`.
pub(super) async fn run(
    adapters: &StepAdapters,
    context: StepContext<'_>,
    proof_type: ProofType,
    cache: &ProofResultCache,
) -> Result<StepResult, StepError> {
    let latest = cache
        .latest(proof_type)
        .await
        .ok_or(StepError::NoProofFound { proof_type })?;

    let request = VerificationRequest {
        proof_id: latest.proof_id.clone(),
        function: proof_type.function_name().to_string(),
    };
    let verdict = bounded("proof verification", adapters.timeouts.verification, adapters.proofs.verify(request)).await?;

    if !verdict.is_valid {
        return Err(StepError::ProofRejected {
            proof_id: latest.proof_id,
        });
    }

    if !cache.mark_verified(proof_type, &latest.proof_id).await {
        warn!(
            workflow_id = context.workflow_id,
            %proof_type,
            proof_id = %latest.proof_id,
            "a newer proof replaced the verified one; cache left unverified"
        );
    }
    info!(workflow_id = context.workflow_id, %proof_type, proof_id = %latest.proof_id, "proof verified");

    Ok(StepResult::succeeded(context.started_at)
        .with_proof_id(latest.proof_id)
        .with_verified(true)
        .with_output(verdict.output))
}
