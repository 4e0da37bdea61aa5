use chrono::Utc;
use tracing::info;
use uuid::Uuid;
use zkflow_api::{ProofContext, ProofRequest};
use zkflow_types::{ProofParameters, ProofType, StepResult};

use super::{StepAdapters, StepContext, bounded};
use crate::cache::ProofResultCache;
use crate::error::StepError;

/// Packed coordinates used when a location proof carries no latitude/longitude.
pub const DEFAULT_LOCATION_ARGUMENT: &str = "40712800000074006000";
const DEFAULT_CONTENT_HASH: &str = "default_hash";
const DEFAULT_CONTENT_THRESHOLD: &str = "1000";

pub(super) async fn run(
    adapters: &StepAdapters,
    context: StepContext<'_>,
    step_index: usize,
    proof_type: ProofType,
    parameters: &ProofParameters,
    cache: &ProofResultCache,
) -> Result<StepResult, StepError> {
    let request = ProofRequest {
        proof_id: mint_proof_id(proof_type),
        function: proof_type.function_name().to_string(),
        arguments: proof_arguments(proof_type, parameters),
        step_size_hint: adapters.step_size_hint,
        context: ProofContext {
            workflow_id: context.workflow_id.to_string(),
            step_index,
        },
    };

    let receipt = bounded(
        "proof generation",
        adapters.timeouts.proof_generation,
        adapters.proofs.generate(request),
    )
    .await?;

    cache.record_generated(proof_type, receipt.proof_id.clone()).await;
    info!(workflow_id = context.workflow_id, %proof_type, proof_id = %receipt.proof_id, "proof generated");

    Ok(StepResult::succeeded(context.started_at)
        .with_proof_id(receipt.proof_id)
        .with_output(receipt.output))
}

/// Correlation id for a new proof: `proof_<type>_<millis>_<uuid8>`. The random suffix keeps
/// same-type generations started within one millisecond apart.
pub fn mint_proof_id(proof_type: ProofType) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("proof_{}_{}_{}", proof_type, Utc::now().timestamp_millis(), &suffix[..8])
}

/// Arguments passed to the proving function for each proof type.
///
/// Location proofs pack both coordinates into one integer:
/// `round(lat * 1e6) * 1e6 + round(|lon| * 1e6)`.
pub fn proof_arguments(proof_type: ProofType, parameters: &ProofParameters) -> Vec<String> {
    match proof_type {
        ProofType::Kyc => vec!["1".to_string()],
        ProofType::Location => match (parameters.latitude, parameters.longitude) {
            (Some(latitude), Some(longitude)) => {
                let packed = (latitude * 1e6).round() as i128 * 1_000_000 + (longitude.abs() * 1e6).round() as i128;
                vec![packed.to_string()]
            }
            _ => vec![DEFAULT_LOCATION_ARGUMENT.to_string()],
        },
        ProofType::AiContent => vec![
            parameters
                .hash
                .as_deref()
                .filter(|hash| !hash.trim().is_empty())
                .unwrap_or(DEFAULT_CONTENT_HASH)
                .to_string(),
            DEFAULT_CONTENT_THRESHOLD.to_string(),
        ],
    }
}
