//! Device network steps and their demo-mode placeholders.
//!
//! When the device network cannot be reached (connection failure, timeout, missing
//! endpoint or server error) and demo fallback is enabled, each step resolves to a
//! deterministic placeholder derived from the device id and marked `demo_mode`.

use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use zkflow_api::{BoundaryError, DeviceReceipt, DeviceRegistrationRequest, ProximityRequest, RewardClaimRequest};
use zkflow_types::StepResult;

use super::{StepAdapters, StepContext, bounded};
use crate::error::StepError;

pub const PROXIMITY_CENTER: (u64, u64) = (5000, 5000);
pub const PROXIMITY_RADIUS: u64 = 100;
const NO_REWARDS_TRANSACTION: &str = "no_rewards_available";

pub(super) async fn register(adapters: &StepAdapters, context: StepContext<'_>, device_id: &str) -> Result<StepResult, StepError> {
    let request = DeviceRegistrationRequest {
        device_id: device_id.to_string(),
    };
    match bounded("device registration", adapters.timeouts.device, adapters.devices.register_device(request)).await {
        Ok(receipt) => finish(context, receipt, "device registration failed"),
        Err(error) if adapters.demo_fallback && should_fall_back(&error) => {
            warn!(workflow_id = context.workflow_id, device_id, %error, "device network unavailable; using placeholder registration");
            Ok(StepResult::succeeded(context.started_at)
                .with_transaction_hash(format!("0x{}{}", device_digest(device_id), "0".repeat(48)))
                .with_output(json!({"deviceId": device_id, "registered": true}))
                .in_demo_mode())
        }
        Err(error) => Err(error),
    }
}

pub(super) async fn verify_proximity(
    adapters: &StepAdapters,
    context: StepContext<'_>,
    device_id: &str,
    x: u64,
    y: u64,
) -> Result<StepResult, StepError> {
    let request = ProximityRequest {
        device_id: device_id.to_string(),
        x,
        y,
    };
    match bounded("proximity verification", adapters.timeouts.device, adapters.devices.verify_proximity(request)).await {
        Ok(receipt) => {
            let within = receipt.within_proximity.unwrap_or(receipt.success);
            if receipt.success && !within {
                return Ok(outside_radius(context, device_id, receipt.transaction_hash, receipt.output));
            }
            finish(context, receipt, "proximity verification failed").map(|result| result.with_verified(within))
        }
        Err(error) if adapters.demo_fallback && should_fall_back(&error) => {
            warn!(workflow_id = context.workflow_id, device_id, %error, "device network unavailable; computing proximity locally");
            let within = is_within_proximity(x, y);
            let transaction_hash = format!("0x{}{}", device_digest(device_id), "1".repeat(48));
            let output = json!({"deviceId": device_id, "x": x, "y": y, "withinProximity": within});
            let result = if within {
                StepResult::succeeded(context.started_at)
                    .with_verified(true)
                    .with_transaction_hash(transaction_hash)
                    .with_output(output)
            } else {
                outside_radius(context, device_id, Some(transaction_hash), output)
            };
            Ok(result.in_demo_mode())
        }
        Err(error) => Err(error),
    }
}

pub(super) async fn claim_rewards(adapters: &StepAdapters, context: StepContext<'_>, device_id: &str) -> Result<StepResult, StepError> {
    let request = RewardClaimRequest {
        device_id: device_id.to_string(),
    };
    match bounded("reward claim", adapters.timeouts.device, adapters.devices.claim_rewards(request)).await {
        Ok(receipt) => finish(context, receipt, "reward claim failed"),
        Err(error) if adapters.demo_fallback && should_fall_back(&error) => {
            warn!(workflow_id = context.workflow_id, device_id, %error, "device network unavailable; no rewards in demo mode");
            Ok(StepResult::failed(context.started_at, "no rewards available (demo mode)")
                .with_transaction_hash(NO_REWARDS_TRANSACTION)
                .with_output(json!({"deviceId": device_id}))
                .in_demo_mode())
        }
        Err(error) => Err(error),
    }
}

fn finish(context: StepContext<'_>, receipt: DeviceReceipt, default_error: &str) -> Result<StepResult, StepError> {
    if !receipt.success {
        let message = receipt.error.unwrap_or_else(|| default_error.to_string());
        return Err(StepError::Boundary(BoundaryError::failed(message)));
    }
    info!(workflow_id = context.workflow_id, transaction_hash = ?receipt.transaction_hash, "device network call succeeded");
    let mut result = StepResult::succeeded(context.started_at).with_output(receipt.output);
    if let Some(hash) = receipt.transaction_hash {
        result = result.with_transaction_hash(hash);
    }
    Ok(result)
}

fn outside_radius(
    context: StepContext<'_>,
    device_id: &str,
    transaction_hash: Option<String>,
    output: serde_json::Value,
) -> StepResult {
    let mut result = StepResult::failed(context.started_at, format!("device {device_id} is outside the proximity radius"))
        .with_verified(false)
        .with_output(output);
    if let Some(hash) = transaction_hash {
        result = result.with_transaction_hash(hash);
    }
    result
}

/// Unreachable services, timeouts, missing endpoints and server errors trigger the placeholder.
fn should_fall_back(error: &StepError) -> bool {
    match error {
        StepError::Timeout { .. } => true,
        StepError::Boundary(BoundaryError::Rejected { status, .. }) => *status == 404 || *status >= 500,
        StepError::Boundary(boundary) => boundary.is_unreachable(),
        _ => false,
    }
}

/// First 16 hex characters of the SHA-256 of the device id.
pub fn device_digest(device_id: &str) -> String {
    let digest = hex::encode(Sha256::digest(device_id.as_bytes()));
    digest[..16].to_string()
}

/// Inclusive circle test around [`PROXIMITY_CENTER`].
pub fn is_within_proximity(x: u64, y: u64) -> bool {
    let dx = x.abs_diff(PROXIMITY_CENTER.0) as u128;
    let dy = y.abs_diff(PROXIMITY_CENTER.1) as u128;
    dx * dx + dy * dy <= (PROXIMITY_RADIUS as u128).pow(2)
}
