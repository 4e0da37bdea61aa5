//! Structural checks applied to plan documents before a workflow is created.
//!
//! Every rule reports a human-readable violation instead of stopping at the first
//! problem, so the caller can show the whole list at once.

use super::StepAction;
use super::plan::PlanDocument;

/// Collect every rule violation in the plan. An empty vector means the plan is valid.
pub fn validate_plan(document: &PlanDocument) -> Vec<String> {
    let mut violations = Vec::new();

    if document.steps.is_empty() {
        violations.push("plan must contain at least one step".to_string());
        return violations;
    }

    for (position, descriptor) in document.steps.iter().enumerate() {
        if let Some(declared) = descriptor.index
            && declared != position
        {
            violations.push(format!("step {position}: declared index {declared} does not match its position"));
        }

        if let Some(proof_type) = descriptor.requires_proof_of_type
            && !matches!(descriptor.action, StepAction::Transfer { .. })
        {
            violations.push(format!(
                "step {position}: requires_proof_of_type '{proof_type}' is only allowed on transfer steps"
            ));
        }

        match &descriptor.action {
            StepAction::Transfer { amount, recipient, .. } => {
                if let Err(message) = validate_amount(amount) {
                    violations.push(format!("step {position}: {message}"));
                }
                if recipient.trim().is_empty() {
                    violations.push(format!("step {position}: transfer recipient must not be empty"));
                }
            }
            StepAction::DeviceRegistration { device_id }
            | StepAction::ProximityVerification { device_id, .. }
            | StepAction::RewardClaim { device_id } => {
                if device_id.trim().is_empty() {
                    violations.push(format!("step {position}: device_id must not be empty"));
                }
            }
            StepAction::ProofGeneration { parameters, .. } => {
                if let Some(latitude) = parameters.latitude
                    && !(-90.0..=90.0).contains(&latitude)
                {
                    violations.push(format!("step {position}: latitude {latitude} is out of range"));
                }
                if let Some(longitude) = parameters.longitude
                    && !(-180.0..=180.0).contains(&longitude)
                {
                    violations.push(format!("step {position}: longitude {longitude} is out of range"));
                }
            }
            StepAction::Verification { .. } => {}
        }
    }

    violations
}

/// Transfer amounts are decimal strings that must parse to a positive, finite number.
pub fn validate_amount(amount: &str) -> Result<(), String> {
    let trimmed = amount.trim();
    if trimmed.is_empty() {
        return Err("transfer amount must not be empty".to_string());
    }
    match trimmed.parse::<f64>() {
        Ok(value) if value.is_finite() && value > 0.0 => Ok(()),
        Ok(_) => Err(format!("transfer amount '{trimmed}' must be a positive number")),
        Err(_) => Err(format!("transfer amount '{trimmed}' is not a number")),
    }
}
