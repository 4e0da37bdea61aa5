//! Caller-facing summary of one execution.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use zkflow_types::{ProofType, Step, StepAction, StepResult, WorkflowStatus};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProofSummary {
    pub proof_id: String,
    pub verified: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowOutcome {
    pub workflow_id: String,
    pub status: WorkflowStatus,
    pub results: BTreeMap<usize, StepResult>,
    /// Number of steps whose result is a success.
    pub steps_completed: usize,
    /// Transfer ids in plan order.
    pub transfer_ids: Vec<String>,
    /// Latest proof per type produced by this workflow.
    pub proof_summary: BTreeMap<ProofType, ProofSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkflowOutcome {
    pub fn from_results(
        workflow_id: &str,
        steps: &[Step],
        results: BTreeMap<usize, StepResult>,
        status: WorkflowStatus,
        error: Option<String>,
    ) -> Self {
        let steps_completed = results.values().filter(|result| result.success).count();
        let transfer_ids = results.values().filter_map(|result| result.transfer_id.clone()).collect();

        let mut proof_summary = BTreeMap::new();
        for step in steps {
            let Some(result) = results.get(&step.index) else {
                continue;
            };
            let Some(proof_id) = result.proof_id.as_ref().filter(|_| result.success) else {
                continue;
            };
            match &step.action {
                StepAction::ProofGeneration { proof_type, .. } => {
                    proof_summary.insert(
                        *proof_type,
                        ProofSummary {
                            proof_id: proof_id.clone(),
                            verified: false,
                        },
                    );
                }
                StepAction::Verification { proof_type } => {
                    if let Some(summary) = proof_summary.get_mut(proof_type)
                        && summary.proof_id == *proof_id
                    {
                        summary.verified = result.verified == Some(true);
                    }
                }
                _ => {}
            }
        }

        Self {
            workflow_id: workflow_id.to_string(),
            status,
            results,
            steps_completed,
            transfer_ids,
            proof_summary,
            error,
        }
    }
}
