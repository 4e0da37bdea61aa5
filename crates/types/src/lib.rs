//! Shared data model for the zkflow workflow engine.
//!
//! Plans, workflows, step results and progress events live here so the engine, the
//! boundary clients and the command line front end agree on one vocabulary.

pub mod events;
pub mod workflow;

pub use events::ProgressEvent;
pub use workflow::plan::{PlanDocument, PlanError, PlanFormat, StepDescriptor, parse_plan};
pub use workflow::validation::{validate_amount, validate_plan};
pub use workflow::{
    Blockchain, DEFAULT_PROXIMITY_X, DEFAULT_PROXIMITY_Y, ProofParameters, ProofResult, ProofType, StatusReport, Step, StepAction,
    StepKind, StepResult, StepState, StepSummary, Workflow, WorkflowStatus, WorkflowSummary,
};
