//! # zkflow engine
//!
//! Supervised execution of compiled plans made of heterogeneous steps: zero-knowledge
//! proof generation and verification, gated value transfers, and device network calls.
//!
//! ## Architecture
//!
//! - **`orchestrator`**: the sequential state machine driving one workflow at a time per id
//! - **`adapters`**: one handler per step kind, each bounded by a timeout
//! - **`cache`**: latest proof per proof type, consulted by transfer gating
//! - **`store`**: durable workflow records (file and in-memory backends)
//! - **`broadcaster`**: best-effort progress events for subscribers and webhooks
//!
//! ## Usage
//!
//! ```no_run
//! use zkflow_engine::{EngineConfig, Orchestrator};
//!
//! # async fn run() -> Result<(), zkflow_engine::EngineError> {
//! let orchestrator = Orchestrator::from_config(&EngineConfig::load())?;
//! let workflow = orchestrator
//!     .submit_text("steps:\n  - kind: device_registration\n    device_id: DEV-1\n", None)
//!     .await?;
//! let outcome = orchestrator.execute(&workflow.id).await?;
//! println!("{} finished as {}", outcome.workflow_id, outcome.status);
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod broadcaster;
pub mod cache;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod outcome;
pub mod recipients;
pub mod store;

pub use adapters::StepAdapters;
pub use broadcaster::{HttpProgressSink, ProgressBroadcaster, ProgressSink};
pub use cache::ProofResultCache;
pub use config::{EngineConfig, StepTimeouts, TimeoutConfig};
pub use error::{EngineError, StepError, StoreError};
pub use orchestrator::Orchestrator;
pub use outcome::{ProofSummary, WorkflowOutcome};
pub use recipients::AddressBook;
pub use store::{FileWorkflowStore, MemoryWorkflowStore, WorkflowStore, new_workflow_id};
