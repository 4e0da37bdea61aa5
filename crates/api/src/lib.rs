//! External service boundary for the zkflow engine.
//!
//! The engine talks to three collaborators, each behind an async trait:
//!
//! - [`ProofService`]: proof generation and verification, completed asynchronously
//!   through a correlated Server-Sent Events stream
//! - [`TransferService`]: the payment rail
//! - [`DeviceService`]: device registration, proximity checks and reward claims
//!
//! The `Http*` types implement those traits over [`ServiceClient`], a thin wrapper
//! around `reqwest` with a validated base URL and optional bearer authentication.

mod boundary;
mod client;
mod device;
mod error;
mod payment;
mod proof;
pub mod sse;

pub use boundary::{
    DeviceReceipt, DeviceRegistrationRequest, DeviceService, ProofContext, ProofReceipt, ProofRequest, ProofService,
    ProximityRequest, RewardClaimRequest, TransferReceipt, TransferRequest, TransferService, VerificationRequest,
    VerificationVerdict,
};
pub use client::{ServiceClient, validate_base_url};
pub use device::{HttpDeviceService, parse_device_response};
pub use error::BoundaryError;
pub use payment::{HttpTransferService, parse_transfer_response};
pub use proof::{HttpProofService, interpret_generation, interpret_verification};
