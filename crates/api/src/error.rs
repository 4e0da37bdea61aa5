//! Errors raised at the external service boundary.

use thiserror::Error;

/// Failure of a single call to the proof service, the payment rail or the device network.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BoundaryError {
    /// The service could not be reached at all.
    #[error("service unavailable: {message}")]
    Unavailable { message: String },

    /// The service answered with a non-success HTTP status.
    #[error("service rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The service accepted the request but reported a failed operation.
    #[error("{message}")]
    Failed { message: String },

    /// The response or completion event could not be interpreted.
    #[error("malformed response: {message}")]
    Malformed { message: String },

    /// The completion channel closed before a result arrived.
    #[error("completion channel closed while awaiting {correlation_id}")]
    Closed { correlation_id: String },

    /// The base URL or client configuration is unusable.
    #[error("invalid service configuration: {message}")]
    Configuration { message: String },
}

impl BoundaryError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable { message: message.into() }
    }

    pub fn rejected(status: u16, body: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            body: body.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed { message: message.into() }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed { message: message.into() }
    }

    pub fn closed(correlation_id: impl Into<String>) -> Self {
        Self::Closed {
            correlation_id: correlation_id.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// True when the service itself never produced an answer. Device adapters fall back
    /// to placeholder results only for this class of failure.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Closed { .. })
    }
}

impl From<reqwest::Error> for BoundaryError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            return Self::malformed(error.to_string());
        }
        if let Some(status) = error.status() {
            return Self::rejected(status.as_u16(), error.to_string());
        }
        Self::unavailable(error.to_string())
    }
}
