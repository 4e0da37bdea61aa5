//! HTTP client for the proof service.
//!
//! Requests are acknowledged synchronously; completion arrives as a `proof_complete`,
//! `proof_error` or `verification_result` event on the service's SSE stream.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::boundary::{ProofReceipt, ProofRequest, ProofService, VerificationRequest, VerificationVerdict};
use crate::client::ServiceClient;
use crate::sse::{CompletionEvent, Correlator, extract_correlation_id, spawn_sse_listener};
use crate::BoundaryError;

pub const PROOF_COMPLETE: &str = "proof_complete";
pub const PROOF_ERROR: &str = "proof_error";
pub const VERIFICATION_RESULT: &str = "verification_result";

/// How long the first request waits for the event stream before dispatching anyway.
const LISTENER_READY_TIMEOUT: Duration = Duration::from_secs(5);

/// Proof service reached over HTTP with event-stream completions.
///
/// The event listener is started by the first request, so constructing the service opens
/// no connection.
#[derive(Debug)]
pub struct HttpProofService {
    client: ServiceClient,
    correlator: Correlator,
    listener: Mutex<Option<JoinHandle<()>>>,
    connected_tx: watch::Sender<bool>,
}

impl HttpProofService {
    pub fn new(client: ServiceClient) -> Self {
        let (connected_tx, _) = watch::channel(false);
        Self {
            client,
            correlator: Correlator::new(),
            listener: Mutex::new(None),
            connected_tx,
        }
    }

    pub fn is_listening(&self) -> bool {
        self.lock_listener().is_some()
    }

    /// Start the event listener if needed and give it a moment to connect, so the completion
    /// of the first request is not emitted before anyone is subscribed.
    async fn ensure_listening(&self) {
        let mut connected = self.connected_tx.subscribe();
        {
            let mut listener = self.lock_listener();
            if listener.is_none() {
                *listener = Some(spawn_sse_listener(&self.client, &self.correlator, self.connected_tx.clone()));
            }
        }
        let ready = tokio::time::timeout(LISTENER_READY_TIMEOUT, async move {
            connected.wait_for(|ready| *ready).await.is_ok()
        })
        .await;
        if !matches!(ready, Ok(true)) {
            tracing::debug!(target: "zkflow_sse", "dispatching before the event stream connected");
        }
    }

    fn lock_listener(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.listener.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for HttpProofService {
    fn drop(&mut self) {
        if let Some(listener) = self.lock_listener().take() {
            listener.abort();
        }
        self.correlator.close_all();
    }
}

#[async_trait]
impl ProofService for HttpProofService {
    async fn generate(&self, request: ProofRequest) -> Result<ProofReceipt, BoundaryError> {
        self.ensure_listening().await;
        let mut pending = self.correlator.register(&request.proof_id);
        let acknowledgement = self.client.post_json("proofs", &request, &[]).await?;
        if let Some(assigned) = extract_correlation_id(&acknowledgement) {
            pending.rekey(&assigned);
        }
        tracing::debug!(proof_id = %pending.id(), function = %request.function, "proof generation dispatched");

        let event = pending.wait().await?;
        interpret_generation(&request.proof_id, event)
    }

    async fn verify(&self, request: VerificationRequest) -> Result<VerificationVerdict, BoundaryError> {
        self.ensure_listening().await;
        let pending = self.correlator.register(&request.proof_id);
        self.client.post_json("verifications", &request, &[]).await?;
        tracing::debug!(proof_id = %request.proof_id, "proof verification dispatched");

        let event = pending.wait().await?;
        interpret_verification(&request.proof_id, event)
    }
}

/// Map a generation completion event to a receipt or an error.
pub fn interpret_generation(requested_id: &str, event: CompletionEvent) -> Result<ProofReceipt, BoundaryError> {
    match event.event_type.as_deref() {
        Some(PROOF_COMPLETE) => Ok(ProofReceipt {
            proof_id: extract_correlation_id(&event.payload).unwrap_or_else(|| requested_id.to_string()),
            output: event.payload,
        }),
        Some(PROOF_ERROR) => Err(BoundaryError::failed(error_message(&event.payload, "proof generation failed"))),
        other => Err(BoundaryError::malformed(format!(
            "unexpected event '{}' for proof {requested_id}",
            other.unwrap_or("<none>")
        ))),
    }
}

/// Map a verification completion event to a verdict.
pub fn interpret_verification(requested_id: &str, event: CompletionEvent) -> Result<VerificationVerdict, BoundaryError> {
    match event.event_type.as_deref() {
        Some(VERIFICATION_RESULT) => {
            let is_valid = event
                .payload
                .get("isValid")
                .or_else(|| event.payload.get("is_valid"))
                .and_then(JsonValue::as_bool)
                .ok_or_else(|| BoundaryError::malformed(format!("verification result for {requested_id} lacks isValid")))?;
            Ok(VerificationVerdict {
                proof_id: requested_id.to_string(),
                is_valid,
                output: event.payload,
            })
        }
        Some(PROOF_ERROR) => Err(BoundaryError::failed(error_message(&event.payload, "proof verification failed"))),
        other => Err(BoundaryError::malformed(format!(
            "unexpected event '{}' for verification of {requested_id}",
            other.unwrap_or("<none>")
        ))),
    }
}

fn error_message(payload: &JsonValue, fallback: &str) -> String {
    payload
        .get("error")
        .or_else(|| payload.get("message"))
        .and_then(JsonValue::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| fallback.to_string())
}
