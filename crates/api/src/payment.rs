//! HTTP client for the payment rail.

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::boundary::{TransferReceipt, TransferRequest, TransferService};
use crate::client::ServiceClient;
use crate::BoundaryError;

#[derive(Debug, Clone)]
pub struct HttpTransferService {
    client: ServiceClient,
}

impl HttpTransferService {
    pub fn new(client: ServiceClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TransferService for HttpTransferService {
    async fn transfer(&self, request: TransferRequest) -> Result<TransferReceipt, BoundaryError> {
        let response = self
            .client
            .post_json("transfers", &request, &[("Idempotency-Key", request.idempotency_key.as_str())])
            .await?;
        parse_transfer_response(response)
    }
}

/// Accepts `{transferId}`, `{transfer_id}` or `{id}`; an explicit `success: false` is a failure.
pub fn parse_transfer_response(response: JsonValue) -> Result<TransferReceipt, BoundaryError> {
    if response.get("success").and_then(JsonValue::as_bool) == Some(false) {
        let message = response
            .get("error")
            .and_then(JsonValue::as_str)
            .unwrap_or("transfer was declined");
        return Err(BoundaryError::failed(message));
    }
    let transfer_id = ["transferId", "transfer_id", "id"]
        .iter()
        .find_map(|key| response.get(*key).and_then(JsonValue::as_str))
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| BoundaryError::malformed("transfer response lacks a transfer id"))?;
    Ok(TransferReceipt {
        transfer_id,
        output: response,
    })
}
