//! HTTP client for the device network (registration, proximity, rewards).

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::boundary::{DeviceReceipt, DeviceRegistrationRequest, DeviceService, ProximityRequest, RewardClaimRequest};
use crate::client::ServiceClient;
use crate::BoundaryError;

#[derive(Debug, Clone)]
pub struct HttpDeviceService {
    client: ServiceClient,
}

impl HttpDeviceService {
    pub fn new(client: ServiceClient) -> Self {
        Self { client }
    }

    async fn call<T: Serialize + Sync>(&self, path: &str, body: &T) -> Result<DeviceReceipt, BoundaryError> {
        let response = self.client.post_json(path, body, &[]).await?;
        Ok(parse_device_response(response))
    }
}

#[async_trait]
impl DeviceService for HttpDeviceService {
    async fn register_device(&self, request: DeviceRegistrationRequest) -> Result<DeviceReceipt, BoundaryError> {
        self.call("device_registration", &request).await
    }

    async fn verify_proximity(&self, request: ProximityRequest) -> Result<DeviceReceipt, BoundaryError> {
        self.call("proximity_verification", &request).await
    }

    async fn claim_rewards(&self, request: RewardClaimRequest) -> Result<DeviceReceipt, BoundaryError> {
        self.call("claim_rewards", &request).await
    }
}

/// Normalise the device network's camelCase answers. Missing `success` counts as success.
pub fn parse_device_response(response: JsonValue) -> DeviceReceipt {
    let text = |keys: &[&str]| {
        keys.iter()
            .find_map(|key| response.get(*key).and_then(JsonValue::as_str))
            .map(str::to_string)
    };
    let flag = |keys: &[&str]| keys.iter().find_map(|key| response.get(*key).and_then(JsonValue::as_bool));

    DeviceReceipt {
        success: flag(&["success"]).unwrap_or(true),
        transaction_hash: text(&["transactionHash", "transaction_hash", "txHash"]),
        within_proximity: flag(&["withinProximity", "within_proximity"]),
        error: text(&["error"]),
        output: response.clone(),
    }
}
