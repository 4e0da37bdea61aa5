//! Engine configuration.
//!
//! Loaded from `ZKFLOW_CONFIG_PATH` (tilde expanded) or `<config_dir>/zkflow/config.json`.
//! A missing or unreadable file yields defaults. Environment variables override the file.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dirs_next::{config_dir, data_dir};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::warn;
use zkflow_util::expand_tilde;

pub const CONFIG_PATH_ENV: &str = "ZKFLOW_CONFIG_PATH";
pub const DATA_DIR_ENV: &str = "ZKFLOW_DATA_DIR";
pub const PROOF_SERVICE_URL_ENV: &str = "ZKFLOW_PROOF_SERVICE_URL";
pub const PAYMENT_SERVICE_URL_ENV: &str = "ZKFLOW_PAYMENT_SERVICE_URL";
pub const DEVICE_SERVICE_URL_ENV: &str = "ZKFLOW_DEVICE_SERVICE_URL";
pub const PROGRESS_WEBHOOK_URL_ENV: &str = "ZKFLOW_PROGRESS_WEBHOOK_URL";
pub const API_TOKEN_ENV: &str = "ZKFLOW_API_TOKEN";

/// Chain addresses configured for a named recipient.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientAddresses {
    #[serde(default, alias = "ETH", skip_serializing_if = "Option::is_none")]
    pub eth: Option<String>,
    #[serde(default, alias = "SOL", skip_serializing_if = "Option::is_none")]
    pub sol: Option<String>,
}

/// Per-boundary call limits, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub proof_generation_secs: u64,
    pub verification_secs: u64,
    pub transfer_secs: u64,
    pub device_secs: u64,
    pub progress_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            proof_generation_secs: 300,
            verification_secs: 120,
            transfer_secs: 30,
            device_secs: 15,
            progress_secs: 5,
        }
    }
}

/// Resolved step timeouts handed to the adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepTimeouts {
    pub proof_generation: Duration,
    pub verification: Duration,
    pub transfer: Duration,
    pub device: Duration,
}

impl Default for StepTimeouts {
    fn default() -> Self {
        TimeoutConfig::default().step_timeouts()
    }
}

impl TimeoutConfig {
    pub fn step_timeouts(&self) -> StepTimeouts {
        StepTimeouts {
            proof_generation: Duration::from_secs(self.proof_generation_secs),
            verification: Duration::from_secs(self.verification_secs),
            transfer: Duration::from_secs(self.transfer_secs),
            device: Duration::from_secs(self.device_secs),
        }
    }

    pub fn progress(&self) -> Duration {
        Duration::from_secs(self.progress_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding one JSON record per workflow.
    pub data_dir: PathBuf,
    pub proof_service_url: String,
    pub payment_service_url: String,
    pub device_service_url: String,
    /// Optional webhook receiving every progress event.
    pub progress_webhook_url: Option<String>,
    pub timeouts: TimeoutConfig,
    /// Forwarded to the proof service as `stepSizeHint`.
    pub step_size_hint: u32,
    /// When true, unreachable device network calls resolve to placeholder results.
    pub demo_fallback: bool,
    /// Extra or overriding address book entries keyed by recipient name.
    pub recipients: IndexMap<String, RecipientAddresses>,
    /// Bearer token for boundary calls. Only ever read from the environment.
    #[serde(skip)]
    pub api_token: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            proof_service_url: "http://localhost:8001".to_string(),
            payment_service_url: "http://localhost:8002".to_string(),
            device_service_url: "http://localhost:8001".to_string(),
            progress_webhook_url: None,
            timeouts: TimeoutConfig::default(),
            step_size_hint: 50,
            demo_fallback: true,
            recipients: IndexMap::new(),
            api_token: None,
        }
    }
}

impl EngineConfig {
    /// Load from the default location and apply environment overrides.
    pub fn load() -> Self {
        Self::load_from(&default_config_path())
    }

    pub fn load_from(path: &Path) -> Self {
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|error| {
                warn!(path = %path.display(), %error, "ignoring unparsable engine configuration");
                EngineConfig::default()
            }),
            Err(_) => EngineConfig::default(),
        };
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Some(value) = non_empty_env(DATA_DIR_ENV) {
            self.data_dir = expand_tilde(&value);
        }
        if let Some(value) = non_empty_env(PROOF_SERVICE_URL_ENV) {
            self.proof_service_url = value;
        }
        if let Some(value) = non_empty_env(PAYMENT_SERVICE_URL_ENV) {
            self.payment_service_url = value;
        }
        if let Some(value) = non_empty_env(DEVICE_SERVICE_URL_ENV) {
            self.device_service_url = value;
        }
        if let Some(value) = non_empty_env(PROGRESS_WEBHOOK_URL_ENV) {
            self.progress_webhook_url = Some(value);
        }
        if let Some(value) = non_empty_env(API_TOKEN_ENV) {
            self.api_token = Some(value);
        }
    }
}

/// Get the default path for the engine configuration file.
pub fn default_config_path() -> PathBuf {
    if let Some(path) = non_empty_env(CONFIG_PATH_ENV) {
        return expand_tilde(&path);
    }

    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("zkflow")
        .join("config.json")
}

pub fn default_data_dir() -> PathBuf {
    data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("zkflow")
        .join("workflows")
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}
