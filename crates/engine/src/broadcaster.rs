//! Best-effort progress delivery.
//!
//! [`ProgressBroadcaster::emit`] never awaits. Events go to in-process subscribers over a
//! broadcast channel and, when sinks are registered, onto a bounded queue drained by a
//! background task. A full queue drops the event; a failed delivery is logged and forgotten.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};
use zkflow_api::{BoundaryError, validate_base_url};
use zkflow_types::ProgressEvent;
use zkflow_util::redact_sensitive;

const SUBSCRIBER_CAPACITY: usize = 256;
pub const DEFAULT_SINK_QUEUE_CAPACITY: usize = 256;

/// A push-only destination for progress events.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, event: &ProgressEvent) -> Result<(), BoundaryError>;
}

pub struct ProgressBroadcaster {
    subscribers: broadcast::Sender<ProgressEvent>,
    queue: Option<mpsc::Sender<ProgressEvent>>,
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressBroadcaster {
    /// Broadcaster with in-process subscribers only.
    pub fn new() -> Self {
        let (subscribers, _receiver) = broadcast::channel(SUBSCRIBER_CAPACITY);
        Self { subscribers, queue: None }
    }

    /// Broadcaster that also forwards to `sinks`. Spawns the delivery task, so it must be
    /// called inside a Tokio runtime. Each delivery is bounded by `delivery_timeout`.
    pub fn with_sinks(sinks: Vec<Arc<dyn ProgressSink>>, queue_capacity: usize, delivery_timeout: Duration) -> Self {
        let mut broadcaster = Self::new();
        if sinks.is_empty() {
            return broadcaster;
        }
        let (queue, receiver) = mpsc::channel(queue_capacity.max(1));
        broadcaster.queue = Some(queue);
        // The worker exits once the broadcaster, and with it the queue sender, is dropped.
        tokio::spawn(drain_queue(receiver, sinks, delivery_timeout));
        broadcaster
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.subscribers.subscribe()
    }

    /// Hand an event to every observer without waiting on any of them.
    pub fn emit(&self, event: ProgressEvent) {
        debug!(event = event.name(), workflow_id = event.workflow_id(), "progress event");
        // No subscribers is the normal case for unattended runs.
        let _ = self.subscribers.send(event.clone());

        if let Some(queue) = &self.queue {
            match queue.try_send(event) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(event)) => {
                    warn!(event = event.name(), workflow_id = event.workflow_id(), "progress queue full; dropping event");
                }
                Err(mpsc::error::TrySendError::Closed(event)) => {
                    warn!(event = event.name(), workflow_id = event.workflow_id(), "progress delivery stopped; dropping event");
                }
            }
        }
    }
}

async fn drain_queue(mut receiver: mpsc::Receiver<ProgressEvent>, sinks: Vec<Arc<dyn ProgressSink>>, delivery_timeout: Duration) {
    while let Some(event) = receiver.recv().await {
        for sink in &sinks {
            match tokio::time::timeout(delivery_timeout, sink.deliver(&event)).await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    warn!(sink = sink.name(), event = event.name(), workflow_id = event.workflow_id(), %error, "progress delivery failed");
                }
                Err(_) => {
                    warn!(
                        sink = sink.name(),
                        event = event.name(),
                        timeout_ms = delivery_timeout.as_millis() as u64,
                        "progress delivery timeout"
                    );
                }
            }
        }
    }
}

/// POSTs each event as JSON to a webhook.
#[derive(Debug, Clone)]
pub struct HttpProgressSink {
    url: reqwest::Url,
    http: reqwest::Client,
    label: String,
}

impl HttpProgressSink {
    pub fn new(webhook_url: &str, timeout: Duration, api_token: Option<&str>) -> Result<Self, BoundaryError> {
        validate_base_url(webhook_url)?;
        let url = reqwest::Url::parse(webhook_url.trim())
            .map_err(|error| BoundaryError::configuration(format!("invalid webhook URL: {error}")))?;
        let mut builder = reqwest::Client::builder().timeout(timeout);
        if let Some(token) = api_token.filter(|token| !token.trim().is_empty()) {
            let mut headers = reqwest::header::HeaderMap::new();
            let value = reqwest::header::HeaderValue::from_str(&format!("Bearer {}", token.trim()))
                .map_err(|_| BoundaryError::configuration("api token contains characters not allowed in a header"))?;
            headers.insert(reqwest::header::AUTHORIZATION, value);
            builder = builder.default_headers(headers);
        }
        let http = builder
            .build()
            .map_err(|error| BoundaryError::configuration(format!("build webhook client: {error}")))?;
        let label = redact_sensitive(url.as_str());
        Ok(Self { url, http, label })
    }
}

#[async_trait]
impl ProgressSink for HttpProgressSink {
    fn name(&self) -> &str {
        &self.label
    }

    async fn deliver(&self, event: &ProgressEvent) -> Result<(), BoundaryError> {
        let response = self.http.post(self.url.clone()).json(event).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(BoundaryError::rejected(status.as_u16(), body))
    }
}
