//! Server-Sent Events (SSE) listener and completion correlation.
//!
//! The proof service acknowledges requests immediately and reports completion later on an
//! event stream. A [`Correlator`] holds the pending slots for each correlation id; the
//! background listener parses frames and resolves the slots whose id matches the event payload.

use std::collections::{HashMap, VecDeque};
use std::fmt::Display;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::{Stream, StreamExt};
use serde_json::Value as JsonValue;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::BoundaryError;
use crate::client::ServiceClient;

const INITIAL_BACKOFF_MS: u64 = 500;
const MAX_BACKOFF_MS: u64 = 10_000;

/// An event delivered to a waiting caller.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionEvent {
    /// Event type from the payload's `type` field, or the frame's `event:` line.
    pub event_type: Option<String>,
    pub payload: JsonValue,
}

/// How long an event nobody waited for is kept for a late registration.
pub const DEFAULT_EARLY_RETENTION: Duration = Duration::from_secs(30);
/// Upper bound on retained unmatched events; the oldest is evicted first.
pub const DEFAULT_EARLY_CAPACITY: usize = 64;

#[derive(Debug)]
struct Waiter {
    token: u64,
    sender: oneshot::Sender<CompletionEvent>,
}

#[derive(Debug)]
struct EarlyEvent {
    id: String,
    event: CompletionEvent,
    received_at: Instant,
}

#[derive(Debug, Default)]
struct CorrelatorState {
    waiters: HashMap<String, Vec<Waiter>>,
    early: VecDeque<EarlyEvent>,
    next_token: u64,
}

impl CorrelatorState {
    /// Hand `sender` the retained event for `id` if one exists, otherwise park it.
    fn attach(&mut self, id: &str, token: u64, sender: oneshot::Sender<CompletionEvent>, retention: Duration) {
        self.early.retain(|early| early.received_at.elapsed() < retention);
        if let Some(position) = self.early.iter().position(|early| early.id == id)
            && let Some(early) = self.early.remove(position)
        {
            let _ = sender.send(early.event);
            return;
        }
        self.waiters.entry(id.to_string()).or_default().push(Waiter { token, sender });
    }

    fn detach(&mut self, id: &str, token: u64) -> Option<oneshot::Sender<CompletionEvent>> {
        let waiters = self.waiters.get_mut(id)?;
        let position = waiters.iter().position(|waiter| waiter.token == token)?;
        let waiter = waiters.swap_remove(position);
        if waiters.is_empty() {
            self.waiters.remove(id);
        }
        Some(waiter.sender)
    }
}

/// Pending completions keyed by correlation id.
///
/// Several callers may wait on the same id; each receives the event. An event that arrives
/// before anyone waits on its id is retained briefly so a later `register` or `rekey` still
/// sees it.
#[derive(Debug, Clone)]
pub struct Correlator {
    state: Arc<Mutex<CorrelatorState>>,
    early_capacity: usize,
    early_retention: Duration,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::with_retention(DEFAULT_EARLY_CAPACITY, DEFAULT_EARLY_RETENTION)
    }
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(early_capacity: usize, early_retention: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(CorrelatorState::default())),
            early_capacity,
            early_retention,
        }
    }

    /// Wait on `id`. Dropping the returned guard releases the slot, which covers callers
    /// cancelled by a timeout.
    pub fn register(&self, id: &str) -> PendingCompletion {
        let (sender, receiver) = oneshot::channel();
        let mut state = self.lock();
        let token = state.next_token;
        state.next_token += 1;
        state.attach(id, token, sender, self.early_retention);
        PendingCompletion {
            id: id.to_string(),
            token,
            receiver,
            correlator: self.clone(),
        }
    }

    /// Deliver an event to every caller waiting on `id`. Returns false when nobody waits, in
    /// which case the event is retained for a late registration.
    pub fn resolve(&self, id: &str, event: CompletionEvent) -> bool {
        let mut state = self.lock();
        if let Some(waiters) = state.waiters.remove(id) {
            for waiter in waiters {
                if waiter.sender.send(event.clone()).is_err() {
                    tracing::debug!(target: "zkflow_sse", "completion receiver for id={} was dropped", id);
                }
            }
            return true;
        }

        let retention = self.early_retention;
        state.early.retain(|early| early.received_at.elapsed() < retention);
        if self.early_capacity == 0 {
            return false;
        }
        while state.early.len() >= self.early_capacity {
            state.early.pop_front();
        }
        state.early.push_back(EarlyEvent {
            id: id.to_string(),
            event,
            received_at: Instant::now(),
        });
        false
    }

    pub fn pending_count(&self) -> usize {
        self.lock().waiters.values().map(Vec::len).sum()
    }

    /// Fail every waiter, for example when the listener shuts down.
    pub fn close_all(&self) {
        let mut state = self.lock();
        state.waiters.clear();
        state.early.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CorrelatorState> {
        // A poisoned map only means another holder panicked mid-insert; the map itself is still usable.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A reserved completion slot.
#[derive(Debug)]
pub struct PendingCompletion {
    id: String,
    token: u64,
    receiver: oneshot::Receiver<CompletionEvent>,
    correlator: Correlator,
}

impl PendingCompletion {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Move the slot to a service-assigned id, picking up an event for that id that
    /// arrived before the move.
    pub fn rekey(&mut self, new_id: &str) {
        if new_id == self.id {
            return;
        }
        let mut state = self.correlator.lock();
        if let Some(sender) = state.detach(&self.id, self.token) {
            state.attach(new_id, self.token, sender, self.correlator.early_retention);
        }
        self.id = new_id.to_string();
    }

    /// Wait for the correlated event.
    pub async fn wait(mut self) -> Result<CompletionEvent, BoundaryError> {
        let id = self.id.clone();
        (&mut self.receiver).await.map_err(|_| BoundaryError::closed(id))
    }
}

impl Drop for PendingCompletion {
    fn drop(&mut self) {
        self.correlator.lock().detach(&self.id, self.token);
    }
}

/// Spawns a background task that listens on `<base>/events` and resolves pending completions.
///
/// The task reconnects with exponential backoff (0.5s doubling to 10s) and resumes with
/// `Last-Event-ID` when the server supplied event ids. `connected` is true while a stream is open.
pub fn spawn_sse_listener(client: &ServiceClient, correlator: &Correlator, connected: watch::Sender<bool>) -> JoinHandle<()> {
    let client = client.clone();
    let correlator = correlator.clone();

    tokio::spawn(async move {
        let mut last_event_id: Option<String> = None;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            match client.endpoint("events") {
                Ok(events_url) => {
                    let mut request = client
                        .request(reqwest::Method::GET, events_url)
                        .header(reqwest::header::ACCEPT, "text/event-stream")
                        .timeout(Duration::from_secs(24 * 60 * 60));
                    if let Some(id) = &last_event_id {
                        request = request.header("Last-Event-ID", id);
                    }

                    match request.send().await {
                        Ok(response) if response.status().is_success() => {
                            backoff_ms = INITIAL_BACKOFF_MS;
                            connected.send_replace(true);
                            let mut stream = response.bytes_stream();
                            if let Err(error) = process_sse_stream(&mut stream, &correlator, &mut last_event_id).await {
                                tracing::warn!(target: "zkflow_sse", "SSE stream error: {}", error);
                            }
                            connected.send_replace(false);
                        }
                        Ok(response) => {
                            tracing::warn!(target: "zkflow_sse", "SSE request failed: {}", response.status());
                        }
                        Err(error) => {
                            tracing::warn!(target: "zkflow_sse", "SSE connect error: {}", error);
                        }
                    }
                }
                Err(error) => {
                    tracing::warn!(target: "zkflow_sse", "SSE endpoint unavailable: {}", error);
                }
            }

            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
        }
    })
}

/// Consume a byte stream of SSE frames until it ends or errors.
pub async fn process_sse_stream<S, B, E>(
    stream: &mut S,
    correlator: &Correlator,
    last_event_id: &mut Option<String>,
) -> Result<(), BoundaryError>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Display,
{
    let mut buffer = Vec::<u8>::new();
    while let Some(chunk) = stream.next().await {
        let bytes = chunk.map_err(|error| BoundaryError::unavailable(error.to_string()))?;
        buffer.extend_from_slice(bytes.as_ref());

        while let Some(end) = find_frame_end(&buffer) {
            if let Ok(text) = std::str::from_utf8(&buffer[..end])
                && let Some(frame) = parse_sse_frame(text)
            {
                if let Some(id) = &frame.id {
                    *last_event_id = Some(id.clone());
                }
                if let Some(data) = &frame.data {
                    handle_sse_data(data, frame.event.as_deref(), correlator);
                }
            }
            let separator = find_separator_len(&buffer[end..]);
            buffer.drain(..end + separator);
        }
    }
    Ok(())
}

fn handle_sse_data(data: &str, frame_event: Option<&str>, correlator: &Correlator) {
    let Ok(payload) = serde_json::from_str::<JsonValue>(data) else {
        tracing::debug!(target: "zkflow_sse", "received non-JSON SSE data: {}", data);
        return;
    };
    let Some(id) = extract_correlation_id(&payload) else {
        tracing::debug!(target: "zkflow_sse", "received uncorrelated SSE event: {}", data);
        return;
    };
    let event_type = payload
        .get("type")
        .and_then(JsonValue::as_str)
        .map(str::to_string)
        .or_else(|| frame_event.map(str::to_string));

    if !correlator.resolve(&id, CompletionEvent { event_type, payload }) {
        tracing::debug!(target: "zkflow_sse", "unmatched SSE event with id={}", id);
    }
}

/// Finds the end of the first SSE frame in the buffer.
fn find_frame_end(buffer: &[u8]) -> Option<usize> {
    (0..buffer.len()).find(|&index| buffer[index..].starts_with(b"\n\n") || buffer[index..].starts_with(b"\r\n\r\n"))
}

fn find_separator_len(slice: &[u8]) -> usize {
    if slice.starts_with(b"\n\n") {
        2
    } else if slice.starts_with(b"\r\n\r\n") {
        4
    } else {
        0
    }
}

#[derive(Debug, PartialEq)]
struct SseFrame {
    data: Option<String>,
    id: Option<String>,
    event: Option<String>,
}

fn parse_sse_frame(frame_text: &str) -> Option<SseFrame> {
    let mut data_lines = Vec::new();
    let mut id: Option<String> = None;
    let mut event: Option<String> = None;

    for line in frame_text.lines() {
        if line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        } else if let Some(rest) = line.strip_prefix("id:") {
            id = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("event:") {
            event = Some(rest.trim().to_string());
        }
    }

    if data_lines.is_empty() && id.is_none() && event.is_none() {
        return None;
    }
    Some(SseFrame {
        data: (!data_lines.is_empty()).then(|| data_lines.join("\n")),
        id,
        event,
    })
}

/// Correlation ids appear as `proofId`, `proof_id` or a plain `id`.
pub fn extract_correlation_id(payload: &JsonValue) -> Option<String> {
    ["proofId", "proof_id", "id"].iter().find_map(|key| match payload.get(*key) {
        Some(JsonValue::String(text)) if !text.is_empty() => Some(text.clone()),
        Some(JsonValue::Number(number)) => Some(number.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use serde_json::json;

    type Chunk = Result<Vec<u8>, String>;

    #[test]
    fn frames_parse_data_id_and_event() {
        let frame = parse_sse_frame(": keepalive\nevent: proof_complete\nid: 7\ndata: {\"a\":\ndata: 1}").expect("frame");
        assert_eq!(frame.event.as_deref(), Some("proof_complete"));
        assert_eq!(frame.id.as_deref(), Some("7"));
        assert_eq!(frame.data.as_deref(), Some("{\"a\":\n1}"));
        assert!(parse_sse_frame(": only a comment").is_none());
    }

    #[test]
    fn frame_boundaries_accept_both_line_endings() {
        assert_eq!(find_frame_end(b"data: x\n\nrest"), Some(7));
        assert_eq!(find_frame_end(b"data: x\r\n\r\n"), Some(7));
        assert_eq!(find_frame_end(b"data: x\n"), None);
    }

    #[test]
    fn correlation_id_prefers_proof_id_fields() {
        assert_eq!(
            extract_correlation_id(&json!({"proofId": "p1", "id": "x"})).as_deref(),
            Some("p1")
        );
        assert_eq!(extract_correlation_id(&json!({"proof_id": "p2"})).as_deref(), Some("p2"));
        assert_eq!(extract_correlation_id(&json!({"id": 3})).as_deref(), Some("3"));
        assert_eq!(extract_correlation_id(&json!({"type": "ping"})), None);
    }

    #[tokio::test]
    async fn split_chunks_resolve_the_matching_waiter() {
        let correlator = Correlator::new();
        let pending = correlator.register("proof_kyc_1");
        let other = correlator.register("proof_location_2");

        let chunks: Vec<Chunk> = vec![
            Ok(b"id: 41\nevent: proof_complete\ndata: {\"proofId\":".to_vec()),
            Ok(b"\"proof_kyc_1\",\"ok\":true}\n\n".to_vec()),
        ];
        let mut stream = stream::iter(chunks);
        let mut last_event_id = None;
        process_sse_stream(&mut stream, &correlator, &mut last_event_id)
            .await
            .expect("stream");

        let event = pending.wait().await.expect("resolved");
        assert_eq!(event.event_type.as_deref(), Some("proof_complete"));
        assert_eq!(event.payload["ok"], true);
        assert_eq!(last_event_id.as_deref(), Some("41"));
        assert_eq!(correlator.pending_count(), 1);
        drop(other);
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn payload_type_wins_over_frame_event() {
        let correlator = Correlator::new();
        let pending = correlator.register("p9");
        let chunks: Vec<Chunk> = vec![Ok(
            b"event: message\ndata: {\"type\":\"proof_error\",\"proofId\":\"p9\",\"error\":\"boom\"}\n\n".to_vec(),
        )];
        let mut last_event_id = None;
        process_sse_stream(&mut stream::iter(chunks), &correlator, &mut last_event_id)
            .await
            .expect("stream");
        let event = pending.wait().await.expect("resolved");
        assert_eq!(event.event_type.as_deref(), Some("proof_error"));
    }

    #[tokio::test]
    async fn closing_the_correlator_fails_waiters() {
        let correlator = Correlator::new();
        let pending = correlator.register("p1");
        correlator.close_all();
        assert!(matches!(pending.wait().await, Err(BoundaryError::Closed { .. })));
    }

    fn completed(id: &str) -> CompletionEvent {
        CompletionEvent {
            event_type: Some("proof_complete".to_string()),
            payload: serde_json::json!({ "proofId": id }),
        }
    }

    #[tokio::test]
    async fn every_waiter_on_an_id_receives_the_event() {
        let correlator = Correlator::new();
        let first = correlator.register("proof_kyc_1");
        let second = correlator.register("proof_kyc_1");
        assert_eq!(correlator.pending_count(), 2);

        assert!(correlator.resolve("proof_kyc_1", completed("proof_kyc_1")));
        assert_eq!(first.wait().await.expect("first"), completed("proof_kyc_1"));
        assert_eq!(second.wait().await.expect("second"), completed("proof_kyc_1"));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn dropping_one_waiter_keeps_the_others() {
        let correlator = Correlator::new();
        let kept = correlator.register("p1");
        drop(correlator.register("p1"));
        assert_eq!(correlator.pending_count(), 1);
        assert!(correlator.resolve("p1", completed("p1")));
        assert!(kept.wait().await.is_ok());
    }

    #[tokio::test]
    async fn event_before_rekey_is_delivered() {
        let correlator = Correlator::new();
        let mut pending = correlator.register("proof_kyc_1");
        assert!(!correlator.resolve("svc-9", completed("svc-9")));

        pending.rekey("svc-9");
        let event = tokio::time::timeout(Duration::from_millis(200), pending.wait())
            .await
            .expect("delivered without waiting")
            .expect("event");
        assert_eq!(event.payload["proofId"], "svc-9");
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn event_before_register_is_delivered_once() {
        let correlator = Correlator::new();
        assert!(!correlator.resolve("p7", completed("p7")));

        let early = correlator.register("p7");
        assert_eq!(correlator.pending_count(), 0);
        assert!(early.wait().await.is_ok());

        let late = correlator.register("p7");
        assert_eq!(correlator.pending_count(), 1);
        drop(late);
    }

    #[test]
    fn unmatched_events_are_bounded_and_expire() {
        let correlator = Correlator::with_retention(1, DEFAULT_EARLY_RETENTION);
        correlator.resolve("a", completed("a"));
        correlator.resolve("b", completed("b"));
        let _evicted = correlator.register("a");
        assert_eq!(correlator.pending_count(), 1);
        let _kept = correlator.register("b");
        assert_eq!(correlator.pending_count(), 1);

        let expiring = Correlator::with_retention(8, Duration::ZERO);
        expiring.resolve("c", completed("c"));
        let _expired = expiring.register("c");
        assert_eq!(expiring.pending_count(), 1);
    }

    #[test]
    fn rekey_moves_the_slot() {
        let correlator = Correlator::new();
        let mut pending = correlator.register("local");
        pending.rekey("remote");
        assert_eq!(pending.id(), "remote");
        assert!(!correlator.resolve("local", CompletionEvent { event_type: None, payload: JsonValue::Null }));
        assert!(correlator.resolve("remote", CompletionEvent { event_type: None, payload: JsonValue::Null }));
    }

    #[tokio::test]
    async fn stream_errors_surface_as_unavailable() {
        let correlator = Correlator::new();
        let chunks: Vec<Chunk> = vec![Err("reset by peer".to_string())];
        let mut last_event_id = None;
        let result = process_sse_stream(&mut stream::iter(chunks), &correlator, &mut last_event_id).await;
        assert!(matches!(result, Err(BoundaryError::Unavailable { .. })));
    }
}
