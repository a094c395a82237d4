//! Common test helpers and utilities for party relay tests
//!
//! This crate provides:
//! - Condition-based waiting (no hardcoded sleeps)
//! - An RAII test relay
//! - A raw peer that speaks the wire protocol without a session
//! - A renderer that records what the session asked it to do

use bytes::Bytes;
use party_client::{AvatarAsset, PartyClient, Renderer};
use party_core::{codec, Envelope};
use party_router::{Router, RouterConfig};
use party_transport::{
    TransportEvent, TransportReceiver, TransportSender, WebSocketReceiver, WebSocketSender,
    WebSocketTransport, WireMessage,
};
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

/// Default test timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default condition check interval
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(10);

/// How long to listen before concluding nothing will arrive
pub const QUIET_WINDOW: Duration = Duration::from_millis(200);

// ============================================================================
// Port Allocation
// ============================================================================

/// Find an available TCP port for testing
pub async fn find_available_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

// ============================================================================
// Condition-Based Waiting
// ============================================================================

/// Wait for a condition with timeout - condition-based, not time-based
pub async fn wait_for<F, Fut>(check: F, interval: Duration, max_wait: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = Instant::now();
    while start.elapsed() < max_wait {
        if check().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}

/// Wait for an atomic counter to reach a target value
pub async fn wait_for_count(counter: &AtomicU32, target: u32, max_wait: Duration) -> bool {
    wait_for(
        || async { counter.load(Ordering::SeqCst) >= target },
        DEFAULT_CHECK_INTERVAL,
        max_wait,
    )
    .await
}

// ============================================================================
// Test Relay - RAII wrapper with proper cleanup
// ============================================================================

/// A relay on a free local port that shuts down on drop
pub struct TestRelay {
    port: u16,
    router: Arc<Router>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl TestRelay {
    /// Start a test relay with default configuration
    pub async fn start() -> Self {
        Self::start_with_config(RouterConfig {
            name: "Test Relay".to_string(),
            ..Default::default()
        })
        .await
    }

    /// Start a test relay with custom configuration
    pub async fn start_with_config(config: RouterConfig) -> Self {
        let port = find_available_port().await;
        let addr = format!("127.0.0.1:{}", port);

        let router = Arc::new(Router::new(config));
        let serving = Arc::clone(&router);
        let handle = tokio::spawn(async move {
            let _ = serving.serve_websocket(&addr).await;
        });

        // Ready once the port accepts connections
        let _ = wait_for(
            || async move {
                tokio::net::TcpStream::connect(format!("127.0.0.1:{}", port))
                    .await
                    .is_ok()
            },
            DEFAULT_CHECK_INTERVAL,
            Duration::from_secs(5),
        )
        .await;

        Self {
            port,
            router,
            handle: Some(handle),
        }
    }

    /// Get the WebSocket URL for this relay
    pub fn url(&self) -> String {
        format!("ws://127.0.0.1:{}", self.port)
    }

    /// URL a participant called `id` connects to
    pub fn url_for(&self, id: &str) -> String {
        format!("{}/?userId={}", self.url(), id)
    }

    /// Get the port number
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn participant_count(&self) -> usize {
        self.router.participant_count()
    }

    /// Wait until exactly `n` participants are registered
    pub async fn wait_for_participants(&self, n: usize, max_wait: Duration) -> bool {
        wait_for(
            || async move { self.router.participant_count() == n },
            DEFAULT_CHECK_INTERVAL,
            max_wait,
        )
        .await
    }

    /// Connect a raw peer as `id` and wait until it is registered
    pub async fn join(&self, id: &str) -> RawPeer {
        let before = self.participant_count();
        let peer = RawPeer::connect(&self.url_for(id)).await;
        assert!(
            self.wait_for_participants(before + 1, DEFAULT_TIMEOUT).await,
            "{} was never registered",
            id
        );
        peer
    }

    /// Connect a session client as `id`
    pub async fn connect_client(&self, id: &str) -> party_client::Result<PartyClient> {
        PartyClient::builder(&self.url()).user_id(id).connect().await
    }

    /// Stop the relay explicitly (also happens on drop)
    pub fn stop(&mut self) {
        self.router.stop();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for TestRelay {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Raw Peer - wire-level participant
// ============================================================================

/// A participant that sends and receives wire messages directly
pub struct RawPeer {
    sender: WebSocketSender,
    receiver: WebSocketReceiver,
}

impl RawPeer {
    /// Connect to a full URL (including any `userId` parameter)
    pub async fn connect(url: &str) -> Self {
        let (sender, receiver) = WebSocketTransport::connect_with_config(url, &Default::default())
            .await
            .unwrap_or_else(|e| panic!("failed to connect to {}: {}", url, e));
        Self { sender, receiver }
    }

    pub async fn send_text(&self, text: &str) {
        self.sender
            .send(WireMessage::Text(text.to_string()))
            .await
            .expect("send failed");
    }

    pub async fn send_envelope(&self, envelope: &Envelope) {
        let text = codec::encode_envelope(envelope).expect("encode failed");
        self.send_text(&text).await;
    }

    pub async fn send_binary(&self, data: impl Into<Bytes>) {
        self.sender
            .send(WireMessage::Binary(data.into()))
            .await
            .expect("send failed");
    }

    /// Next text or binary message. `None` on timeout or disconnect.
    pub async fn next_message(&mut self, max_wait: Duration) -> Option<WireMessage> {
        let deadline = Instant::now() + max_wait;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match timeout(remaining, self.receiver.recv()).await {
                Ok(Some(TransportEvent::Text(text))) => return Some(WireMessage::Text(text)),
                Ok(Some(TransportEvent::Binary(data))) => return Some(WireMessage::Binary(data)),
                Ok(Some(TransportEvent::Connected)) | Ok(Some(TransportEvent::Error(_))) => {}
                Ok(Some(TransportEvent::Disconnected { .. })) | Ok(None) | Err(_) => return None,
            }
        }
    }

    /// Next message, which must be a text envelope
    pub async fn recv_envelope(&mut self, max_wait: Duration) -> Option<Envelope> {
        match self.next_message(max_wait).await? {
            WireMessage::Text(text) => Some(codec::decode_envelope(&text).expect("bad envelope")),
            WireMessage::Binary(data) => panic!("expected envelope, got {} byte frame", data.len()),
        }
    }

    /// Next message, which must be text; returned unparsed
    pub async fn recv_text(&mut self, max_wait: Duration) -> Option<String> {
        match self.next_message(max_wait).await? {
            WireMessage::Text(text) => Some(text),
            WireMessage::Binary(data) => panic!("expected text, got {} byte frame", data.len()),
        }
    }

    /// Next message, which must be binary
    pub async fn recv_binary(&mut self, max_wait: Duration) -> Option<Bytes> {
        match self.next_message(max_wait).await? {
            WireMessage::Binary(data) => Some(data),
            WireMessage::Text(text) => panic!("expected binary, got text {}", text),
        }
    }

    /// True if nothing arrives within `window`
    pub async fn is_quiet(&mut self, window: Duration) -> bool {
        self.next_message(window).await.is_none()
    }

    /// Wait for the relay to close this connection; returns the close reason
    pub async fn closed(&mut self, max_wait: Duration) -> Option<Option<String>> {
        let deadline = Instant::now() + max_wait;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match timeout(remaining, self.receiver.recv()).await {
                Ok(Some(TransportEvent::Disconnected { reason })) => return Some(reason),
                Ok(None) => return Some(None),
                Ok(Some(_)) => {}
                Err(_) => return None,
            }
        }
    }

    pub async fn close(&self) {
        let _ = self.sender.close(None).await;
    }
}

// ============================================================================
// Recording Renderer
// ============================================================================

/// One call made on a [`RecordingRenderer`]
#[derive(Debug, Clone, PartialEq)]
pub enum RenderEvent {
    Spawned { id: String, asset: AvatarAsset },
    Removed { id: String },
    Motion { id: String, data: Value },
    AssetReplaced { id: String, model: Bytes },
}

/// Renderer that records every call
#[derive(Clone, Default)]
pub struct RecordingRenderer {
    events: Arc<parking_lot::Mutex<Vec<RenderEvent>>>,
    count: Arc<AtomicU32>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, event: RenderEvent) {
        self.events.lock().push(event);
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    /// All recorded calls
    pub fn events(&self) -> Vec<RenderEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }

    /// Wait for at least n calls
    pub async fn wait_for_count(&self, n: u32, max_wait: Duration) -> bool {
        wait_for_count(&self.count, n, max_wait).await
    }

    /// Avatars currently spawned and not removed
    pub fn avatars(&self) -> Vec<String> {
        let mut live: Vec<String> = Vec::new();
        for event in self.events.lock().iter() {
            match event {
                RenderEvent::Spawned { id, .. } if !live.contains(id) => live.push(id.clone()),
                RenderEvent::Removed { id } => live.retain(|l| l != id),
                _ => {}
            }
        }
        live
    }

    /// Motion samples applied to `id`
    pub fn motions_for(&self, id: &str) -> Vec<Value> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                RenderEvent::Motion { id: m, data } if m == id => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    /// Clear all recorded calls
    pub fn clear(&self) {
        self.events.lock().clear();
        self.count.store(0, Ordering::SeqCst);
    }
}

impl Renderer for RecordingRenderer {
    fn spawn_avatar(&self, id: &str, asset: AvatarAsset) {
        self.record(RenderEvent::Spawned {
            id: id.to_string(),
            asset,
        });
    }

    fn remove_avatar(&self, id: &str) {
        self.record(RenderEvent::Removed { id: id.to_string() });
    }

    fn apply_motion(&self, id: &str, data: &Value) {
        self.record(RenderEvent::Motion {
            id: id.to_string(),
            data: data.clone(),
        });
    }

    fn replace_asset(&self, id: &str, model: Bytes) {
        self.record(RenderEvent::AssetReplaced {
            id: id.to_string(),
            model,
        });
    }
}
