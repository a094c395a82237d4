//! Main router implementation
//!
//! The router is transport-agnostic: it accepts connections from any
//! `TransportServer`. Each connection gets a reader task that forwards its
//! events into one channel; a single dispatcher task consumes that channel,
//! so joins, leaves and routed messages are applied in one order.
//!
//! # Example
//!
//! ```no_run
//! use party_router::{Router, RouterConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let router = Router::new(RouterConfig::default());
//!     router.serve_websocket("0.0.0.0:3000").await.unwrap();
//! }
//! ```

use bytes::Bytes;
use parking_lot::RwLock;
use party_core::{codec, Envelope, ErrorKind, Frame, FrameHeader, ParticipantId, USER_ID_PARAM};
use party_transport::{
    Handshake, TransportEvent, TransportReceiver, TransportSender, TransportServer, WireMessage,
};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

#[cfg(feature = "websocket")]
use party_transport::{WebSocketConfig, WebSocketServer};

use crate::{
    error::Result,
    participant::ConnectionId,
    registry::Registry,
};

/// Router configuration
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Server name
    pub name: String,
    /// Query parameter carrying the participant id
    pub id_param: String,
    /// Maximum live participants
    pub max_participants: usize,
    /// Capacity of the channel between connection tasks and the dispatcher
    pub event_queue: usize,
    /// Broadcast binary frames that carry no `targetId`
    pub broadcast_untargeted_frames: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            name: "Party Relay".to_string(),
            id_param: USER_ID_PARAM.to_string(),
            max_participants: 256,
            event_queue: 1024,
            broadcast_untargeted_frames: true,
        }
    }
}

/// What a connection task reports to the dispatcher
enum RouterEvent {
    Joined {
        conn: ConnectionId,
        id: ParticipantId,
        sender: Arc<dyn TransportSender>,
    },
    Text {
        conn: ConnectionId,
        text: String,
    },
    Binary {
        conn: ConnectionId,
        data: Bytes,
    },
    Left {
        conn: ConnectionId,
    },
}

/// Where an inbound message goes
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// Every participant except the one on `exclude`
    Broadcast {
        exclude: ConnectionId,
        message: WireMessage,
    },
    /// The participant registered under `target`
    Direct {
        target: ParticipantId,
        message: WireMessage,
    },
    Drop(DropReason),
}

/// Why an inbound message was not routed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// Sender never registered (or already left)
    NotRegistered,
    /// Could not be decoded
    Malformed(ErrorKind),
    /// A type only the relay sends
    RelayOnly(&'static str),
    /// A type this relay does not know
    UnknownType,
    /// Binary frame with no `targetId` while broadcast fallback is off
    Untargeted,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::NotRegistered => write!(f, "sender not registered"),
            DropReason::Malformed(kind) => write!(f, "malformed ({})", kind),
            DropReason::RelayOnly(kind) => write!(f, "{} is relay-only", kind),
            DropReason::UnknownType => write!(f, "unknown type"),
            DropReason::Untargeted => write!(f, "untargeted frame"),
        }
    }
}

/// Party relay router
pub struct Router {
    config: RouterConfig,
    registry: Arc<Registry>,
    /// Running flag
    running: Arc<RwLock<bool>>,
    shutdown: Arc<Notify>,
    next_conn: AtomicU64,
}

impl Router {
    pub fn new(config: RouterConfig) -> Self {
        let registry = Arc::new(Registry::with_capacity(config.max_participants));
        Self {
            config,
            registry,
            running: Arc::new(RwLock::new(false)),
            shutdown: Arc::new(Notify::new()),
            next_conn: AtomicU64::new(1),
        }
    }

    /// Serve using any TransportServer implementation.
    ///
    /// Returns once [`Router::stop`] is called.
    pub async fn serve_on<S>(&self, mut server: S) -> Result<()>
    where
        S: TransportServer + 'static,
        S::Sender: 'static,
        S::Receiver: 'static,
    {
        info!("{} accepting connections", self.config.name);
        *self.running.write() = true;

        let (events_tx, events_rx) = mpsc::channel(self.config.event_queue.max(1));
        tokio::spawn(dispatch(
            events_rx,
            Arc::clone(&self.registry),
            self.config.broadcast_untargeted_frames,
        ));

        while *self.running.read() {
            tokio::select! {
                _ = self.shutdown.notified() => break,
                accepted = server.accept() => match accepted {
                    Ok((sender, receiver, handshake)) => {
                        self.handle_connection(Arc::new(sender), receiver, handshake, events_tx.clone());
                    }
                    Err(e) => {
                        warn!("Accept error: {}", e);
                    }
                },
            }
        }

        // The dispatcher exits once every connection task has dropped its sender
        drop(events_tx);
        let _ = server.close().await;
        info!("{} stopped", self.config.name);
        Ok(())
    }

    /// Start the router on WebSocket
    #[cfg(feature = "websocket")]
    pub async fn serve_websocket(&self, addr: &str) -> Result<()> {
        self.serve_websocket_with_config(addr, WebSocketConfig::default())
            .await
    }

    #[cfg(feature = "websocket")]
    pub async fn serve_websocket_with_config(
        &self,
        addr: &str,
        config: WebSocketConfig,
    ) -> Result<()> {
        let server = WebSocketServer::bind(addr).await?.with_config(config);
        self.serve_on(server).await
    }

    /// Alias for `serve_websocket`.
    #[cfg(feature = "websocket")]
    pub async fn serve(&self, addr: &str) -> Result<()> {
        self.serve_websocket(addr).await
    }

    /// Handle a new connection
    fn handle_connection(
        &self,
        sender: Arc<dyn TransportSender>,
        mut receiver: impl TransportReceiver + 'static,
        handshake: Handshake,
        events: mpsc::Sender<RouterEvent>,
    ) {
        let addr = handshake.addr;
        let id = match handshake.param(&self.config.id_param) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                warn!(
                    "Connection from {} has no {} parameter, closing",
                    addr, self.config.id_param
                );
                let reason = format!("missing {} parameter", self.config.id_param);
                tokio::spawn(async move {
                    let _ = sender.close(Some(reason)).await;
                });
                return;
            }
        };

        let conn = self.next_conn.fetch_add(1, Ordering::Relaxed);
        let running = Arc::clone(&self.running);
        debug!("Connection {} from {} claims id {}", conn, addr, id);

        tokio::spawn(async move {
            if events
                .send(RouterEvent::Joined { conn, id, sender })
                .await
                .is_err()
            {
                return;
            }

            while *running.read() {
                let forwarded = match receiver.recv().await {
                    Some(TransportEvent::Text(text)) => {
                        events.send(RouterEvent::Text { conn, text }).await
                    }
                    Some(TransportEvent::Binary(data)) => {
                        events.send(RouterEvent::Binary { conn, data }).await
                    }
                    Some(TransportEvent::Disconnected { reason }) => {
                        debug!("Connection {} disconnected: {:?}", conn, reason);
                        break;
                    }
                    Some(TransportEvent::Error(e)) => {
                        warn!("Transport error on connection {}: {}", conn, e);
                        break;
                    }
                    Some(TransportEvent::Connected) => Ok(()),
                    None => break,
                };

                if forwarded.is_err() {
                    break;
                }
            }

            let _ = events.send(RouterEvent::Left { conn }).await;
        });
    }

    /// Stop accepting connections
    pub fn stop(&self) {
        *self.running.write() = false;
        self.shutdown.notify_waiters();
    }

    pub fn is_running(&self) -> bool {
        *self.running.read()
    }

    /// Get participant count
    pub fn participant_count(&self) -> usize {
        self.registry.len()
    }

    /// Live participant ids, in join order
    pub fn participant_ids(&self) -> Vec<ParticipantId> {
        self.registry.ids()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new(RouterConfig::default())
    }
}

/// Apply connection events in arrival order
async fn dispatch(
    mut events: mpsc::Receiver<RouterEvent>,
    registry: Arc<Registry>,
    broadcast_untargeted: bool,
) {
    while let Some(event) = events.recv().await {
        match event {
            RouterEvent::Joined { conn, id, sender } => handle_join(&registry, conn, id, sender),
            RouterEvent::Text { conn, text } => {
                let route = route_text(&registry, conn, text);
                deliver(&registry, route);
            }
            RouterEvent::Binary { conn, data } => {
                let route = route_binary(&registry, conn, data, broadcast_untargeted);
                deliver(&registry, route);
            }
            RouterEvent::Left { conn } => handle_leave(&registry, conn),
        }
    }
    debug!("Dispatcher stopped");
}

fn handle_join(
    registry: &Registry,
    conn: ConnectionId,
    id: ParticipantId,
    sender: Arc<dyn TransportSender>,
) {
    let admission = match registry.register(conn, id.clone(), Arc::clone(&sender)) {
        Ok(admission) => admission,
        Err(e) => {
            warn!("Rejecting connection {} ({}): {}", conn, id, e);
            let reason = e.close_reason().to_string();
            tokio::spawn(async move {
                let _ = sender.close(Some(reason)).await;
            });
            return;
        }
    };

    info!(
        "Participant joined: {} (conn {}, {} others)",
        id,
        conn,
        admission.others.len()
    );

    admission
        .participant
        .deliver_envelope(&Envelope::existing_users(admission.existing_ids()));

    let joined = Envelope::user_joined(id);
    for other in &admission.others {
        other.deliver_envelope(&joined);
    }
}

fn handle_leave(registry: &Registry, conn: ConnectionId) {
    // Rejected connections never registered, so there is nothing to announce
    let Some(departure) = registry.unregister(conn) else {
        return;
    };

    info!(
        "Participant left: {} (conn {}, connected {:?}, {} remaining)",
        departure.participant.id,
        conn,
        departure.participant.joined_at.elapsed(),
        departure.remaining.len()
    );

    let left = Envelope::user_left(departure.participant.id.clone());
    for other in &departure.remaining {
        other.deliver_envelope(&left);
    }
}

/// Decide where an inbound text envelope goes
pub fn route_text(registry: &Registry, conn: ConnectionId, text: String) -> Route {
    let Some(sender) = registry.get(conn) else {
        return Route::Drop(DropReason::NotRegistered);
    };

    let envelope = match codec::decode_envelope(&text) {
        Ok(envelope) => envelope,
        Err(e) => {
            debug!("Undecodable envelope from {}: {}", sender.id, e);
            return Route::Drop(DropReason::Malformed(e.kind()));
        }
    };

    match envelope {
        // Forwarded as received, not re-encoded
        Envelope::Motion(_) => Route::Broadcast {
            exclude: conn,
            message: WireMessage::Text(text),
        },
        Envelope::RequestVrm(request) => envelope_route(
            Envelope::send_vrm_to(request.request_from),
            |message| Route::Direct {
                target: request.request_to,
                message,
            },
        ),
        Envelope::RequestAllVrms => envelope_route(
            Envelope::send_vrm_to(sender.id.clone()),
            |message| Route::Broadcast {
                exclude: conn,
                message,
            },
        ),
        Envelope::ExistingUsers(_)
        | Envelope::UserJoined(_)
        | Envelope::UserLeft(_)
        | Envelope::SendVrmTo(_) => Route::Drop(DropReason::RelayOnly(envelope.type_name())),
        Envelope::Unknown => Route::Drop(DropReason::UnknownType),
    }
}

fn envelope_route(envelope: Envelope, route: impl FnOnce(WireMessage) -> Route) -> Route {
    match codec::encode_envelope(&envelope) {
        Ok(text) => route(WireMessage::Text(text)),
        Err(e) => Route::Drop(DropReason::Malformed(e.kind())),
    }
}

/// Decide where an inbound binary frame goes. The frame is forwarded as-is.
pub fn route_binary(
    registry: &Registry,
    conn: ConnectionId,
    data: Bytes,
    broadcast_untargeted: bool,
) -> Route {
    let Some(sender) = registry.get(conn) else {
        return Route::Drop(DropReason::NotRegistered);
    };

    let header = match Frame::parse(data.clone()).and_then(|frame| frame.header_as::<FrameHeader>())
    {
        Ok(header) => header,
        Err(e) => {
            debug!("Malformed frame from {}: {}", sender.id, e);
            return Route::Drop(DropReason::Malformed(e.kind()));
        }
    };

    let message = WireMessage::Binary(data);
    match header.target_id {
        Some(target) => Route::Direct { target, message },
        None if broadcast_untargeted => Route::Broadcast {
            exclude: conn,
            message,
        },
        None => Route::Drop(DropReason::Untargeted),
    }
}

/// Hand a routed message to its recipients. Returns how many accepted it.
pub fn deliver(registry: &Registry, route: Route) -> usize {
    match route {
        Route::Broadcast { exclude, message } => registry
            .others(exclude)
            .iter()
            .filter(|p| p.deliver(message.clone()))
            .count(),
        Route::Direct { target, message } => match registry.resolve(&target) {
            Some(participant) => usize::from(participant.deliver(message)),
            None => {
                debug!("Undeliverable: {} is not connected", target);
                0
            }
        },
        Route::Drop(reason) => {
            debug!("Dropped inbound message: {}", reason);
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::{sender, RecordingSender};
    use serde_json::json;

    fn registry_with(ids: &[&str]) -> (Registry, Vec<Arc<RecordingSender>>) {
        let registry = Registry::new();
        let mut senders = Vec::new();
        for (i, id) in ids.iter().enumerate() {
            let s = sender();
            registry
                .register(i as ConnectionId + 1, id.to_string(), s.clone())
                .unwrap();
            senders.push(s);
        }
        (registry, senders)
    }

    fn text_of(message: &WireMessage) -> serde_json::Value {
        match message {
            WireMessage::Text(text) => serde_json::from_str(text).unwrap(),
            other => panic!("expected text, got {:?}", other),
        }
    }

    #[test]
    fn test_motion_is_broadcast_verbatim() {
        let (registry, _) = registry_with(&["alice", "bob"]);
        let text = r#"{"type":"motion","userId":"alice","data":{"x":1}}"#.to_string();

        let route = route_text(&registry, 1, text.clone());
        assert_eq!(
            route,
            Route::Broadcast {
                exclude: 1,
                message: WireMessage::Text(text),
            }
        );
    }

    #[test]
    fn test_request_vrm_becomes_send_vrm_to() {
        let (registry, _) = registry_with(&["alice", "bob"]);
        let text = r#"{"type":"requestVrm","requestFrom":"alice","requestTo":"bob"}"#;

        match route_text(&registry, 1, text.to_string()) {
            Route::Direct { target, message } => {
                assert_eq!(target, "bob");
                assert_eq!(text_of(&message), json!({"type": "sendVrmTo", "targetId": "alice"}));
            }
            other => panic!("unexpected route {:?}", other),
        }
    }

    #[test]
    fn test_request_all_uses_registered_id() {
        let (registry, _) = registry_with(&["alice", "bob", "carol"]);

        match route_text(&registry, 2, r#"{"type":"requestAllVrms"}"#.to_string()) {
            Route::Broadcast { exclude, message } => {
                assert_eq!(exclude, 2);
                assert_eq!(text_of(&message), json!({"type": "sendVrmTo", "targetId": "bob"}));
            }
            other => panic!("unexpected route {:?}", other),
        }
    }

    #[test]
    fn test_text_drops() {
        let (registry, _) = registry_with(&["alice"]);

        assert_eq!(
            route_text(&registry, 1, "{not json".to_string()),
            Route::Drop(DropReason::Malformed(ErrorKind::Protocol))
        );
        assert_eq!(
            route_text(&registry, 1, r#"{"type":"emote"}"#.to_string()),
            Route::Drop(DropReason::UnknownType)
        );
        assert_eq!(
            route_text(&registry, 1, r#"{"type":"userLeft","userId":"bob"}"#.to_string()),
            Route::Drop(DropReason::RelayOnly("userLeft"))
        );
        assert_eq!(
            route_text(&registry, 9, r#"{"type":"requestAllVrms"}"#.to_string()),
            Route::Drop(DropReason::NotRegistered)
        );
    }

    #[test]
    fn test_binary_routes() {
        let (registry, _) = registry_with(&["alice", "bob"]);

        let targeted = codec::encode(&FrameHeader::vrm_data("alice", "bob"), b"model").unwrap();
        assert_eq!(
            route_binary(&registry, 1, targeted.clone(), true),
            Route::Direct {
                target: "bob".to_string(),
                message: WireMessage::Binary(targeted),
            }
        );

        let untargeted = codec::encode(&FrameHeader::vrm_data_broadcast("alice"), b"model").unwrap();
        assert!(matches!(
            route_binary(&registry, 1, untargeted.clone(), true),
            Route::Broadcast { exclude: 1, .. }
        ));
        assert_eq!(
            route_binary(&registry, 1, untargeted, false),
            Route::Drop(DropReason::Untargeted)
        );
    }

    #[test]
    fn test_malformed_frames_dropped() {
        let (registry, _) = registry_with(&["alice"]);

        let short = Bytes::from_static(&[1, 0]);
        assert_eq!(
            route_binary(&registry, 1, short, true),
            Route::Drop(DropReason::Malformed(ErrorKind::FrameMalformed))
        );

        let mut overrun = 100u32.to_le_bytes().to_vec();
        overrun.extend_from_slice(b"{}");
        assert_eq!(
            route_binary(&registry, 1, Bytes::from(overrun), true),
            Route::Drop(DropReason::Malformed(ErrorKind::FrameMalformed))
        );
    }

    #[test]
    fn test_deliver_excludes_sender_and_skips_missing() {
        let (registry, senders) = registry_with(&["alice", "bob", "carol"]);

        let count = deliver(
            &registry,
            Route::Broadcast {
                exclude: 1,
                message: WireMessage::Text("hi".into()),
            },
        );
        assert_eq!(count, 2);
        assert!(senders[0].sent.lock().is_empty());
        assert_eq!(senders[1].sent.lock().len(), 1);
        assert_eq!(senders[2].sent.lock().len(), 1);

        let count = deliver(
            &registry,
            Route::Direct {
                target: "dave".into(),
                message: WireMessage::Text("hi".into()),
            },
        );
        assert_eq!(count, 0);
    }

    #[test]
    fn test_join_and_leave_announcements() {
        let (registry, senders) = registry_with(&["alice"]);

        let bob = sender();
        handle_join(&registry, 2, "bob".into(), bob.clone());

        assert_eq!(
            text_of(&bob.sent.lock()[0]),
            json!({"type": "existingUsers", "existingUserIds": ["alice"]})
        );
        assert_eq!(
            text_of(&senders[0].sent.lock()[0]),
            json!({"type": "userJoined", "userId": "bob"})
        );

        handle_leave(&registry, 2);
        assert_eq!(
            text_of(&senders[0].sent.lock()[1]),
            json!({"type": "userLeft", "userId": "bob"})
        );
        assert_eq!(bob.sent.lock().len(), 1);

        // Unknown connections leave silently
        handle_leave(&registry, 42);
        assert_eq!(senders[0].sent.lock().len(), 2);
    }
}
