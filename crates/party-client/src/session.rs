//! Session protocol
//!
//! Client-side state machine for one relay connection. It reacts to relay
//! envelopes and asset frames, drives a [`Renderer`], and keeps the
//! [`AssetCache`] current. It knows nothing about sockets: outbound traffic
//! goes into an outbox channel that the connection driver drains.
//!
//! ```text
//! Disconnected -> Connecting -> Joined -> Active -> Disconnected
//! ```
//!
//! `Joined` is entered when the connection opens; `Active` once the initial
//! `existingUsers` roster has been processed.

use bytes::Bytes;
use parking_lot::RwLock;
use party_core::{codec, Envelope, FrameHeader, ParticipantId};
use party_transport::WireMessage;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::cache::AssetCache;
use crate::error::{ClientError, Result};
use crate::renderer::{AvatarAsset, Renderer};

/// Connection lifecycle as seen by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Joined,
    Active,
}

impl SessionState {
    /// Whether the relay connection is open
    pub fn is_open(&self) -> bool {
        matches!(self, SessionState::Joined | SessionState::Active)
    }
}

pub struct Session {
    user_id: ParticipantId,
    state: watch::Sender<SessionState>,
    /// Known peers, in the order they became known
    peers: RwLock<Vec<ParticipantId>>,
    local_asset: RwLock<Option<Bytes>>,
    cache: Arc<dyn AssetCache>,
    renderer: Arc<dyn Renderer>,
    outbox: mpsc::Sender<WireMessage>,
}

impl Session {
    pub fn new(
        user_id: impl Into<ParticipantId>,
        cache: Arc<dyn AssetCache>,
        renderer: Arc<dyn Renderer>,
        outbox: mpsc::Sender<WireMessage>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            user_id: user_id.into(),
            state,
            peers: RwLock::new(Vec::new()),
            local_asset: RwLock::new(None),
            cache,
            renderer,
            outbox,
        }
    }

    /// Start with a local model already loaded
    pub fn with_local_asset(self, model: Bytes) -> Self {
        *self.local_asset.write() = Some(model);
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Current roster
    pub fn peers(&self) -> Vec<ParticipantId> {
        self.peers.read().clone()
    }

    pub fn is_peer(&self, id: &str) -> bool {
        self.peers.read().iter().any(|p| p == id)
    }

    fn transition(&self, next: SessionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            debug!("Session {}: {:?} -> {:?}", self.user_id, prev, next);
        }
    }

    pub fn on_connecting(&self) {
        self.transition(SessionState::Connecting);
    }

    /// Connection opened: ask every peer for its model
    pub async fn on_open(&self) -> Result<()> {
        self.transition(SessionState::Joined);
        info!("Joined relay as {}", self.user_id);
        self.send_envelope(&Envelope::RequestAllVrms).await
    }

    /// Connection gone: drop every peer
    pub fn on_close(&self, reason: Option<&str>) {
        let peers = std::mem::take(&mut *self.peers.write());
        for id in &peers {
            self.renderer.remove_avatar(id);
        }
        if self.state() != SessionState::Disconnected {
            info!("Session {} closed: {}", self.user_id, reason.unwrap_or("no reason"));
        }
        self.transition(SessionState::Disconnected);
    }

    /// Handle one text envelope from the relay
    pub async fn handle_text(&self, text: &str) -> Result<()> {
        match codec::decode_envelope(text)? {
            Envelope::ExistingUsers(roster) => {
                for id in roster.existing_user_ids {
                    self.add_peer(id).await;
                }
                self.transition(SessionState::Active);
            }
            Envelope::UserJoined(joined) => self.add_peer(joined.user_id).await,
            Envelope::UserLeft(left) => self.remove_peer(&left.user_id),
            Envelope::Motion(motion) => {
                if motion.user_id != self.user_id {
                    self.renderer.apply_motion(&motion.user_id, &motion.data);
                }
            }
            Envelope::SendVrmTo(request) => {
                if request.target_id == self.user_id {
                    debug!("Ignoring request to send our model to ourselves");
                } else {
                    self.send_asset_to(&request.target_id).await?;
                }
            }
            other => debug!("Ignoring {} envelope", other.type_name()),
        }
        Ok(())
    }

    /// Handle one binary asset frame from the relay
    pub async fn handle_binary(&self, data: Bytes) -> Result<()> {
        let (header, body): (FrameHeader, Bytes) = codec::decode_bytes(data)?;
        if !header.is_vrm_data() {
            debug!("Ignoring {} frame", header.kind);
            return Ok(());
        }

        let Some(sender) = header.sender_id else {
            debug!("Ignoring model frame without senderId");
            return Ok(());
        };
        if sender == self.user_id {
            return Ok(());
        }

        debug!("Received {} byte model from {}", body.len(), sender);
        if self.is_peer(&sender) {
            self.renderer.replace_asset(&sender, body.clone());
        }
        self.persist(&sender, body).await;
        Ok(())
    }

    /// Publish a motion sample
    pub async fn send_motion(&self, data: Value) -> Result<()> {
        self.send_envelope(&Envelope::motion(self.user_id.clone(), data))
            .await
    }

    /// Ask one peer for its model
    pub async fn request_asset(&self, peer: &str) -> Result<()> {
        self.send_envelope(&Envelope::request_vrm(self.user_id.clone(), peer))
            .await
    }

    /// Ask every peer for its model
    pub async fn request_all_assets(&self) -> Result<()> {
        self.send_envelope(&Envelope::RequestAllVrms).await
    }

    /// Replace our own model, persist it, and publish it to every peer
    pub async fn set_local_asset(&self, model: Bytes) -> Result<()> {
        *self.local_asset.write() = Some(model.clone());
        self.persist(&self.user_id, model.clone()).await;

        if !self.state().is_open() {
            return Ok(());
        }
        let frame = codec::encode(&FrameHeader::vrm_data_broadcast(self.user_id.clone()), &model)?;
        self.send(WireMessage::Binary(frame)).await
    }

    /// Our model: the one set on this session, else the cached one
    pub async fn local_asset(&self) -> Option<Bytes> {
        let loaded = self.local_asset.read().clone();
        if loaded.is_some() {
            return loaded;
        }

        match self.cache.get(&self.user_id).await {
            Ok(Some(model)) => {
                *self.local_asset.write() = Some(model.clone());
                Some(model)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to load our own model: {}", e);
                None
            }
        }
    }

    async fn send_asset_to(&self, target: &str) -> Result<()> {
        let Some(model) = self.local_asset().await else {
            debug!("No local model to send to {}", target);
            return Ok(());
        };

        let frame = codec::encode(&FrameHeader::vrm_data(self.user_id.clone(), target), &model)?;
        self.send(WireMessage::Binary(frame)).await?;
        debug!("Sent {} byte model to {}", model.len(), target);

        self.persist(&self.user_id, model).await;
        Ok(())
    }

    async fn add_peer(&self, id: ParticipantId) {
        if id == self.user_id {
            return;
        }
        {
            let mut peers = self.peers.write();
            if peers.contains(&id) {
                return;
            }
            peers.push(id.clone());
        }

        let asset = self.cached_asset(&id).await;
        self.renderer.spawn_avatar(&id, asset);
    }

    fn remove_peer(&self, id: &str) {
        let removed = {
            let mut peers = self.peers.write();
            let before = peers.len();
            peers.retain(|p| p != id);
            peers.len() != before
        };
        if removed {
            self.renderer.remove_avatar(id);
        }
    }

    async fn cached_asset(&self, id: &str) -> AvatarAsset {
        match self.cache.get(id).await {
            Ok(model) => model.into(),
            Err(e) => {
                warn!("Asset cache read for {} failed, using placeholder: {}", id, e);
                AvatarAsset::Placeholder
            }
        }
    }

    async fn persist(&self, key: &str, model: Bytes) {
        if let Err(e) = self.cache.put(key, model).await {
            warn!("Failed to cache model for {}: {}", key, e);
        }
    }

    async fn send_envelope(&self, envelope: &Envelope) -> Result<()> {
        let text = codec::encode_envelope(envelope)?;
        self.send(WireMessage::Text(text)).await
    }

    async fn send(&self, message: WireMessage) -> Result<()> {
        if self.state() == SessionState::Disconnected {
            return Err(ClientError::NotConnected);
        }
        self.outbox
            .send(message)
            .await
            .map_err(|_| ClientError::NotConnected)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("state", &self.state())
            .field("peers", &self.peers.read().len())
            .finish()
    }
}
