//! Client builder pattern

use bytes::Bytes;
use party_core::{ParticipantId, USER_ID_PARAM};
use party_transport::WebSocketConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

use crate::cache::{AssetCache, FsAssetCache, MemoryAssetCache};
use crate::error::{ClientError, Result};
use crate::renderer::{NullRenderer, Renderer};
use crate::session::Session;
use crate::PartyClient;

/// Builder for PartyClient
pub struct PartyClientBuilder {
    url: String,
    user_id: Option<ParticipantId>,
    id_param: String,
    cache: Option<Arc<dyn AssetCache>>,
    renderer: Option<Arc<dyn Renderer>>,
    local_asset: Option<Bytes>,
    websocket: WebSocketConfig,
    outbox_capacity: usize,
}

impl PartyClientBuilder {
    /// Create a new builder
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            user_id: None,
            id_param: USER_ID_PARAM.to_string(),
            cache: None,
            renderer: None,
            local_asset: None,
            websocket: WebSocketConfig::default(),
            outbox_capacity: 256,
        }
    }

    /// Participant id; a random UUID when unset
    pub fn user_id(mut self, id: &str) -> Self {
        self.user_id = Some(id.to_string());
        self
    }

    /// Query parameter the relay reads the id from
    pub fn id_param(mut self, param: &str) -> Self {
        self.id_param = param.to_string();
        self
    }

    pub fn cache(mut self, cache: Arc<dyn AssetCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Persist models in a directory
    pub fn cache_dir(self, dir: impl Into<PathBuf>) -> Self {
        self.cache(Arc::new(FsAssetCache::new(dir)))
    }

    pub fn renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Our own model, sent when a peer asks for it
    pub fn local_asset(mut self, model: impl Into<Bytes>) -> Self {
        self.local_asset = Some(model.into());
        self
    }

    pub fn websocket_config(mut self, config: WebSocketConfig) -> Self {
        self.websocket = config;
        self
    }

    /// Capacity of the outbound queue
    pub fn outbox_capacity(mut self, capacity: usize) -> Self {
        self.outbox_capacity = capacity;
        self
    }

    /// Relay URL with the id parameter appended
    pub fn connect_url(&self, user_id: &str) -> Result<String> {
        let mut url = Url::parse(&self.url).map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(ClientError::InvalidUrl(format!(
                    "unsupported scheme {}",
                    other
                )))
            }
        }
        url.query_pairs_mut().append_pair(&self.id_param, user_id);
        Ok(url.into())
    }

    /// Build and connect
    pub async fn connect(self) -> Result<PartyClient> {
        let user_id = self
            .user_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let url = self.connect_url(&user_id)?;

        let (outbox_tx, outbox_rx) = mpsc::channel(self.outbox_capacity.max(1));
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(MemoryAssetCache::new()));
        let renderer = self.renderer.unwrap_or_else(|| Arc::new(NullRenderer));

        let mut session = Session::new(user_id, cache, renderer, outbox_tx);
        if let Some(model) = self.local_asset {
            session = session.with_local_asset(model);
        }

        PartyClient::start(url, Arc::new(session), outbox_rx, &self.websocket).await
    }
}
