//! Relay connection driver

use bytes::Bytes;
use party_core::ParticipantId;
use party_transport::{
    TransportEvent, TransportReceiver, TransportSender, WebSocketConfig, WebSocketSender,
    WebSocketTransport, WireMessage,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::builder::PartyClientBuilder;
use crate::error::{ClientError, Result};
use crate::session::{Session, SessionState};

/// A connected party client
pub struct PartyClient {
    url: String,
    session: Arc<Session>,
    sender: Arc<WebSocketSender>,
}

impl PartyClient {
    /// Create a builder
    pub fn builder(url: &str) -> PartyClientBuilder {
        PartyClientBuilder::new(url)
    }

    /// Connect with a generated id and no cache or renderer
    pub async fn connect_to(url: &str) -> Result<Self> {
        PartyClientBuilder::new(url).connect().await
    }

    /// Open the connection and start the reader and writer tasks
    pub(crate) async fn start(
        url: String,
        session: Arc<Session>,
        outbox: mpsc::Receiver<WireMessage>,
        config: &WebSocketConfig,
    ) -> Result<Self> {
        info!("Connecting to {}", url);
        session.on_connecting();

        let (sender, mut receiver) = match WebSocketTransport::connect_with_config(&url, config).await
        {
            Ok(pair) => pair,
            Err(e) => {
                session.on_close(Some("connect failed"));
                return Err(ClientError::ConnectionFailed(e.to_string()));
            }
        };
        let sender = Arc::new(sender);

        // Writer: drain the session outbox into the socket
        let writer = Arc::clone(&sender);
        let mut outbox = outbox;
        tokio::spawn(async move {
            while let Some(message) = outbox.recv().await {
                if let Err(e) = writer.send(message).await {
                    error!("Send error: {}", e);
                    break;
                }
            }
        });

        // Wait for the transport to report the open
        loop {
            match receiver.recv().await {
                Some(TransportEvent::Connected) => break,
                Some(TransportEvent::Disconnected { reason }) => {
                    session.on_close(reason.as_deref());
                    return Err(ClientError::ConnectionFailed(
                        reason.unwrap_or_else(|| "disconnected".to_string()),
                    ));
                }
                Some(TransportEvent::Error(e)) => {
                    session.on_close(Some(&e));
                    return Err(ClientError::ConnectionFailed(e));
                }
                None => {
                    session.on_close(None);
                    return Err(ClientError::ConnectionFailed("connection closed".to_string()));
                }
                Some(other) => debug!("Event before open: {:?}", other),
            }
        }

        session.on_open().await?;

        let reader_session = Arc::clone(&session);
        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                let handled = match event {
                    TransportEvent::Text(text) => reader_session.handle_text(&text).await,
                    TransportEvent::Binary(data) => reader_session.handle_binary(data).await,
                    TransportEvent::Disconnected { reason } => {
                        reader_session.on_close(reason.as_deref());
                        break;
                    }
                    TransportEvent::Error(e) => {
                        warn!("Transport error: {}", e);
                        Ok(())
                    }
                    TransportEvent::Connected => Ok(()),
                };

                // Bad input from the relay is dropped; the session goes on
                if let Err(e) = handled {
                    debug!("Dropped inbound message: {}", e);
                }
            }
            reader_session.on_close(None);
        });

        Ok(Self {
            url,
            session,
            sender,
        })
    }

    /// Full connect URL, including the id parameter
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn user_id(&self) -> &str {
        self.session.user_id()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.state().is_open() && self.sender.is_connected()
    }

    /// Current roster
    pub fn peers(&self) -> Vec<ParticipantId> {
        self.session.peers()
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Publish a motion sample
    pub async fn send_motion(&self, data: Value) -> Result<()> {
        self.session.send_motion(data).await
    }

    /// Ask one peer for its model
    pub async fn request_asset(&self, peer: &str) -> Result<()> {
        self.session.request_asset(peer).await
    }

    /// Ask every peer for its model
    pub async fn request_all_assets(&self) -> Result<()> {
        self.session.request_all_assets().await
    }

    /// Replace our own model and publish it
    pub async fn set_local_asset(&self, model: impl Into<Bytes>) -> Result<()> {
        self.session.set_local_asset(model.into()).await
    }

    /// Wait until the initial roster has been processed
    pub async fn wait_until_active(&self, max_wait: Duration) -> Result<()> {
        self.wait_for_state(SessionState::Active, max_wait).await
    }

    /// Wait until the session reaches `target`
    pub async fn wait_for_state(&self, target: SessionState, max_wait: Duration) -> Result<()> {
        let mut states = self.session.subscribe();
        let reached = tokio::time::timeout(max_wait, states.wait_for(|state| *state == target))
            .await
            .map_err(|_| ClientError::Timeout)?;
        reached.map(|_| ()).map_err(|_| ClientError::NotConnected)
    }

    /// Close connection
    pub async fn close(&self) {
        let _ = self.sender.close(None).await;
        self.session.on_close(Some("closed by client"));
    }
}

impl std::fmt::Debug for PartyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartyClient")
            .field("url", &self.url)
            .field("session", &self.session)
            .finish()
    }
}
