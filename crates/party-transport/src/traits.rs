//! Transport trait definitions

use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;

use crate::error::Result;

/// One message on the wire. Text carries envelopes, binary carries asset frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Text(String),
    Binary(Bytes),
}

impl WireMessage {
    pub fn len(&self) -> usize {
        match self {
            WireMessage::Text(text) => text.len(),
            WireMessage::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, WireMessage::Binary(_))
    }
}

/// Events that can occur on a transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Connection established
    Connected,
    /// Connection closed (clean or error)
    Disconnected { reason: Option<String> },
    /// Text message received
    Text(String),
    /// Binary message received
    Binary(Bytes),
    /// Error occurred
    Error(String),
}

/// Addressing metadata captured during the connection handshake
#[derive(Debug, Clone)]
pub struct Handshake {
    pub addr: SocketAddr,
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl Handshake {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            path: "/".to_string(),
            query: Vec::new(),
        }
    }

    /// First value of a query parameter
    pub fn param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Trait for sending data
#[async_trait]
pub trait TransportSender: Send + Sync {
    /// Queue a message, waiting for room in the outbound queue
    async fn send(&self, message: WireMessage) -> Result<()>;

    /// Queue a message without waiting; fails with `QueueFull` instead
    fn try_send(&self, message: WireMessage) -> Result<()>;

    /// Check if connected
    fn is_connected(&self) -> bool;

    /// Close the connection, optionally telling the peer why
    async fn close(&self, reason: Option<String>) -> Result<()>;
}

/// Trait for receiving data
#[async_trait]
pub trait TransportReceiver: Send {
    /// Receive the next event
    async fn recv(&mut self) -> Option<TransportEvent>;
}

/// Client side of a transport
#[async_trait]
pub trait Transport: Send + Sync {
    /// The sender type for this transport
    type Sender: TransportSender;
    /// The receiver type for this transport
    type Receiver: TransportReceiver;

    /// Connect to a remote endpoint
    async fn connect(addr: &str) -> Result<(Self::Sender, Self::Receiver)>
    where
        Self: Sized;
}

/// Trait for transport servers (listeners)
#[async_trait]
pub trait TransportServer: Send + Sync {
    /// The sender type for accepted connections
    type Sender: TransportSender;
    /// The receiver type for accepted connections
    type Receiver: TransportReceiver;

    /// Accept a new connection
    async fn accept(&mut self) -> Result<(Self::Sender, Self::Receiver, Handshake)>;

    /// Get the local address
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Close the server
    async fn close(&self) -> Result<()>;
}
