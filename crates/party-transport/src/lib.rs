//! Party Transport Layer
//!
//! This crate provides the transport seam for the party relay:
//! - Transport traits shared by relay and client
//! - WebSocket (text frames for envelopes, binary frames for assets)

pub mod error;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use error::{Result, TransportError};
pub use traits::{
    Handshake, Transport, TransportEvent, TransportReceiver, TransportSender, TransportServer,
    WireMessage,
};

#[cfg(feature = "websocket")]
pub use websocket::{
    WebSocketConfig, WebSocketReceiver, WebSocketSender, WebSocketServer, WebSocketTransport,
};
