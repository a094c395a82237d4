//! Client error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("not connected")]
    NotConnected,

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("timeout")]
    Timeout,

    #[error("protocol error: {0}")]
    Protocol(#[from] party_core::Error),

    #[error("transport error: {0}")]
    Transport(#[from] party_transport::TransportError),

    #[error("store error: {0}")]
    Cache(#[from] CacheError),
}

/// Asset cache failures. Never fatal to a session.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("failed to open asset store at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("asset store I/O error: {0}")]
    Io(#[from] std::io::Error),
}
