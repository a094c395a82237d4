//! Router error types

use party_core::ParticipantId;
use thiserror::Error;

use crate::participant::ConnectionId;

pub type Result<T> = std::result::Result<T, RouterError>;

/// Failures that stop the router from serving. Per-connection problems are
/// logged and never surface here.
#[derive(Error, Debug)]
pub enum RouterError {
    #[error("transport error: {0}")]
    Transport(#[from] party_transport::TransportError),
}

/// Reasons a connection cannot become a participant
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("participant id already connected: {0}")]
    DuplicateId(ParticipantId),

    #[error("connection {0} is already registered")]
    ConnectionInUse(ConnectionId),

    #[error("participant limit reached ({0})")]
    Full(usize),
}

impl RegistryError {
    /// Close reason sent to the rejected connection
    pub fn close_reason(&self) -> &'static str {
        match self {
            RegistryError::DuplicateId(_) => "duplicate participant id",
            RegistryError::ConnectionInUse(_) => "connection already registered",
            RegistryError::Full(_) => "relay full",
        }
    }
}
