//! Participant records

use party_core::{codec, Envelope, ParticipantId};
use party_transport::{TransportSender, WireMessage};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Relay-assigned handle for one accepted connection
pub type ConnectionId = u64;

/// A registered, live connection
pub struct Participant {
    /// Caller-supplied id, unique among live participants
    pub id: ParticipantId,
    /// Connection this participant arrived on
    pub conn: ConnectionId,
    /// Transport sender for this connection
    sender: Arc<dyn TransportSender>,
    /// Registration time
    pub joined_at: Instant,
}

impl Participant {
    pub fn new(conn: ConnectionId, id: ParticipantId, sender: Arc<dyn TransportSender>) -> Self {
        Self {
            id,
            conn,
            sender,
            joined_at: Instant::now(),
        }
    }

    /// Queue a message for this participant without waiting.
    ///
    /// Returns `false` when the message was dropped (closed socket or full
    /// queue). Nothing is retried.
    pub fn deliver(&self, message: WireMessage) -> bool {
        if !self.sender.is_connected() {
            debug!("Skipping delivery to closed participant {}", self.id);
            return false;
        }

        match self.sender.try_send(message) {
            Ok(()) => true,
            Err(e) => {
                debug!("Dropped message for {}: {}", self.id, e);
                false
            }
        }
    }

    /// Encode and queue an envelope
    pub fn deliver_envelope(&self, envelope: &Envelope) -> bool {
        match codec::encode_envelope(envelope) {
            Ok(text) => self.deliver(WireMessage::Text(text)),
            Err(e) => {
                warn!("Failed to encode {} for {}: {}", envelope.type_name(), self.id, e);
                false
            }
        }
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.sender.is_connected()
    }
}

impl std::fmt::Debug for Participant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Participant")
            .field("id", &self.id)
            .field("conn", &self.conn)
            .field("connected", &self.is_connected())
            .finish()
    }
}
