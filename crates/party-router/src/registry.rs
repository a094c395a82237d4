//! Connection registry
//!
//! Source of truth for who is connected. Both indexes live behind one lock so
//! membership, the id index and every snapshot handed out stay consistent.

use parking_lot::RwLock;
use party_core::ParticipantId;
use party_transport::TransportSender;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::RegistryError;
use crate::participant::{ConnectionId, Participant};

/// Result of a successful registration
#[derive(Debug)]
pub struct Admission {
    /// The newly registered participant
    pub participant: Arc<Participant>,
    /// Everyone else, as of the moment of insertion
    pub others: Vec<Arc<Participant>>,
}

impl Admission {
    /// Ids for the `existingUsers` roster, in join order
    pub fn existing_ids(&self) -> Vec<ParticipantId> {
        self.others.iter().map(|p| p.id.clone()).collect()
    }
}

/// Result of removing a participant
#[derive(Debug)]
pub struct Departure {
    pub participant: Arc<Participant>,
    /// Everyone still connected after the removal
    pub remaining: Vec<Arc<Participant>>,
}

#[derive(Default)]
struct Members {
    // Connection ids are assigned in accept order, so this iterates in join order
    by_conn: BTreeMap<ConnectionId, Arc<Participant>>,
    by_id: HashMap<ParticipantId, ConnectionId>,
}

/// Registry of live participants
pub struct Registry {
    members: RwLock<Members>,
    max_participants: usize,
}

impl Registry {
    pub fn new() -> Self {
        Self::with_capacity(usize::MAX)
    }

    /// Registry that refuses registrations beyond `max_participants`
    pub fn with_capacity(max_participants: usize) -> Self {
        Self {
            members: RwLock::new(Members::default()),
            max_participants,
        }
    }

    /// Register a connection under `id`.
    ///
    /// The snapshot of other participants is taken under the same write lock
    /// as the insertion, so no other register/unregister can interleave.
    pub fn register(
        &self,
        conn: ConnectionId,
        id: ParticipantId,
        sender: Arc<dyn TransportSender>,
    ) -> Result<Admission, RegistryError> {
        let mut members = self.members.write();

        if members.by_conn.contains_key(&conn) {
            return Err(RegistryError::ConnectionInUse(conn));
        }
        if members.by_id.contains_key(&id) {
            return Err(RegistryError::DuplicateId(id));
        }
        if members.by_conn.len() >= self.max_participants {
            return Err(RegistryError::Full(self.max_participants));
        }

        let others: Vec<Arc<Participant>> = members.by_conn.values().cloned().collect();
        let participant = Arc::new(Participant::new(conn, id.clone(), sender));

        members.by_id.insert(id, conn);
        members.by_conn.insert(conn, participant.clone());

        Ok(Admission {
            participant,
            others,
        })
    }

    /// Remove a connection. Returns `None` if it never registered.
    pub fn unregister(&self, conn: ConnectionId) -> Option<Departure> {
        let mut members = self.members.write();

        let participant = members.by_conn.remove(&conn)?;
        if members.by_id.get(&participant.id) == Some(&conn) {
            members.by_id.remove(&participant.id);
        }

        let remaining = members.by_conn.values().cloned().collect();
        Some(Departure {
            participant,
            remaining,
        })
    }

    /// Find the live participant registered under `id`
    pub fn resolve(&self, id: &str) -> Option<Arc<Participant>> {
        let members = self.members.read();
        let conn = members.by_id.get(id)?;
        members.by_conn.get(conn).cloned()
    }

    /// Participant registered on a connection
    pub fn get(&self, conn: ConnectionId) -> Option<Arc<Participant>> {
        self.members.read().by_conn.get(&conn).cloned()
    }

    /// Id registered on a connection
    pub fn id_of(&self, conn: ConnectionId) -> Option<ParticipantId> {
        self.get(conn).map(|p| p.id.clone())
    }

    /// Every participant except the one on `exclude`
    pub fn others(&self, exclude: ConnectionId) -> Vec<Arc<Participant>> {
        self.members
            .read()
            .by_conn
            .values()
            .filter(|p| p.conn != exclude)
            .cloned()
            .collect()
    }

    /// All live ids, in join order
    pub fn ids(&self) -> Vec<ParticipantId> {
        self.members
            .read()
            .by_conn
            .values()
            .map(|p| p.id.clone())
            .collect()
    }

    /// Number of participants
    pub fn len(&self) -> usize {
        self.members.read().by_conn.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.members.read().by_conn.is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
