use std::collections::HashMap;

use crate::{ConnectionId, StationSession};

/// Station sessions keyed by the connection they arrived on.
///
/// The transport removes the entry when the socket closes, so every key is an
/// open connection.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<ConnectionId, StationSession>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, connection_id: &ConnectionId) -> Option<&StationSession> {
        self.sessions.get(connection_id)
    }

    /// Return the session for the connection, creating an empty record if the
    /// station has not announced itself yet.
    pub fn get_or_create(&mut self, connection_id: ConnectionId) -> &mut StationSession {
        self.sessions.entry(connection_id).or_default()
    }

    /// Create or replace the session for the connection.
    pub fn register(&mut self, connection_id: ConnectionId, session: StationSession) {
        tracing::info!(
            "Registering station {} {} on connection {}",
            session.vendor,
            session.model,
            connection_id
        );
        self.sessions.insert(connection_id, session);
    }

    /// Apply a partial update. Fields the mutator does not touch keep their value.
    pub fn update<F>(&mut self, connection_id: ConnectionId, mutator: F)
    where
        F: FnOnce(&mut StationSession),
    {
        mutator(self.get_or_create(connection_id));
    }

    /// Removing an unknown connection is a no-op.
    pub fn remove(&mut self, connection_id: &ConnectionId) -> Option<StationSession> {
        let removed = self.sessions.remove(connection_id);
        if removed.is_some() {
            tracing::info!("Removed station session for connection {}", connection_id);
        }
        removed
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ConnectionId, &StationSession)> {
        self.sessions.iter()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
