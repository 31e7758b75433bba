use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use csms_core::ConnectionId;
use csms_engine::{CentralSystem, EngineConfig, IssuedCall};
use tokio::sync::mpsc;

use crate::ApiError;

/// Write side of one open station socket.
#[derive(Debug, Clone)]
pub struct StationConnection {
    pub charge_point_id: String,
    pub connected_at: DateTime<Utc>,
    sender: mpsc::UnboundedSender<String>,
}

/// Open sockets, by connection and by the charge point identity in the URL.
#[derive(Debug, Default)]
pub struct ConnectionTable {
    connections: HashMap<ConnectionId, StationConnection>,
    by_charge_point: HashMap<String, ConnectionId>,
}

impl ConnectionTable {
    pub fn attach(
        &mut self,
        charge_point_id: &str,
        sender: mpsc::UnboundedSender<String>,
    ) -> ConnectionId {
        let connection_id = ConnectionId::new();
        // A reconnecting station takes over its identity.
        self.by_charge_point
            .insert(charge_point_id.to_string(), connection_id);
        self.connections.insert(
            connection_id,
            StationConnection {
                charge_point_id: charge_point_id.to_string(),
                connected_at: Utc::now(),
                sender,
            },
        );
        connection_id
    }

    pub fn detach(&mut self, connection_id: &ConnectionId) {
        if let Some(connection) = self.connections.remove(connection_id) {
            if self.by_charge_point.get(&connection.charge_point_id) == Some(connection_id) {
                self.by_charge_point.remove(&connection.charge_point_id);
            }
        }
    }

    pub fn lookup(&self, charge_point_id: &str) -> Option<(ConnectionId, &StationConnection)> {
        let connection_id = self.by_charge_point.get(charge_point_id)?;
        self.connections
            .get(connection_id)
            .map(|connection| (*connection_id, connection))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ConnectionId, &StationConnection)> {
        self.connections.iter()
    }
}

/// Application state shared by the HTTP handlers and the station sockets.
///
/// Locks are held for the handling of a single frame or request and never
/// across an `.await`.
#[derive(Debug, Clone)]
pub struct AppState {
    central: Arc<Mutex<CentralSystem>>,
    connections: Arc<Mutex<ConnectionTable>>,
}

impl AppState {
    pub fn new(config: EngineConfig) -> Self {
        AppState {
            central: Arc::new(Mutex::new(CentralSystem::new(config))),
            connections: Arc::new(Mutex::new(ConnectionTable::default())),
        }
    }

    pub fn central(&self) -> MutexGuard<'_, CentralSystem> {
        self.central.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn connections(&self) -> MutexGuard<'_, ConnectionTable> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn connect(
        &self,
        charge_point_id: &str,
        sender: mpsc::UnboundedSender<String>,
    ) -> ConnectionId {
        self.connections().attach(charge_point_id, sender)
    }

    pub fn handle_frame(&self, connection_id: ConnectionId, raw: &str) -> Option<String> {
        self.central().handle_frame(connection_id, raw)
    }

    pub fn disconnect(&self, connection_id: ConnectionId) {
        self.connections().detach(&connection_id);
        self.central().disconnect(connection_id);
    }

    /// Issue a call to a connected station and push its frame onto the socket.
    pub fn issue<F>(&self, charge_point_id: &str, make_call: F) -> Result<IssuedCall, ApiError>
    where
        F: FnOnce(&mut CentralSystem, ConnectionId) -> IssuedCall,
    {
        let (connection_id, sender) = self
            .connections()
            .lookup(charge_point_id)
            .map(|(connection_id, connection)| (connection_id, connection.sender.clone()))
            .ok_or_else(|| ApiError::StationNotConnected(charge_point_id.to_string()))?;

        let issued = {
            let mut central = self.central();
            make_call(&mut *central, connection_id)
        };
        // If the socket is gone the pending call is left to expire.
        sender
            .send(issued.envelope.encode())
            .map_err(|_| ApiError::ConnectionClosed(charge_point_id.to_string()))?;
        Ok(issued)
    }
}
