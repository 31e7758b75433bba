use serde::{Deserialize, Serialize};

/// Opaque handle for one open station connection.
///
/// Allocated by the transport when a socket is accepted and only ever used as a
/// lookup key by the protocol layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(uuid::Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        ConnectionId(uuid::Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationSession {
    pub status: String,
    pub model: String,
    pub vendor: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,
}

impl StationSession {
    pub fn new(model: impl Into<String>, vendor: impl Into<String>) -> Self {
        StationSession {
            status: "Available".into(),
            model: model.into(),
            vendor: vendor.into(),
            serial_number: None,
            firmware_version: None,
        }
    }
}

pub type TransactionId = i32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub transaction_id: TransactionId,
    pub connection_id: ConnectionId,
    pub connector_id: u32,
    pub id_tag: String,
    pub meter_start: i64,
    /// Station supplied, kept verbatim.
    pub started_at: String,
}

/// Fields of a transaction as announced by the station, before an id is assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub connection_id: ConnectionId,
    pub connector_id: u32,
    pub id_tag: String,
    pub meter_start: i64,
    pub started_at: String,
}
