use axum::{Json, extract::State};
use chrono::{DateTime, Utc};
use csms_core::{ConnectionId, StationSession, Transaction};
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationView {
    pub connection_id: ConnectionId,
    pub charge_point_id: String,
    pub connected_at: DateTime<Utc>,
    /// `None` until the station has sent anything that creates a session.
    pub session: Option<StationSession>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationsResponse {
    pub stations: Vec<StationView>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionsResponse {
    pub transactions: Vec<Transaction>,
}

/// List connected stations with their session record
pub async fn get_stations(State(app_state): State<AppState>) -> Json<StationsResponse> {
    tracing::info!("Listing connected stations");
    let connections: Vec<(ConnectionId, String, DateTime<Utc>)> = app_state
        .connections()
        .iter()
        .map(|(connection_id, connection)| {
            (
                *connection_id,
                connection.charge_point_id.clone(),
                connection.connected_at,
            )
        })
        .collect();

    let central = app_state.central();
    let mut stations: Vec<StationView> = connections
        .into_iter()
        .map(|(connection_id, charge_point_id, connected_at)| StationView {
            connection_id,
            charge_point_id,
            connected_at,
            session: central.sessions().get(&connection_id).cloned(),
        })
        .collect();
    stations.sort_by(|a, b| a.charge_point_id.cmp(&b.charge_point_id));

    Json(StationsResponse { stations })
}

/// List active transactions ordered by id
pub async fn get_transactions(State(app_state): State<AppState>) -> Json<TransactionsResponse> {
    tracing::info!("Listing active transactions");
    let central = app_state.central();
    let mut transactions: Vec<Transaction> = central.transactions().iter().cloned().collect();
    transactions.sort_by_key(|transaction| transaction.transaction_id);
    Json(TransactionsResponse { transactions })
}
