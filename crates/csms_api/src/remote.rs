use std::time::Duration;

use axum::{
    Json,
    extract::{Path, State},
};
use csms_core::TransactionId;
use csms_engine::{CallOutcome, IssuedCall, messages::RemoteStartTransactionRequest};
use serde::{Deserialize, Serialize};

use crate::{ApiError, app_state::AppState};

/// Grace period on top of the call timeout before a handler stops waiting on its own.
const REPLY_GRACE: Duration = Duration::from_secs(1);

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStartRequest {
    #[serde(default)]
    pub connector_id: Option<u32>,
    pub id_tag: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStopRequest {
    pub transaction_id: TransactionId,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallResponse {
    pub correlation_id: String,
    pub outcome: CallOutcome,
}

async fn await_outcome(app_state: &AppState, issued: IssuedCall) -> CallResponse {
    let wait = app_state.central().config().call_timeout + REPLY_GRACE;
    let IssuedCall {
        correlation_id,
        outcome,
        ..
    } = issued;

    let outcome = match tokio::time::timeout(wait, outcome).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(_)) | Err(_) => CallOutcome::TimedOut,
    };
    CallResponse {
        correlation_id,
        outcome,
    }
}

/// Ask a station to start charging
pub async fn remote_start(
    State(app_state): State<AppState>,
    Path(charge_point_id): Path<String>,
    Json(payload): Json<RemoteStartRequest>,
) -> Result<Json<CallResponse>, ApiError> {
    tracing::info!("Remote start requested for station {}", charge_point_id);
    let issued = app_state.issue(&charge_point_id, |central, connection_id| {
        central.remote_start_transaction(
            connection_id,
            RemoteStartTransactionRequest {
                connector_id: payload.connector_id,
                id_tag: payload.id_tag,
            },
        )
    })?;
    Ok(Json(await_outcome(&app_state, issued).await))
}

/// Ask a station to stop one of its transactions
pub async fn remote_stop(
    State(app_state): State<AppState>,
    Path(charge_point_id): Path<String>,
    Json(payload): Json<RemoteStopRequest>,
) -> Result<Json<CallResponse>, ApiError> {
    tracing::info!(
        "Remote stop of transaction {} requested for station {}",
        payload.transaction_id,
        charge_point_id
    );
    let issued = app_state.issue(&charge_point_id, |central, connection_id| {
        central.remote_stop_transaction(connection_id, payload.transaction_id)
    })?;
    Ok(Json(await_outcome(&app_state, issued).await))
}
