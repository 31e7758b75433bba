//! Handling of station-initiated calls.
//!
//! Every call yields exactly one reply: a CALLRESULT on success or a CALLERROR
//! echoing the same unique id.

use chrono::{SecondsFormat, Utc};
use csms_core::{ConnectionId, Envelope, ErrorCode, NewTransaction, StationSession, StoreError};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::CentralSystem;
use crate::messages::*;

/// Actions a charge point may send to the central system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    BootNotification,
    Heartbeat,
    Authorize,
    StartTransaction,
    StopTransaction,
    MeterValues,
    StatusNotification,
    DataTransfer,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::BootNotification => "BootNotification",
            Action::Heartbeat => "Heartbeat",
            Action::Authorize => "Authorize",
            Action::StartTransaction => "StartTransaction",
            Action::StopTransaction => "StopTransaction",
            Action::MeterValues => "MeterValues",
            Action::StatusNotification => "StatusNotification",
            Action::DataTransfer => "DataTransfer",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Action {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BootNotification" => Ok(Action::BootNotification),
            "Heartbeat" => Ok(Action::Heartbeat),
            "Authorize" => Ok(Action::Authorize),
            "StartTransaction" => Ok(Action::StartTransaction),
            "StopTransaction" => Ok(Action::StopTransaction),
            "MeterValues" => Ok(Action::MeterValues),
            "StatusNotification" => Ok(Action::StatusNotification),
            "DataTransfer" => Ok(Action::DataTransfer),
            _ => Err(DispatchError::NotSupported(s.to_string())),
        }
    }
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Action {0} is not supported")]
    NotSupported(String),
    #[error("Invalid {action} payload: {source}")]
    InvalidPayload {
        action: Action,
        source: serde_json::Error,
    },
    #[error("{0}")]
    Formation(String),
    #[error("Could not encode response: {0}")]
    Encode(serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DispatchError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            DispatchError::NotSupported(_) => ErrorCode::NotSupported,
            DispatchError::InvalidPayload { .. } | DispatchError::Formation(_) => {
                ErrorCode::FormationViolation
            }
            DispatchError::Encode(_) | DispatchError::Store(_) => ErrorCode::InternalError,
        }
    }
}

pub fn current_time() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse<T: DeserializeOwned>(action: Action, payload: Value) -> Result<T, DispatchError> {
    serde_json::from_value(payload).map_err(|source| DispatchError::InvalidPayload { action, source })
}

fn respond<T: Serialize>(response: T) -> Result<Value, DispatchError> {
    serde_json::to_value(response).map_err(DispatchError::Encode)
}

fn empty() -> Result<Value, DispatchError> {
    Ok(Value::Object(Map::new()))
}

impl CentralSystem {
    /// Answer a station-initiated call.
    pub fn dispatch(
        &mut self,
        connection_id: ConnectionId,
        unique_id: String,
        action: &str,
        payload: Map<String, Value>,
    ) -> Envelope {
        match self.apply(connection_id, action, Value::Object(payload)) {
            Ok(payload) => Envelope::CallResult { unique_id, payload },
            Err(error) => {
                tracing::warn!(
                    %connection_id,
                    unique_id = unique_id.as_str(),
                    action,
                    "Rejecting call: {}",
                    error
                );
                Envelope::call_error(unique_id, error.error_code(), error.to_string())
            }
        }
    }

    fn apply(
        &mut self,
        connection_id: ConnectionId,
        action: &str,
        payload: Value,
    ) -> Result<Value, DispatchError> {
        let action: Action = action.parse()?;
        tracing::debug!(%connection_id, %action, "Dispatching call");

        match action {
            Action::BootNotification => {
                let request: BootNotificationRequest = parse(action, payload)?;
                let mut session = StationSession::new(
                    request.charge_point_model,
                    request.charge_point_vendor,
                );
                session.serial_number = request.charge_point_serial_number;
                session.firmware_version = request.firmware_version;
                self.sessions.register(connection_id, session);

                respond(BootNotificationResponse {
                    status: RegistrationStatus::Accepted,
                    interval: self.config.heartbeat_interval,
                    current_time: current_time(),
                })
            }
            Action::Heartbeat => respond(HeartbeatResponse {
                current_time: current_time(),
            }),
            Action::Authorize => respond(AuthorizeResponse {
                id_tag_info: IdTagInfo::accepted(),
            }),
            Action::StartTransaction => {
                let request: StartTransactionRequest = parse(action, payload)?;
                let transaction_id = self.transactions.start(NewTransaction {
                    connection_id,
                    connector_id: request.connector_id,
                    id_tag: request.id_tag,
                    meter_start: request.meter_start,
                    started_at: request.timestamp,
                })?;

                respond(StartTransactionResponse {
                    transaction_id,
                    id_tag_info: IdTagInfo::accepted(),
                })
            }
            Action::StopTransaction => {
                let request: StopTransactionRequest = parse(action, payload)?;
                // Unknown or already stopped transactions are still accepted.
                if let Some(transaction) = self.transactions.stop(request.transaction_id) {
                    // Meter readings come from the station and may be nonsense.
                    let delivered = request
                        .meter_stop
                        .and_then(|meter_stop| meter_stop.checked_sub(transaction.meter_start));
                    if let Some(delivered) = delivered {
                        tracing::info!(
                            "Transaction {} delivered {} Wh",
                            transaction.transaction_id,
                            delivered
                        );
                    }
                }

                respond(StopTransactionResponse {
                    id_tag_info: IdTagInfo::accepted(),
                })
            }
            Action::MeterValues => empty(),
            Action::StatusNotification => {
                let request: StatusNotificationRequest = parse(action, payload)?;
                tracing::info!(
                    %connection_id,
                    connector_id = ?request.connector_id,
                    "Station status is now {}",
                    request.status
                );
                self.sessions
                    .update(connection_id, |session| session.status = request.status);
                empty()
            }
            Action::DataTransfer => {
                let request: DataTransferRequest = parse(action, payload)?;
                respond(DataTransferResponse {
                    status: DataTransferStatus::Accepted,
                    data: request.data,
                })
            }
        }
    }
}
