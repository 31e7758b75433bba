//! The OCPP 1.6 central system.
//!
//! [`CentralSystem`] owns every piece of protocol state: the station sessions,
//! the transaction store and the calls the server itself has issued. It is
//! transport agnostic: frames go in as text and replies come back as text.
//!
//! The struct is not internally synchronised. A multi-threaded host must keep
//! it behind a mutex and handle one frame per lock acquisition.

mod dispatcher;
pub mod messages;
mod tracker;

pub use crate::dispatcher::{Action, DispatchError, current_time};
pub use crate::tracker::{CallOutcome, IssuedCall, OutboundCallTracker, PendingCall, TrackerError};

use std::time::Duration;

use chrono::{DateTime, Utc};
use csms_core::{
    ConnectionId, DecodeError, Envelope, ErrorCode, SessionRegistry, TransactionId,
    TransactionStore,
};
use serde_json::{Map, Value};

use crate::messages::{RemoteStartTransactionRequest, RemoteStopTransactionRequest};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Heartbeat interval handed to stations on boot, in seconds.
    pub heartbeat_interval: u32,
    /// How long a server-initiated call may wait for its reply.
    pub call_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            heartbeat_interval: 300,
            call_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
pub struct CentralSystem {
    config: EngineConfig,
    sessions: SessionRegistry,
    transactions: TransactionStore,
    tracker: OutboundCallTracker,
}

impl CentralSystem {
    pub fn new(config: EngineConfig) -> Self {
        CentralSystem {
            tracker: OutboundCallTracker::new(config.call_timeout),
            config,
            sessions: SessionRegistry::new(),
            transactions: TransactionStore::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn transactions(&self) -> &TransactionStore {
        &self.transactions
    }

    pub fn tracker(&self) -> &OutboundCallTracker {
        &self.tracker
    }

    /// Handle one raw frame from a station, returning the reply to send back if any.
    pub fn handle_frame(&mut self, connection_id: ConnectionId, raw: &str) -> Option<String> {
        tracing::debug!(%connection_id, "Received frame {}", raw);
        match Envelope::decode(raw) {
            Ok(envelope) => self
                .handle_envelope(connection_id, envelope)
                .map(|reply| reply.encode()),
            Err(DecodeError::FormationViolation { unique_id, reason }) => {
                tracing::warn!(%connection_id, unique_id = unique_id.as_str(), "Malformed call: {}", reason);
                Some(Envelope::call_error(unique_id, ErrorCode::FormationViolation, reason).encode())
            }
            Err(error) => {
                tracing::warn!(%connection_id, "Dropping frame: {}", error);
                None
            }
        }
    }

    pub fn handle_envelope(
        &mut self,
        connection_id: ConnectionId,
        envelope: Envelope,
    ) -> Option<Envelope> {
        match envelope {
            Envelope::Call {
                unique_id,
                action,
                payload,
            } => Some(self.dispatch(connection_id, unique_id, &action, payload)),
            Envelope::CallResult { unique_id, payload } => {
                self.on_reply(connection_id, &unique_id, CallOutcome::Result { payload });
                None
            }
            Envelope::CallError {
                unique_id,
                error_code,
                error_description,
                details,
            } => {
                self.on_reply(
                    connection_id,
                    &unique_id,
                    CallOutcome::Error {
                        code: error_code,
                        description: error_description,
                        details,
                    },
                );
                None
            }
        }
    }

    fn on_reply(&mut self, connection_id: ConnectionId, unique_id: &str, outcome: CallOutcome) {
        let failed = !matches!(outcome, CallOutcome::Result { .. });
        match self.tracker.resolve(connection_id, unique_id, outcome) {
            Ok(call) if failed => tracing::warn!(
                %connection_id,
                correlation_id = unique_id,
                "Station refused {}",
                call.action
            ),
            Ok(call) => tracing::info!(
                %connection_id,
                correlation_id = unique_id,
                "Station answered {}",
                call.action
            ),
            Err(error) => tracing::warn!(%connection_id, "Ignoring reply: {}", error),
        }
    }

    /// Forget the station on a closed connection.
    ///
    /// Transactions and pending calls are left alone; they end on their own or expire.
    pub fn disconnect(&mut self, connection_id: ConnectionId) {
        self.sessions.remove(&connection_id);
        let pending = self.tracker.pending_for(connection_id).count();
        if pending > 0 {
            tracing::info!(
                %connection_id,
                "Connection closed with {} call(s) still pending",
                pending
            );
        }
    }

    /// Issue an arbitrary server-initiated call.
    pub fn send_call(
        &mut self,
        connection_id: ConnectionId,
        action: &str,
        payload: Map<String, Value>,
    ) -> IssuedCall {
        self.tracker.issue(connection_id, action, payload)
    }

    pub fn remote_start_transaction(
        &mut self,
        connection_id: ConnectionId,
        request: RemoteStartTransactionRequest,
    ) -> IssuedCall {
        self.send_call(connection_id, "RemoteStartTransaction", to_payload(&request))
    }

    pub fn remote_stop_transaction(
        &mut self,
        connection_id: ConnectionId,
        transaction_id: TransactionId,
    ) -> IssuedCall {
        self.send_call(
            connection_id,
            "RemoteStopTransaction",
            to_payload(&RemoteStopTransactionRequest { transaction_id }),
        )
    }

    pub fn expire_calls(&mut self, now: DateTime<Utc>) -> Vec<PendingCall> {
        self.tracker.expire(now)
    }
}

fn to_payload<T: serde::Serialize>(request: &T) -> Map<String, Value> {
    match serde_json::to_value(request) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}
