//! Server-initiated calls awaiting a reply from the station.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use csms_core::{ConnectionId, Envelope, ErrorCode};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TrackerError {
    #[error("No pending call with id {0}")]
    Unmatched(String),
    #[error("Call {correlation_id} was issued to connection {expected}, not {actual}")]
    WrongConnection {
        correlation_id: String,
        expected: ConnectionId,
        actual: ConnectionId,
    },
}

/// How a server-initiated call ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CallOutcome {
    Result {
        payload: Value,
    },
    Error {
        code: ErrorCode,
        description: String,
        details: Value,
    },
    TimedOut,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingCall {
    pub correlation_id: String,
    pub connection_id: ConnectionId,
    pub action: String,
    pub payload: Map<String, Value>,
    pub issued_at: DateTime<Utc>,
}

/// A freshly issued call: the frame to send and where its outcome will land.
#[derive(Debug)]
pub struct IssuedCall {
    pub correlation_id: String,
    pub envelope: Envelope,
    pub outcome: oneshot::Receiver<CallOutcome>,
}

#[derive(Debug)]
struct Entry {
    call: PendingCall,
    reply: oneshot::Sender<CallOutcome>,
}

#[derive(Debug)]
pub struct OutboundCallTracker {
    pending: HashMap<String, Entry>,
    timeout: Duration,
}

impl OutboundCallTracker {
    pub fn new(timeout: Duration) -> Self {
        OutboundCallTracker {
            pending: HashMap::new(),
            timeout,
        }
    }

    fn next_correlation_id(&self) -> String {
        loop {
            let id = uuid::Uuid::new_v4().to_string();
            if !self.pending.contains_key(&id) {
                return id;
            }
        }
    }

    pub fn issue(
        &mut self,
        connection_id: ConnectionId,
        action: impl Into<String>,
        payload: Map<String, Value>,
    ) -> IssuedCall {
        let correlation_id = self.next_correlation_id();
        let action = action.into();
        let (reply, outcome) = oneshot::channel();

        tracing::info!(
            correlation_id = correlation_id.as_str(),
            action = action.as_str(),
            %connection_id,
            "Issuing call"
        );

        let envelope = Envelope::Call {
            unique_id: correlation_id.clone(),
            action: action.clone(),
            payload: payload.clone(),
        };
        self.pending.insert(
            correlation_id.clone(),
            Entry {
                call: PendingCall {
                    correlation_id: correlation_id.clone(),
                    connection_id,
                    action,
                    payload,
                    issued_at: Utc::now(),
                },
                reply,
            },
        );

        IssuedCall {
            correlation_id,
            envelope,
            outcome,
        }
    }

    /// Match a reply to the call that requested it and hand the outcome to the issuer.
    pub fn resolve(
        &mut self,
        connection_id: ConnectionId,
        correlation_id: &str,
        outcome: CallOutcome,
    ) -> Result<PendingCall, TrackerError> {
        let Some(entry) = self.pending.get(correlation_id) else {
            return Err(TrackerError::Unmatched(correlation_id.to_string()));
        };
        if entry.call.connection_id != connection_id {
            return Err(TrackerError::WrongConnection {
                correlation_id: correlation_id.to_string(),
                expected: entry.call.connection_id,
                actual: connection_id,
            });
        }

        let Some(entry) = self.pending.remove(correlation_id) else {
            return Err(TrackerError::Unmatched(correlation_id.to_string()));
        };
        // The issuer may have stopped listening.
        let _ = entry.reply.send(outcome);
        Ok(entry.call)
    }

    /// Evict every call older than the timeout, notifying issuers with `TimedOut`.
    pub fn expire(&mut self, now: DateTime<Utc>) -> Vec<PendingCall> {
        let timeout = self.timeout;
        let expired_ids: Vec<String> = self
            .pending
            .values()
            .filter(|entry| {
                (now - entry.call.issued_at)
                    .to_std()
                    .is_ok_and(|elapsed| elapsed >= timeout)
            })
            .map(|entry| entry.call.correlation_id.clone())
            .collect();

        expired_ids
            .iter()
            .filter_map(|id| self.pending.remove(id))
            .map(|entry| {
                tracing::warn!(
                    correlation_id = entry.call.correlation_id.as_str(),
                    action = entry.call.action.as_str(),
                    "Call timed out"
                );
                let _ = entry.reply.send(CallOutcome::TimedOut);
                entry.call
            })
            .collect()
    }

    pub fn get(&self, correlation_id: &str) -> Option<&PendingCall> {
        self.pending.get(correlation_id).map(|entry| &entry.call)
    }

    pub fn pending_for(&self, connection_id: ConnectionId) -> impl Iterator<Item = &PendingCall> {
        self.pending
            .values()
            .map(|entry| &entry.call)
            .filter(move |call| call.connection_id == connection_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
