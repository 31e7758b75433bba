//! Protocol state for the Electra charging station management system.
//!
//! Holds the OCPP-J envelope codec together with the per-connection station
//! sessions and the transaction bookkeeping they drive.

pub mod codec;
mod models;
mod registry;
mod transactions;

pub use crate::codec::{Envelope, ErrorCode};
pub use crate::models::*;
pub use crate::registry::SessionRegistry;
pub use crate::transactions::TransactionStore;

use thiserror::Error;

/// Reasons a raw frame could not be turned into an [`Envelope`].
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Frame is not a JSON array")]
    NotAnArray,
    #[error("Frame has no numeric message type")]
    MissingMessageType,
    #[error("Unknown message type {0}")]
    UnknownMessageType(u64),
    #[error("Message type {message_type} needs more elements, got {len}")]
    TooShort { message_type: u64, len: usize },
    #[error("Unique id is not a string")]
    InvalidUniqueId,
    #[error("Malformed call {unique_id}: {reason}")]
    FormationViolation { unique_id: String, reason: String },
}

impl DecodeError {
    /// The unique id of the offending call, when it can still be answered.
    pub fn unique_id(&self) -> Option<&str> {
        match self {
            DecodeError::FormationViolation { unique_id, .. } => Some(unique_id.as_str()),
            _ => None,
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum StoreError {
    #[error("No transaction identifiers left")]
    IdsExhausted,
}
