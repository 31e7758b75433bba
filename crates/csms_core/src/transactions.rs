use std::collections::HashMap;

use crate::{NewTransaction, StoreError, Transaction, TransactionId};

/// Active transactions and the counter that numbers them.
///
/// Identifiers start at 1 and are never reused, even after the transaction
/// they belonged to has been stopped. Once `TransactionId::MAX` has been
/// handed out the store refuses further starts.
#[derive(Debug)]
pub struct TransactionStore {
    transactions: HashMap<TransactionId, Transaction>,
    /// `None` once the id space is used up.
    next_id: Option<TransactionId>,
}

impl Default for TransactionStore {
    fn default() -> Self {
        TransactionStore {
            transactions: HashMap::new(),
            next_id: Some(1),
        }
    }
}

impl TransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, fields: NewTransaction) -> Result<TransactionId, StoreError> {
        let transaction_id = self.next_id.ok_or(StoreError::IdsExhausted)?;
        self.next_id = transaction_id.checked_add(1);

        tracing::info!(
            "Starting transaction {} on connector {} for tag {}",
            transaction_id,
            fields.connector_id,
            fields.id_tag
        );
        self.transactions.insert(
            transaction_id,
            Transaction {
                transaction_id,
                connection_id: fields.connection_id,
                connector_id: fields.connector_id,
                id_tag: fields.id_tag,
                meter_start: fields.meter_start,
                started_at: fields.started_at,
            },
        );
        Ok(transaction_id)
    }

    /// Remove the transaction, returning it if it was still active.
    ///
    /// Stopping an unknown or already stopped transaction is not an error.
    pub fn stop(&mut self, transaction_id: TransactionId) -> Option<Transaction> {
        let stopped = self.transactions.remove(&transaction_id);
        match &stopped {
            Some(_) => tracing::info!("Stopped transaction {}", transaction_id),
            None => tracing::info!("Stop for unknown transaction {}", transaction_id),
        }
        stopped
    }

    pub fn get(&self, transaction_id: TransactionId) -> Option<&Transaction> {
        self.transactions.get(&transaction_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transaction> {
        self.transactions.values()
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}
