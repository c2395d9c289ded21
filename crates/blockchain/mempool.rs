use std::{
    collections::{HashMap, VecDeque},
    sync::{Mutex, MutexGuard},
};

use ethereum_types::H256;

use ember_common::types::{Transaction, ValidatorTransaction};

use crate::error::MempoolError;

/// Pending transactions, keyed by hash. Payload and validator
/// transactions live in separate maps behind one mutex; payload arrival
/// order is remembered for block building.
#[derive(Debug, Default)]
pub struct Mempool {
    inner: Mutex<MempoolInner>,
}

#[derive(Debug, Default)]
struct MempoolInner {
    transactions: HashMap<H256, Transaction>,
    arrival_order: VecDeque<H256>,
    validator_transactions: HashMap<H256, ValidatorTransaction>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> Result<MutexGuard<'_, MempoolInner>, MempoolError> {
        self.inner.lock().map_err(|_| MempoolError::LockError)
    }

    /// Adds a validated transaction. A duplicate hash is rejected so the
    /// caller does not re-broadcast.
    pub fn insert(&self, tx: Transaction) -> Result<H256, MempoolError> {
        let mut inner = self.inner()?;
        let hash = tx.compute_hash();
        if inner.transactions.contains_key(&hash) {
            return Err(MempoolError::AlreadyKnown);
        }
        inner.transactions.insert(hash, tx);
        inner.arrival_order.push_back(hash);
        Ok(hash)
    }

    pub fn insert_validator_tx(&self, tx: ValidatorTransaction) -> Result<H256, MempoolError> {
        let mut inner = self.inner()?;
        let hash = tx.compute_hash();
        if inner.validator_transactions.contains_key(&hash) {
            return Err(MempoolError::AlreadyKnown);
        }
        inner.validator_transactions.insert(hash, tx);
        Ok(hash)
    }

    pub fn contains(&self, hash: &H256) -> Result<bool, MempoolError> {
        Ok(self.inner()?.transactions.contains_key(hash))
    }

    pub fn get(&self, hash: &H256) -> Result<Option<Transaction>, MempoolError> {
        Ok(self.inner()?.transactions.get(hash).cloned())
    }

    pub fn len(&self) -> Result<usize, MempoolError> {
        Ok(self.inner()?.transactions.len())
    }

    pub fn is_empty(&self) -> Result<bool, MempoolError> {
        Ok(self.inner()?.transactions.is_empty())
    }

    /// Selects up to `max_count` transactions in arrival order whose
    /// aggregate gas stays within `gas_limit`. Selection does not remove;
    /// removal happens when a block is accepted.
    pub fn select(
        &self,
        max_count: usize,
        gas_limit: u64,
    ) -> Result<Vec<Transaction>, MempoolError> {
        let inner = self.inner()?;
        let mut selected = Vec::new();
        let mut gas_left = gas_limit;
        for hash in &inner.arrival_order {
            if selected.len() >= max_count {
                break;
            }
            if let Some(tx) = inner.transactions.get(hash) {
                if tx.gas_limit > gas_left {
                    continue;
                }
                gas_left -= tx.gas_limit;
                selected.push(tx.clone());
            }
        }
        Ok(selected)
    }

    /// A copy of the current validator-transaction set.
    pub fn validator_transactions(&self) -> Result<Vec<ValidatorTransaction>, MempoolError> {
        Ok(self
            .inner()?
            .validator_transactions
            .values()
            .cloned()
            .collect())
    }

    /// Drops every transaction included in an accepted block.
    pub fn remove_mined(
        &self,
        transactions: &[Transaction],
        validator_transactions: &[ValidatorTransaction],
    ) -> Result<(), MempoolError> {
        let mut inner = self.inner()?;
        for tx in transactions {
            let hash = tx.compute_hash();
            inner.transactions.remove(&hash);
            inner.arrival_order.retain(|known| *known != hash);
        }
        for tx in validator_transactions {
            inner.validator_transactions.remove(&tx.compute_hash());
        }
        Ok(())
    }
}
