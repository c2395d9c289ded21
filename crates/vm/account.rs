use std::collections::HashMap;

use bytes::Bytes;
use ethereum_types::{H256, U256};

use ember_common::constants::EMPTY_KECCAK_HASH;

/// One mutable state cell holding both layers of a value.
///
/// `committed` reflects the last accepted block, `pending` the in-flight
/// transaction. Reverting restores pending from committed; committing
/// copies pending over committed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValueCell<T: Clone> {
    pub committed: T,
    pub pending: T,
}

impl<T: Clone> ValueCell<T> {
    pub fn new(value: T) -> Self {
        ValueCell {
            committed: value.clone(),
            pending: value,
        }
    }

    pub fn commit(&mut self) {
        self.committed = self.pending.clone();
    }

    pub fn revert(&mut self) {
        self.pending = self.committed.clone();
    }

    pub fn get(&self, pending: bool) -> &T {
        if pending { &self.pending } else { &self.committed }
    }
}

/// An account as seen by the execution core: nonce, balance, code and
/// storage carry both layers; transient storage has a single layer and is
/// wiped at every transaction boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvmAccount {
    pub nonce: ValueCell<u64>,
    pub balance: ValueCell<U256>,
    pub code: ValueCell<Bytes>,
    pub code_hash: ValueCell<H256>,
    pub storage: HashMap<H256, ValueCell<H256>>,
    pub transient_storage: HashMap<H256, H256>,
}

impl Default for EvmAccount {
    fn default() -> Self {
        EvmAccount {
            nonce: ValueCell::default(),
            balance: ValueCell::default(),
            code: ValueCell::default(),
            code_hash: ValueCell::new(EMPTY_KECCAK_HASH),
            storage: HashMap::new(),
            transient_storage: HashMap::new(),
        }
    }
}

impl EvmAccount {
    /// An address is a contract iff its code is non-empty.
    pub fn is_contract(&self) -> bool {
        !self.code.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_commit_and_revert() {
        let mut cell = ValueCell::new(1u64);
        cell.pending = 5;
        assert_eq!(*cell.get(true), 5);
        assert_eq!(*cell.get(false), 1);
        cell.revert();
        assert_eq!(cell.pending, 1);
        cell.pending = 7;
        cell.commit();
        assert_eq!(cell.committed, 7);
    }

    #[test]
    fn fresh_account_has_empty_code_hash() {
        let account = EvmAccount::default();
        assert_eq!(account.code_hash.committed, EMPTY_KECCAK_HASH);
        assert_eq!(account.code_hash.pending, EMPTY_KECCAK_HASH);
        assert!(!account.is_contract());
    }
}
