use std::collections::HashMap;

use bytes::Bytes;
use ethereum_types::{Address, H256, U256};
use tracing::{debug, info};

use ember_common::constants::EMPTY_KECCAK_HASH;
use ember_crypto::keccak_hash;
use ember_storage::{
    DbPrefix, KvStore, StoreError, WriteBatch,
    keys::{LATEST_HEIGHT_KEY, account_storage_key, split_account_storage_key},
};

use crate::{
    account::{EvmAccount, ValueCell},
    errors::VmError,
    registry::Contract,
};

/// EIP-1283 style result of a storage write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageStatus {
    Assigned,
    Added,
    Modified,
    Deleted,
}

/// Marks the length of every access log at frame entry. Reverting to a
/// checkpoint undoes exactly the writes recorded after it.
#[derive(Clone, Copy, Debug, Default)]
pub struct Checkpoint {
    balances: usize,
    nonces: usize,
    codes: usize,
    storages: usize,
    transients: usize,
    created: usize,
    events: usize,
}

impl Checkpoint {
    pub fn events(&self) -> usize {
        self.events
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Chain height mismatch on snapshot load: expected {expected}, found {found}")]
    DbCorrupted { expected: u64, found: u64 },
    #[error("Malformed snapshot entry")]
    BadSnapshot,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The authoritative world state: account map, contract registry and the
/// access logs that make per-access commit/revert possible.
///
/// Not internally synchronized; the execution core serializes access with
/// one exclusive lock for the duration of a transaction.
#[derive(Debug, Default)]
pub struct StateStore {
    accounts: HashMap<Address, EvmAccount>,
    /// Deployed contract handlers, appended to only by creation execution.
    contracts: HashMap<Address, Contract>,
    /// Creation transaction hash -> deployed address.
    contract_addresses: HashMap<H256, Address>,

    // Access logs, in insertion order. Walked in reverse on commit/revert.
    accessed_balances: Vec<Address>,
    accessed_nonces: Vec<Address>,
    accessed_codes: Vec<Address>,
    accessed_storages: Vec<(Address, H256)>,
    accessed_transients: Vec<Address>,
    /// Creations of the current transaction; cleared at every tx boundary.
    recently_created: Vec<H256>,
    /// Creations staged by the current block, for registry rollback on reject.
    created_this_block: Vec<(H256, Address)>,

    in_transaction: bool,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_transaction(&mut self) {
        self.in_transaction = true;
    }

    /// Ends the active transaction: wipes transient storage for every
    /// touched address and forgets the per-transaction creation list.
    pub fn end_transaction(&mut self) {
        self.in_transaction = false;
        self.clear_transients(0);
        self.recently_created.clear();
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    pub fn account_exists(&self, address: &Address) -> bool {
        self.accounts.contains_key(address)
    }

    pub fn account(&self, address: &Address) -> Option<&EvmAccount> {
        self.accounts.get(address)
    }

    fn account_mut(&mut self, address: Address) -> &mut EvmAccount {
        self.accounts.entry(address).or_default()
    }

    // ── Balances ───────────────────────────────────────────────────────

    pub fn get_balance(&self, address: &Address) -> U256 {
        self.accounts
            .get(address)
            .map(|acc| *acc.balance.get(self.in_transaction))
            .unwrap_or_default()
    }

    /// The staged balance, regardless of frame state. Used by transaction
    /// validation at sequencing time.
    pub fn pending_balance(&self, address: &Address) -> U256 {
        self.accounts
            .get(address)
            .map(|acc| acc.balance.pending)
            .unwrap_or_default()
    }

    pub fn add_balance(&mut self, address: Address, amount: U256) {
        self.accessed_balances.push(address);
        let balance = &mut self.account_mut(address).balance;
        balance.pending = balance.pending.saturating_add(amount);
    }

    pub fn sub_balance(&mut self, address: Address, amount: U256) -> Result<(), VmError> {
        if self.pending_balance(&address) < amount {
            return Err(VmError::Custom(format!(
                "balance underflow for {address:#x}"
            )));
        }
        self.accessed_balances.push(address);
        let balance = &mut self.account_mut(address).balance;
        balance.pending -= amount;
        Ok(())
    }

    /// Moves `value` from `from` to `to` in the pending layer.
    pub fn transfer(&mut self, from: Address, to: Address, value: U256) -> Result<(), VmError> {
        if value.is_zero() {
            return Ok(());
        }
        self.sub_balance(from, value)?;
        self.add_balance(to, value);
        Ok(())
    }

    // ── Nonces ─────────────────────────────────────────────────────────

    pub fn get_nonce(&self, address: &Address) -> u64 {
        self.accounts
            .get(address)
            .map(|acc| *acc.nonce.get(self.in_transaction))
            .unwrap_or_default()
    }

    /// The staged nonce, regardless of frame state.
    pub fn pending_nonce(&self, address: &Address) -> u64 {
        self.accounts
            .get(address)
            .map(|acc| acc.nonce.pending)
            .unwrap_or_default()
    }

    pub fn bump_nonce(&mut self, address: Address) {
        self.accessed_nonces.push(address);
        let nonce = &mut self.account_mut(address).nonce;
        nonce.pending = nonce.pending.saturating_add(1);
    }

    // ── Code ───────────────────────────────────────────────────────────

    /// Staged code of the account; what execution and the host read.
    pub fn get_code(&self, address: &Address) -> Bytes {
        self.accounts
            .get(address)
            .map(|acc| acc.code.pending.clone())
            .unwrap_or_default()
    }

    pub fn get_code_hash(&self, address: &Address) -> H256 {
        self.accounts
            .get(address)
            .map(|acc| acc.code_hash.pending)
            .unwrap_or(EMPTY_KECCAK_HASH)
    }

    /// Stages contract code. Code is immutable once set to a non-empty
    /// value for a given address.
    pub fn set_code(&mut self, address: Address, code: Bytes) -> Result<(), VmError> {
        let account = self.account_mut(address);
        if !account.code.pending.is_empty() {
            return Err(VmError::Custom(format!(
                "code already set for {address:#x}"
            )));
        }
        self.accessed_codes.push(address);
        let hash = if code.is_empty() {
            EMPTY_KECCAK_HASH
        } else {
            H256(keccak_hash(&code))
        };
        let account = self.account_mut(address);
        account.code.pending = code;
        account.code_hash.pending = hash;
        Ok(())
    }

    // ── Storage ────────────────────────────────────────────────────────

    pub fn get_storage(&self, address: &Address, key: &H256) -> H256 {
        self.accounts
            .get(address)
            .and_then(|acc| acc.storage.get(key))
            .map(|cell| *cell.get(self.in_transaction))
            .unwrap_or_default()
    }

    pub fn set_storage(&mut self, address: Address, key: H256, value: H256) -> StorageStatus {
        self.accessed_storages.push((address, key));
        let cell = self
            .account_mut(address)
            .storage
            .entry(key)
            .or_default();

        let original = cell.committed;
        let current = cell.pending;

        // EIP-1283
        let status = if current == value {
            StorageStatus::Assigned
        } else if original == current {
            if current.is_zero() {
                StorageStatus::Added
            } else if value.is_zero() {
                StorageStatus::Deleted
            } else {
                StorageStatus::Modified
            }
        } else {
            StorageStatus::Assigned
        };

        cell.pending = value;
        status
    }

    // ── Transient storage ──────────────────────────────────────────────

    pub fn get_transient(&self, address: &Address, key: &H256) -> H256 {
        self.accounts
            .get(address)
            .and_then(|acc| acc.transient_storage.get(key))
            .copied()
            .unwrap_or_default()
    }

    pub fn set_transient(&mut self, address: Address, key: H256, value: H256) {
        self.accessed_transients.push(address);
        self.account_mut(address)
            .transient_storage
            .insert(key, value);
    }

    // ── Contract registry ──────────────────────────────────────────────

    pub fn register_contract(&mut self, tx_hash: H256, address: Address, contract: Contract) {
        self.contract_addresses.insert(tx_hash, address);
        self.contracts.insert(address, contract);
        self.recently_created.push(tx_hash);
        self.created_this_block.push((tx_hash, address));
    }

    pub fn contract(&self, address: &Address) -> Option<&Contract> {
        self.contracts.get(address)
    }

    pub fn contract_address_for(&self, tx_hash: &H256) -> Option<Address> {
        self.contract_addresses.get(tx_hash).copied()
    }

    /// Registers a native precompile outside of creation execution; used
    /// only while wiring genesis state.
    pub fn install_precompile(&mut self, address: Address, contract: Contract) {
        self.contracts.insert(address, contract);
    }

    // ── Commit / revert ────────────────────────────────────────────────

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            balances: self.accessed_balances.len(),
            nonces: self.accessed_nonces.len(),
            codes: self.accessed_codes.len(),
            storages: self.accessed_storages.len(),
            transients: self.accessed_transients.len(),
            created: self.recently_created.len(),
            events: 0,
        }
    }

    pub fn checkpoint_with_events(&self, events: usize) -> Checkpoint {
        Checkpoint {
            events,
            ..self.checkpoint()
        }
    }

    /// Undoes every write recorded after `checkpoint`, newest first:
    /// pending layers are restored from committed, transient entries are
    /// wiped, registry entries created after the checkpoint are removed.
    pub fn revert_to(&mut self, checkpoint: &Checkpoint) {
        while self.accessed_storages.len() > checkpoint.storages {
            if let Some((address, key)) = self.accessed_storages.pop() {
                if let Some(cell) = self
                    .accounts
                    .get_mut(&address)
                    .and_then(|acc| acc.storage.get_mut(&key))
                {
                    cell.revert();
                }
            }
        }
        while self.accessed_balances.len() > checkpoint.balances {
            if let Some(address) = self.accessed_balances.pop() {
                if let Some(account) = self.accounts.get_mut(&address) {
                    account.balance.revert();
                }
            }
        }
        while self.accessed_nonces.len() > checkpoint.nonces {
            if let Some(address) = self.accessed_nonces.pop() {
                if let Some(account) = self.accounts.get_mut(&address) {
                    account.nonce.revert();
                }
            }
        }
        while self.accessed_codes.len() > checkpoint.codes {
            if let Some(address) = self.accessed_codes.pop() {
                if let Some(account) = self.accounts.get_mut(&address) {
                    account.code.revert();
                    account.code_hash.revert();
                }
            }
        }
        self.clear_transients(checkpoint.transients);
        while self.recently_created.len() > checkpoint.created {
            if let Some(tx_hash) = self.recently_created.pop() {
                if let Some(address) = self.contract_addresses.remove(&tx_hash) {
                    self.contracts.remove(&address);
                }
                self.created_this_block
                    .retain(|(hash, _)| *hash != tx_hash);
            }
        }
    }

    /// Promotes every staged value to committed and drops the logs.
    /// Called once per accepted block.
    pub fn commit_all(&mut self) {
        while let Some((address, key)) = self.accessed_storages.pop() {
            if let Some(cell) = self
                .accounts
                .get_mut(&address)
                .and_then(|acc| acc.storage.get_mut(&key))
            {
                cell.commit();
            }
        }
        while let Some(address) = self.accessed_balances.pop() {
            if let Some(account) = self.accounts.get_mut(&address) {
                account.balance.commit();
            }
        }
        while let Some(address) = self.accessed_nonces.pop() {
            if let Some(account) = self.accounts.get_mut(&address) {
                account.nonce.commit();
            }
        }
        while let Some(address) = self.accessed_codes.pop() {
            if let Some(account) = self.accounts.get_mut(&address) {
                account.code.commit();
                account.code_hash.commit();
            }
        }
        self.clear_transients(0);
        self.recently_created.clear();
        self.created_this_block.clear();
    }

    /// Reverts every staged value of the current block, newest first, and
    /// removes the registry entries its transactions created.
    pub fn revert_all(&mut self) {
        let created = std::mem::take(&mut self.created_this_block);
        for (tx_hash, address) in created.iter().rev() {
            self.contract_addresses.remove(tx_hash);
            self.contracts.remove(address);
        }
        self.recently_created.clear();
        self.revert_to(&Checkpoint::default());
    }

    fn clear_transients(&mut self, keep: usize) {
        while self.accessed_transients.len() > keep {
            if let Some(address) = self.accessed_transients.pop() {
                if let Some(account) = self.accounts.get_mut(&address) {
                    account.transient_storage.clear();
                }
            }
        }
    }

    // ── Durability ─────────────────────────────────────────────────────

    /// Flushes the committed layer to the store, together with the
    /// `latest` height marker. Until this returns, the previous snapshot
    /// stays authoritative.
    pub fn snapshot_to_db(&self, db: &dyn KvStore, height: u64) -> Result<(), StateError> {
        let mut code_batch = WriteBatch::new();
        let mut hash_batch = WriteBatch::new();
        let mut balance_batch = WriteBatch::new();
        let mut nonce_batch = WriteBatch::new();
        let mut storage_batch = WriteBatch::new();
        for (address, account) in &self.accounts {
            code_batch.put(address.as_bytes(), account.code.committed.to_vec());
            hash_batch.put(address.as_bytes(), account.code_hash.committed.as_bytes());
            balance_batch.put(
                address.as_bytes(),
                account.balance.committed.to_big_endian().to_vec(),
            );
            nonce_batch.put(
                address.as_bytes(),
                account.nonce.committed.to_be_bytes().to_vec(),
            );
            for (key, value) in &account.storage {
                storage_batch.put(
                    account_storage_key(address, key),
                    value.committed.as_bytes(),
                );
            }
        }
        let mut contracts_batch = WriteBatch::new();
        for (tx_hash, address) in &self.contract_addresses {
            contracts_batch.put(tx_hash.as_bytes(), address.as_bytes());
        }

        db.write_batch(code_batch, DbPrefix::AccountCode)?;
        db.write_batch(hash_batch, DbPrefix::AccountCodeHash)?;
        db.write_batch(balance_batch, DbPrefix::AccountBalance)?;
        db.write_batch(nonce_batch, DbPrefix::AccountNonce)?;
        db.write_batch(storage_batch, DbPrefix::AccountStorage)?;
        db.write_batch(contracts_batch, DbPrefix::ContractAddresses)?;
        db.put(
            LATEST_HEIGHT_KEY,
            &height.to_be_bytes(),
            DbPrefix::EvmHost,
        )?;
        info!(height, accounts = self.accounts.len(), "state snapshot flushed");
        Ok(())
    }

    /// Rehydrates the account map from a snapshot. Returns `None` when no
    /// snapshot was ever written. Fails when the stored height marker
    /// disagrees with the caller's chain height.
    pub fn load_from_db(
        db: &dyn KvStore,
        expected_height: u64,
    ) -> Result<Option<StateStore>, StateError> {
        let Some(marker) = db.get(LATEST_HEIGHT_KEY, DbPrefix::EvmHost)? else {
            return Ok(None);
        };
        let found = u64::from_be_bytes(marker.try_into().map_err(|_| StateError::BadSnapshot)?);
        if found != expected_height {
            return Err(StateError::DbCorrupted {
                expected: expected_height,
                found,
            });
        }

        let mut state = StateStore::new();
        for (key, value) in db.read_batch(DbPrefix::AccountCode)? {
            if key.len() != 20 {
                return Err(StateError::BadSnapshot);
            }
            let address = Address::from_slice(&key);
            let account = state.account_mut(address);
            account.code = ValueCell::new(Bytes::from(value));
        }
        for (key, value) in db.read_batch(DbPrefix::AccountCodeHash)? {
            if key.len() != 20 || value.len() != 32 {
                return Err(StateError::BadSnapshot);
            }
            let account = state.account_mut(Address::from_slice(&key));
            account.code_hash = ValueCell::new(H256::from_slice(&value));
        }
        for (key, value) in db.read_batch(DbPrefix::AccountBalance)? {
            if key.len() != 20 || value.len() != 32 {
                return Err(StateError::BadSnapshot);
            }
            let account = state.account_mut(Address::from_slice(&key));
            account.balance = ValueCell::new(U256::from_big_endian(&value));
        }
        for (key, value) in db.read_batch(DbPrefix::AccountNonce)? {
            let nonce =
                u64::from_be_bytes(value.try_into().map_err(|_| StateError::BadSnapshot)?);
            let account = state.account_mut(Address::from_slice(&key));
            account.nonce = ValueCell::new(nonce);
        }
        for (key, value) in db.read_batch(DbPrefix::AccountStorage)? {
            let (address, slot) =
                split_account_storage_key(&key).ok_or(StateError::BadSnapshot)?;
            if value.len() != 32 {
                return Err(StateError::BadSnapshot);
            }
            state
                .account_mut(address)
                .storage
                .insert(slot, ValueCell::new(H256::from_slice(&value)));
        }
        for (key, value) in db.read_batch(DbPrefix::ContractAddresses)? {
            if key.len() != 32 || value.len() != 20 {
                return Err(StateError::BadSnapshot);
            }
            state
                .contract_addresses
                .insert(H256::from_slice(&key), Address::from_slice(&value));
        }
        // Bytecode handlers are rebuilt from the rehydrated accounts.
        let deployed: Vec<(Address, Bytes)> = state
            .contract_addresses
            .values()
            .filter_map(|address| {
                let code = state.get_code(address);
                (!code.is_empty()).then_some((*address, code))
            })
            .collect();
        for (address, code) in deployed {
            state.contracts.insert(address, Contract::Bytecode(code));
        }

        debug!(
            height = expected_height,
            accounts = state.accounts.len(),
            "state snapshot loaded"
        );
        Ok(Some(state))
    }
}
