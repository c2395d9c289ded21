pub mod chain_head;
pub mod chain_tip;
pub mod error;
pub mod gossip;
pub mod mempool;
pub mod node;
pub mod validator;

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
    time::Instant,
};

use ethereum_types::Address;
use tracing::{info, warn};

use ember_common::types::{Block, BlockHash, ChainConfig, Event, Transaction, ValidatorTransaction};
use ember_rlp::encode::RLPEncode;
use ember_storage::{DbPrefix, KvStore};
use ember_vm::{
    backends::BytecodeVm,
    errors::InvalidTransaction,
    executor::{BlockEnv, execute_transaction},
    state::StateStore,
};

pub use chain_head::ChainHead;
pub use chain_tip::{BlockStatus, ChainTip};
pub use error::{ChainError, InvalidBlockError, MempoolError, NodeError};
pub use gossip::{Gossip, NoopGossip};
pub use mempool::Mempool;

/// Outcome of parsing raw block bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedBlock {
    pub id: BlockHash,
    pub parent_id: BlockHash,
    pub height: u64,
    pub timestamp: u64,
    pub status: BlockStatus,
}

/// Serialized ancestors of a block, possibly cut short by a budget.
#[derive(Clone, Debug, Default)]
pub struct AncestorsResponse {
    pub blocks: Vec<Vec<u8>>,
    pub truncated: bool,
}

/// The block pipeline: owns the accepted chain, the tentative tip, the
/// world state and the mempool, and drives transaction execution.
pub struct Blockchain {
    pub config: ChainConfig,
    pub head: Arc<ChainHead>,
    pub tip: ChainTip,
    pub mempool: Mempool,
    state: Mutex<StateStore>,
    db: Arc<dyn KvStore>,
    vm: Box<dyn BytecodeVm + Send + Sync>,
    gossip: Arc<dyn Gossip>,
}

impl Blockchain {
    pub fn new(
        config: ChainConfig,
        head: ChainHead,
        state: StateStore,
        db: Arc<dyn KvStore>,
        vm: Box<dyn BytecodeVm + Send + Sync>,
        gossip: Arc<dyn Gossip>,
    ) -> Self {
        Blockchain {
            config,
            head: Arc::new(head),
            tip: ChainTip::new(),
            mempool: Mempool::new(),
            state: Mutex::new(state),
            db,
            vm,
            gossip,
        }
    }

    pub fn lock_state(&self) -> Result<MutexGuard<'_, StateStore>, ChainError> {
        self.state.lock().map_err(|_| ChainError::LockError)
    }

    // ── Parse ──────────────────────────────────────────────────────────

    /// Deserializes and fingerprints raw block bytes. Known blocks answer
    /// with their stored status; a block above the chain head enters the
    /// tip as `Processing`, one at or below it is `Rejected`.
    pub fn parse_block(&self, bytes: &[u8]) -> Result<ParsedBlock, ChainError> {
        let block = Block::deserialize(bytes)?;
        let hash = block.compute_hash();

        if block.validator_merkle_root != block.compute_validator_merkle_root() {
            return Err(InvalidBlockError::ValidatorRootMismatch.into());
        }
        if block.recover_proposer().is_err() {
            return Err(InvalidBlockError::BadProposerSignature.into());
        }

        if self.head.exists(&hash)? {
            return Ok(parsed(&block, BlockStatus::Accepted));
        }
        if let Some(status) = self.tip.status(&hash)? {
            return Ok(parsed(&block, status));
        }

        let latest = self.head.latest()?;
        if block.height <= latest.height {
            return Ok(parsed(&block, BlockStatus::Rejected));
        }
        let response = parsed(&block, BlockStatus::Processing);
        self.tip.process(Arc::new(block))?;
        Ok(response)
    }

    // ── Validate ───────────────────────────────────────────────────────

    /// Checks that `block` can extend the chain head: linkage, timestamp,
    /// height, per-transaction validity at the sequencing point, and the
    /// validator-transaction set.
    pub fn validate_block(&self, block: &Block) -> Result<(), ChainError> {
        let latest = self.head.latest()?;
        if block.prev_hash != latest.compute_hash() {
            return Err(InvalidBlockError::ParentMismatch.into());
        }
        if block.timestamp <= latest.timestamp {
            return Err(InvalidBlockError::NonIncreasingTimestamp.into());
        }
        if block.height != latest.height + 1 {
            return Err(InvalidBlockError::WrongHeight {
                parent: latest.height,
                got: block.height,
            }
            .into());
        }

        let proposer = block
            .recover_proposer()
            .map_err(|_| InvalidBlockError::BadProposerSignature)?;
        if !self.config.validators.is_empty() && !self.config.is_validator(&proposer) {
            return Err(InvalidBlockError::UnknownProposer.into());
        }

        let state = self.lock_state()?;
        let mut next_nonces: HashMap<Address, u64> = HashMap::new();
        for tx in &block.transactions {
            let recovered = tx
                .recover_sender()
                .map_err(|_| InvalidTransaction::BadSignature)
                .map_err(InvalidBlockError::from)?;
            if recovered != tx.from {
                return Err(InvalidBlockError::from(InvalidTransaction::BadSignature).into());
            }
            if tx.chain_id != self.config.chain_id {
                return Err(InvalidBlockError::from(InvalidTransaction::ChainIdMismatch {
                    expected: self.config.chain_id,
                })
                .into());
            }
            let expected = *next_nonces
                .entry(tx.from)
                .or_insert_with(|| state.pending_nonce(&tx.from));
            if tx.nonce != expected {
                return Err(InvalidBlockError::from(InvalidTransaction::NonceMismatch {
                    expected,
                    got: tx.nonce,
                })
                .into());
            }
            next_nonces.insert(tx.from, expected + 1);
            if state.pending_balance(&tx.from) < tx.cost() {
                return Err(
                    InvalidBlockError::from(InvalidTransaction::InsufficientFunds).into(),
                );
            }
        }

        let mut slot_holders: HashSet<Address> = HashSet::new();
        for validator_tx in &block.validator_transactions {
            let signer = validator_tx
                .recover_signer()
                .map_err(|_| InvalidBlockError::UnknownValidatorSigner)?;
            if !self.config.validators.is_empty() && !self.config.is_validator(&signer) {
                return Err(InvalidBlockError::UnknownValidatorSigner.into());
            }
            if !slot_holders.insert(signer) {
                return Err(InvalidBlockError::DuplicateValidatorSlot(signer).into());
            }
        }
        Ok(())
    }

    /// Validates block bytes and registers the block as processing.
    pub fn verify_block(&self, bytes: &[u8]) -> Result<BlockHash, ChainError> {
        let block = Block::deserialize(bytes)?;
        self.validate_block(&block)?;
        let hash = block.compute_hash();
        self.tip.process(Arc::new(block))?;
        Ok(hash)
    }

    // ── Accept / Reject ────────────────────────────────────────────────

    /// Accepts a processing block: executes its transactions, promotes the
    /// staged state, migrates the block into the head, persists the event
    /// stream and announces the new best block.
    pub fn accept_block(&self, hash: &BlockHash) -> Result<(), ChainError> {
        let block = self
            .tip
            .get(hash)?
            .ok_or(ChainError::BlockUnknown(*hash))?;
        if !self.tip.is_processing(hash)? {
            return Err(ChainError::NotProcessing(*hash));
        }
        let latest = self.head.latest()?;
        if block.prev_hash != latest.compute_hash() || block.height != latest.height + 1 {
            return Err(InvalidBlockError::ParentMismatch.into());
        }

        let env = BlockEnv {
            number: block.height,
            timestamp: block.timestamp,
            gas_limit: self.config.block_gas_limit,
            coinbase: self.config.coinbase,
            chain_id: self.config.chain_id,
        };
        let mut events: Vec<Event> = Vec::new();
        {
            let mut state = self.lock_state()?;
            for tx in &block.transactions {
                match execute_transaction(
                    &mut state,
                    self.vm.as_ref(),
                    self.head.as_ref(),
                    &env,
                    tx,
                ) {
                    Ok(outcome) => events.extend(outcome.events),
                    // Validation already ran; a transaction that turned
                    // invalid since then is excluded without failing the
                    // block.
                    Err(err) => warn!(tx_hash = %tx.compute_hash(), %err, "transaction excluded"),
                }
            }
            state.commit_all();
        }

        // Ownership moves out of the tip and into the head.
        let block = self.tip.take_processing(hash)?;
        self.head.append(block.clone())?;
        self.db.put(
            hash.as_bytes(),
            &events.encode_to_vec(),
            DbPrefix::Events,
        )?;
        self.mempool
            .remove_mined(&block.transactions, &block.validator_transactions)?;
        self.tip.gc(block.height)?;
        info!(height = block.height, %hash, txs = block.transactions.len(), "block accepted");
        self.gossip.announce_best_block(&block);
        Ok(())
    }

    /// Rejects a tentative block: walks back anything it staged and keeps
    /// the tip entry as `Rejected`.
    pub fn reject_block(&self, hash: &BlockHash) -> Result<(), ChainError> {
        let block = self.tip.reject(hash)?;
        self.lock_state()?.revert_all();
        info!(height = block.height, %hash, "block rejected");
        Ok(())
    }

    // ── Ancestors ──────────────────────────────────────────────────────

    /// Serialized ancestors of `hash`, stepping toward genesis, bounded by
    /// a block count, a byte budget and a wall-clock deadline. A count
    /// above the chain height is clamped silently.
    pub fn get_ancestors(
        &self,
        hash: &BlockHash,
        max_count: u64,
        max_bytes: u64,
        max_nanos: u64,
    ) -> Result<AncestorsResponse, ChainError> {
        let start = self
            .head
            .get_by_hash(hash)?
            .ok_or(ChainError::BlockUnknown(*hash))?;
        let latest = self.head.latest()?;
        let depth = max_count.min(latest.height);

        let started_at = Instant::now();
        let mut response = AncestorsResponse::default();
        let mut total_bytes = 0u64;
        for step in 0..=depth {
            let Some(height) = start.height.checked_sub(step) else {
                break;
            };
            let Some(block) = self.head.get_by_height(height)? else {
                break;
            };
            let bytes = block.serialize();
            let elapsed = started_at.elapsed().as_nanos() as u64;
            if total_bytes + bytes.len() as u64 > max_bytes || elapsed > max_nanos {
                response.truncated = true;
                break;
            }
            total_bytes += bytes.len() as u64;
            response.blocks.push(bytes);
        }
        Ok(response)
    }

    // ── Mempool entry points ───────────────────────────────────────────

    /// Validates and pools a payload transaction, scheduling a gossip
    /// broadcast on first acceptance. A duplicate hash answers
    /// `AlreadyKnown` and is not re-broadcast.
    pub fn add_transaction(&self, tx: Transaction) -> Result<BlockHash, MempoolError> {
        self.validate_transaction(&tx)?;
        let hash = self.mempool.insert(tx.clone())?;
        self.gossip.broadcast_transaction(&tx);
        Ok(hash)
    }

    pub fn add_validator_transaction(
        &self,
        tx: ValidatorTransaction,
    ) -> Result<BlockHash, MempoolError> {
        let signer = tx
            .recover_signer()
            .map_err(|_| MempoolError::BadSignature)?;
        if !self.config.validators.is_empty() && !self.config.is_validator(&signer) {
            return Err(MempoolError::NotAValidator);
        }
        let hash = self.mempool.insert_validator_tx(tx.clone())?;
        self.gossip.broadcast_validator_transaction(&tx);
        Ok(hash)
    }

    /// Per-transaction validation against the staged state: signature,
    /// chain id, nonce at the sequencing point and balance coverage.
    pub fn validate_transaction(&self, tx: &Transaction) -> Result<(), MempoolError> {
        let recovered = tx
            .recover_sender()
            .map_err(|_| MempoolError::BadSignature)?;
        if recovered != tx.from {
            return Err(MempoolError::BadSignature);
        }
        if tx.chain_id != self.config.chain_id {
            return Err(MempoolError::InvalidChainId(self.config.chain_id));
        }
        if tx.gas_limit > self.config.block_gas_limit {
            return Err(MempoolError::TxGasLimitExceeded);
        }
        let state = self.state.lock().map_err(|_| MempoolError::LockError)?;
        let expected = state.pending_nonce(&tx.from);
        if tx.nonce != expected {
            return Err(MempoolError::NonceMismatch {
                expected,
                got: tx.nonce,
            });
        }
        if state.pending_balance(&tx.from) < tx.cost() {
            return Err(MempoolError::NotEnoughBalance);
        }
        Ok(())
    }
}

fn parsed(block: &Block, status: BlockStatus) -> ParsedBlock {
    ParsedBlock {
        id: block.compute_hash(),
        parent_id: block.prev_hash,
        height: block.height,
        timestamp: block.timestamp,
        status,
    }
}
