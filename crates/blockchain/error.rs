use ethereum_types::H256;

use ember_rlp::error::RLPDecodeError;
use ember_storage::StoreError;
use ember_vm::errors::InvalidTransaction;
use ember_vm::state::StateError;

/// Why a candidate block cannot extend the chain.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InvalidBlockError {
    #[error("Parent hash does not match the chain head")]
    ParentMismatch,
    #[error("Timestamp is not greater than the parent's")]
    NonIncreasingTimestamp,
    #[error("Height {got} does not follow parent height {parent}")]
    WrongHeight { parent: u64, got: u64 },
    #[error("Validator Merkle root does not match the validator transactions")]
    ValidatorRootMismatch,
    #[error("Invalid proposer signature")]
    BadProposerSignature,
    #[error("Proposer is not part of the validator set")]
    UnknownProposer,
    #[error("Validator transaction signed by a non-validator")]
    UnknownValidatorSigner,
    #[error("Validator {0:#x} contributed more than one slot")]
    DuplicateValidatorSlot(ethereum_types::Address),
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(#[from] InvalidTransaction),
}

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("Invalid Block: {0}")]
    InvalidBlock(#[from] InvalidBlockError),
    #[error("Block {0:#x} is not known")]
    BlockUnknown(H256),
    #[error("Block {0:#x} is not in processing state")]
    NotProcessing(H256),
    #[error("Failed to acquire chain lock")]
    LockError,
    #[error("DB error: {0}")]
    StoreError(#[from] StoreError),
    #[error("Mempool error: {0}")]
    Mempool(#[from] MempoolError),
    #[error("RLP decode error: {0}")]
    RLPDecodeError(#[from] RLPDecodeError),
    #[error("{0}")]
    Custom(String),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MempoolError {
    #[error("Transaction already known")]
    AlreadyKnown,
    #[error("Invalid signature")]
    BadSignature,
    #[error("Transaction chain id mismatch, expected chain id: {0}")]
    InvalidChainId(u64),
    #[error("Transaction nonce {got} does not match account nonce {expected}")]
    NonceMismatch { expected: u64, got: u64 },
    #[error("Account does not have enough balance to cover the tx cost")]
    NotEnoughBalance,
    #[error("Transaction gas limit exceeds the block gas limit")]
    TxGasLimitExceeded,
    #[error("Validator transaction signed by a non-validator")]
    NotAValidator,
    #[error("Failed to acquire mempool lock")]
    LockError,
}

/// Errors surfaced through the consensus-engine hooks.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("Node already initialized")]
    AlreadyInitialized,
    #[error("Node is not initialized")]
    NotInitialized,
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Mempool(#[from] MempoolError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Failed to acquire node lock")]
    LockError,
}
