use thiserror::Error;

/// Faults raised while executing a transaction. These never cross the VM
/// boundary; the host translates them into a frame revert.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VmError {
    #[error("Execution reverted")]
    Revert,
    #[error("Execution ran out of gas")]
    OutOfGas,
    #[error("Internal host fault")]
    HostFault,
    #[error("Self destruct is not supported")]
    SelfDestructUnsupported,
    #[error("Unknown native call selector")]
    UnknownSelector,
    #[error("{0}")]
    Custom(String),
}

/// Reasons a transaction is excluded from a block before execution.
/// Unlike [`VmError`], these do not consume a block slot.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidTransaction {
    #[error("Invalid signature")]
    BadSignature,
    #[error("Transaction nonce {got} does not match account nonce {expected}")]
    NonceMismatch { expected: u64, got: u64 },
    #[error("Sender cannot cover the gas pre-charge")]
    InsufficientFunds,
    #[error("Transaction chain id mismatch, expected {expected}")]
    ChainIdMismatch { expected: u64 },
    #[error("Gas limit below the intrinsic transaction cost")]
    IntrinsicGasTooLow,
}
