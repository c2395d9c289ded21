use ethereum_types::H256;
use hex_literal::hex;

/// Base cost charged for any transaction.
pub const TX_GAS_COST: u64 = 21000;

/// KECCAK-256 of the empty byte string; the code hash of accounts
/// without code.
pub const EMPTY_KECCAK_HASH: H256 = H256(hex!(
    "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
));

/// Length of a serialized ECDSA signature (r || s || recid).
pub const SIGNATURE_SIZE: usize = 65;
