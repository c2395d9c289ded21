use ethereum_types::{Address, H256};

/// Logical namespaces inside the key-value store. Every key is stored
/// under a 4-byte ASCII tag; `read_batch` returns keys with the tag
/// stripped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DbPrefix {
    /// `<addr>` -> contract code bytes.
    AccountCode,
    /// `<addr>` -> 32-byte code hash.
    AccountCodeHash,
    /// `<addr || key32>` -> 32-byte storage value.
    AccountStorage,
    /// `<addr>` -> 32-byte big-endian balance.
    AccountBalance,
    /// `<addr>` -> 8-byte big-endian nonce.
    AccountNonce,
    /// `<txHash>` -> deployed contract address.
    ContractAddresses,
    /// Host bookkeeping; holds the `latest` snapshot-height marker.
    EvmHost,
    /// `<blockHash>` -> serialized accepted block.
    Blocks,
    /// `<height 8 BE>` -> block hash.
    BlockHeights,
    /// `<blockHash>` -> RLP event stream of the block.
    Events,
}

impl DbPrefix {
    pub const fn tag(&self) -> [u8; 4] {
        match self {
            DbPrefix::AccountCode => *b"acod",
            DbPrefix::AccountCodeHash => *b"ahsh",
            DbPrefix::AccountStorage => *b"astg",
            DbPrefix::AccountBalance => *b"abal",
            DbPrefix::AccountNonce => *b"annc",
            DbPrefix::ContractAddresses => *b"cadr",
            DbPrefix::EvmHost => *b"evmh",
            DbPrefix::Blocks => *b"blks",
            DbPrefix::BlockHeights => *b"bhgt",
            DbPrefix::Events => *b"evts",
        }
    }
}

/// Key of the latest-snapshot-height marker, under [`DbPrefix::EvmHost`].
pub const LATEST_HEIGHT_KEY: &[u8] = b"latest";

/// Storage-slot key: `addr || slot`.
pub fn account_storage_key(address: &Address, slot: &H256) -> Vec<u8> {
    let mut key = Vec::with_capacity(52);
    key.extend_from_slice(address.as_bytes());
    key.extend_from_slice(slot.as_bytes());
    key
}

/// Splits an `addr || slot` key back into its parts.
pub fn split_account_storage_key(key: &[u8]) -> Option<(Address, H256)> {
    if key.len() != 52 {
        return None;
    }
    Some((
        Address::from_slice(&key[..20]),
        H256::from_slice(&key[20..]),
    ))
}
