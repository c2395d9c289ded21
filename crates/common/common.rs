// Keep H256, H160, Address, Signature from ethereum_types
pub use ethereum_types::{Address, H160, H256, H520, Signature, U256};

pub use bytes::Bytes;

pub mod constants;
pub mod merkle_tree;
pub mod types;
