pub mod ecdsa;
pub mod keccak;

pub use ecdsa::{CryptoError, address_from_secret, recover_signer, sign_recoverable};
pub use keccak::keccak_hash;
