//! Merkle tree over an ordered transaction sequence.
//!
//! Standard pair-hashing binary tree: leaves are KECCAK-256 of the raw
//! transaction bytes, inner nodes hash the concatenation of their children,
//! and the last leaf of an odd level is paired with itself.

use crate::H256;
use ember_crypto::keccak_hash;

/// KECCAK-256 leaf for a serialized transaction.
pub fn merkle_leaf(data: impl AsRef<[u8]>) -> H256 {
    H256(keccak_hash(data))
}

/// Compute the Merkle root of the given leaves.
pub fn compute_merkle_root(leaves: &[H256]) -> H256 {
    match leaves {
        [] => H256::zero(),
        [single] => *single,
        _ => {
            let mut current_level: Vec<H256> = leaves.to_vec();
            while current_level.len() > 1 {
                current_level = merkle_next_level(&current_level);
            }
            current_level.first().copied().unwrap_or_default()
        }
    }
}

/// Build the next level of the tree. An odd trailing leaf is hashed
/// against a copy of itself.
fn merkle_next_level(current_level: &[H256]) -> Vec<H256> {
    let mut next_level = Vec::with_capacity(current_level.len().div_ceil(2));
    for pair in current_level.chunks(2) {
        match pair {
            [left, right] => next_level.push(hash_pair(left, right)),
            [single] => next_level.push(hash_pair(single, single)),
            _ => {}
        }
    }
    next_level
}

fn hash_pair(a: &H256, b: &H256) -> H256 {
    let mut data = [0u8; 64];
    data[..32].copy_from_slice(a.as_bytes());
    data[32..].copy_from_slice(b.as_bytes());
    H256(keccak_hash(data))
}
