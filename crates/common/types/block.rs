use ethereum_types::{Address, H256, Signature};

use ember_crypto::{CryptoError, keccak_hash, recover_signer, sign_recoverable};
use ember_rlp::{decode::RLPDecode, encode::RLPEncode, error::RLPDecodeError};

use crate::{
    constants::SIGNATURE_SIZE,
    merkle_tree::{compute_merkle_root, merkle_leaf},
    types::{Transaction, ValidatorTransaction},
};

pub type BlockNumber = u64;
pub type BlockHash = H256;

/// One block of the chain.
///
/// Wire format (all integers big-endian):
/// `prevHash(32) || timestamp(8, ns) || height(8) || validatorMerkleRoot(32)
///  || signature(65) || varint(txCount) || txs || varint(vTxCount) || vTxs`.
/// The unsigned form omits the signature and is the preimage of the
/// block hash used for signing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Block {
    pub prev_hash: H256,
    /// Unix timestamp in nanoseconds.
    pub timestamp: u64,
    pub height: BlockNumber,
    pub validator_merkle_root: H256,
    pub signature: Signature,
    pub transactions: Vec<Transaction>,
    pub validator_transactions: Vec<ValidatorTransaction>,
}

impl Block {
    pub fn new(prev_hash: H256, timestamp: u64, height: BlockNumber) -> Self {
        Block {
            prev_hash,
            timestamp,
            height,
            ..Default::default()
        }
    }

    /// Serializes the signed wire form.
    pub fn serialize(&self) -> Vec<u8> {
        self.serialize_inner(true)
    }

    /// Serializes the unsigned form (the block-hash preimage).
    pub fn serialize_unsigned(&self) -> Vec<u8> {
        self.serialize_inner(false)
    }

    fn serialize_inner(&self, include_signature: bool) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(self.prev_hash.as_bytes());
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.extend_from_slice(&self.height.to_be_bytes());
        buf.extend_from_slice(self.validator_merkle_root.as_bytes());
        if include_signature {
            buf.extend_from_slice(self.signature.as_bytes());
        }
        encode_varint(self.transactions.len() as u64, &mut buf);
        for tx in &self.transactions {
            tx.encode(&mut buf);
        }
        encode_varint(self.validator_transactions.len() as u64, &mut buf);
        for tx in &self.validator_transactions {
            tx.encode(&mut buf);
        }
        buf
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, RLPDecodeError> {
        const FIXED: usize = 32 + 8 + 8 + 32 + SIGNATURE_SIZE;
        if bytes.len() < FIXED {
            return Err(RLPDecodeError::InvalidLength);
        }
        let prev_hash = H256::from_slice(&bytes[..32]);
        let timestamp = u64::from_be_bytes(
            bytes[32..40]
                .try_into()
                .map_err(|_| RLPDecodeError::InvalidLength)?,
        );
        let height = u64::from_be_bytes(
            bytes[40..48]
                .try_into()
                .map_err(|_| RLPDecodeError::InvalidLength)?,
        );
        let validator_merkle_root = H256::from_slice(&bytes[48..80]);
        let signature = Signature::from_slice(&bytes[80..80 + SIGNATURE_SIZE]);

        let mut rest = &bytes[FIXED..];
        let (tx_count, mut rest) = decode_varint(rest)?;
        let mut transactions = Vec::new();
        for _ in 0..tx_count {
            let (tx, next) = Transaction::decode_unfinished(rest)?;
            transactions.push(tx);
            rest = next;
        }
        let (validator_count, mut rest) = decode_varint(rest)?;
        let mut validator_transactions = Vec::new();
        for _ in 0..validator_count {
            let (tx, next) = ValidatorTransaction::decode_unfinished(rest)?;
            validator_transactions.push(tx);
            rest = next;
        }
        if !rest.is_empty() {
            return Err(RLPDecodeError::MalformedData);
        }

        Ok(Block {
            prev_hash,
            timestamp,
            height,
            validator_merkle_root,
            signature,
            transactions,
            validator_transactions,
        })
    }

    /// KECCAK-256 of the signed serialization; the block's identity.
    pub fn compute_hash(&self) -> BlockHash {
        H256(keccak_hash(self.serialize()))
    }

    /// KECCAK-256 of the unsigned serialization; the digest the proposer signs.
    pub fn unsigned_hash(&self) -> H256 {
        H256(keccak_hash(self.serialize_unsigned()))
    }

    /// Recomputes the validator Merkle root over the current validator
    /// transactions.
    pub fn compute_validator_merkle_root(&self) -> H256 {
        let leaves: Vec<H256> = self
            .validator_transactions
            .iter()
            .map(|tx| merkle_leaf(tx.encode_to_vec()))
            .collect();
        compute_merkle_root(&leaves)
    }

    /// Seals the block: fixes the validator Merkle root and signs the
    /// unsigned hash with the proposer key.
    pub fn finalize(&mut self, secret: &[u8; 32]) -> Result<(), CryptoError> {
        self.validator_merkle_root = self.compute_validator_merkle_root();
        let sig = sign_recoverable(&self.unsigned_hash().0, secret)?;
        self.signature = Signature::from_slice(&sig);
        Ok(())
    }

    /// Recovers the proposer address from the block signature.
    pub fn recover_proposer(&self) -> Result<Address, CryptoError> {
        let sig: [u8; 65] = self.signature.to_fixed_bytes();
        recover_signer(&sig, &self.unsigned_hash().0)
    }
}

/// Unsigned LEB128.
pub fn encode_varint(mut value: u64, buf: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

/// Unsigned LEB128, at most ten bytes.
pub fn decode_varint(data: &[u8]) -> Result<(u64, &[u8]), RLPDecodeError> {
    let mut value: u64 = 0;
    for (i, byte) in data.iter().take(10).enumerate() {
        value |= ((byte & 0x7f) as u64) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, &data[i + 1..]));
        }
    }
    Err(RLPDecodeError::MalformedData)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use ethereum_types::U256;

    const PROPOSER_KEY: [u8; 32] = [0x42; 32];

    fn sample_block() -> Block {
        let mut tx = Transaction {
            to: Address::from_low_u64_be(1),
            chain_id: 8848,
            nonce: 0,
            value: U256::from(10),
            max_gas: 21000,
            max_fee: 1,
            gas_limit: 21000,
            ..Default::default()
        };
        tx.sign(&[0x99; 32]).unwrap();

        let mut vtx = ValidatorTransaction {
            data: Bytes::from_static(b"seed"),
            chain_id: 8848,
            ..Default::default()
        };
        vtx.sign(&PROPOSER_KEY).unwrap();

        let mut block = Block::new(H256::repeat_byte(0x11), 1_656_356_645_000_000_000, 1);
        block.transactions.push(tx);
        block.validator_transactions.push(vtx);
        block.finalize(&PROPOSER_KEY).unwrap();
        block
    }

    #[test]
    fn serialize_roundtrip() {
        let block = sample_block();
        let bytes = block.serialize();
        let decoded = Block::deserialize(&bytes).unwrap();
        assert_eq!(decoded, block);
        assert_eq!(decoded.serialize(), bytes);
    }

    #[test]
    fn genesis_hash_is_deterministic() {
        let mut genesis = Block::new(H256::zero(), 1_656_356_645_000_000_000, 0);
        genesis.finalize(&PROPOSER_KEY).unwrap();
        let mut again = Block::new(H256::zero(), 1_656_356_645_000_000_000, 0);
        again.finalize(&PROPOSER_KEY).unwrap();
        assert_eq!(genesis.compute_hash(), again.compute_hash());
    }

    #[test]
    fn unsigned_hash_ignores_signature() {
        let mut block = sample_block();
        let unsigned = block.unsigned_hash();
        let signed = block.compute_hash();
        block.signature = Signature::from_slice(&[0xab; 65]);
        assert_eq!(block.unsigned_hash(), unsigned);
        assert_ne!(block.compute_hash(), signed);
    }

    #[test]
    fn proposer_recovery() {
        let block = sample_block();
        assert_eq!(
            block.recover_proposer().unwrap(),
            ember_crypto::address_from_secret(&PROPOSER_KEY).unwrap()
        );
    }

    #[test]
    fn merkle_root_matches_validator_transactions() {
        let mut block = sample_block();
        assert_eq!(
            block.validator_merkle_root,
            block.compute_validator_merkle_root()
        );
        block.validator_transactions[0].nonce = 99;
        assert_ne!(
            block.validator_merkle_root,
            block.compute_validator_merkle_root()
        );
    }

    #[test]
    fn varint_roundtrip() {
        for value in [0u64, 1, 0x7f, 0x80, 0x3fff, 0x4000, u64::MAX] {
            let mut buf = Vec::new();
            encode_varint(value, &mut buf);
            let (decoded, rest) = decode_varint(&buf).unwrap();
            assert_eq!(decoded, value);
            assert!(rest.is_empty());
        }
    }

    #[test]
    fn deserialize_rejects_truncated_input() {
        let block = sample_block();
        let bytes = block.serialize();
        assert!(Block::deserialize(&bytes[..100]).is_err());
    }
}
