use bytes::Bytes;
use ethereum_types::{Address, H256, U256};

use ember_crypto::{CryptoError, keccak_hash, recover_signer, sign_recoverable};
use ember_rlp::{
    decode::RLPDecode,
    encode::RLPEncode,
    error::RLPDecodeError,
    structs::{Decoder, Encoder},
};

/// A payload transaction.
///
/// Wire format is a single RLP list:
/// `[to, from, data, chainId, nonce, value, maxGas, maxFee, gasLimit, r, s, v]`.
/// The transaction hash covers the signed form; the signature covers the
/// unsigned form (the same list without `r`, `s`, `v`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Transaction {
    pub to: Address,
    pub from: Address,
    pub data: Bytes,
    pub chain_id: u64,
    pub nonce: u64,
    pub value: U256,
    pub max_gas: u64,
    pub max_fee: u64,
    pub gas_limit: u64,
    pub r: U256,
    pub s: U256,
    pub v: u64,
}

impl Transaction {
    /// A transaction whose recipient is the zero address deploys a contract.
    pub fn is_contract_creation(&self) -> bool {
        self.to == Address::zero()
    }

    /// The price paid per unit of gas.
    pub fn gas_price(&self) -> u64 {
        self.max_fee
    }

    /// Total funds the sender must hold: value plus the full gas pre-charge.
    pub fn cost(&self) -> U256 {
        self.value + U256::from(self.gas_limit) * U256::from(self.gas_price())
    }

    pub fn compute_hash(&self) -> H256 {
        H256(keccak_hash(self.encode_to_vec()))
    }

    /// Hash of the unsigned form, the digest the signature commits to.
    pub fn unsigned_hash(&self) -> H256 {
        let mut buf = Vec::new();
        self.unsigned_encoder(&mut buf).finish();
        H256(keccak_hash(buf))
    }

    /// Recovers the signing address from the signature fields.
    pub fn recover_sender(&self) -> Result<Address, CryptoError> {
        recover_signer(&self.signature_bytes()?, &self.unsigned_hash().0)
    }

    /// Signs the transaction in place and fills `from` with the key's address.
    pub fn sign(&mut self, secret: &[u8; 32]) -> Result<(), CryptoError> {
        self.from = ember_crypto::address_from_secret(secret)?;
        let sig = sign_recoverable(&self.unsigned_hash().0, secret)?;
        self.r = U256::from_big_endian(&sig[..32]);
        self.s = U256::from_big_endian(&sig[32..64]);
        self.v = sig[64] as u64;
        Ok(())
    }

    fn signature_bytes(&self) -> Result<[u8; 65], CryptoError> {
        signature_from_parts(self.r, self.s, self.v)
    }

    fn unsigned_encoder<'a>(&self, buf: &'a mut Vec<u8>) -> Encoder<'a> {
        Encoder::new(buf)
            .encode_field(&self.to)
            .encode_field(&self.from)
            .encode_field(&self.data)
            .encode_field(&self.chain_id)
            .encode_field(&self.nonce)
            .encode_field(&self.value)
            .encode_field(&self.max_gas)
            .encode_field(&self.max_fee)
            .encode_field(&self.gas_limit)
    }
}

impl RLPEncode for Transaction {
    fn encode(&self, buf: &mut dyn bytes::BufMut) {
        let mut payload = Vec::new();
        self.unsigned_encoder(&mut payload)
            .encode_field(&self.r)
            .encode_field(&self.s)
            .encode_field(&self.v)
            .finish();
        buf.put_slice(&payload);
    }
}

impl RLPDecode for Transaction {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (to, decoder) = decoder.decode_field("to")?;
        let (from, decoder) = decoder.decode_field("from")?;
        let (data, decoder) = decoder.decode_field("data")?;
        let (chain_id, decoder) = decoder.decode_field("chain_id")?;
        let (nonce, decoder) = decoder.decode_field("nonce")?;
        let (value, decoder) = decoder.decode_field("value")?;
        let (max_gas, decoder) = decoder.decode_field("max_gas")?;
        let (max_fee, decoder) = decoder.decode_field("max_fee")?;
        let (gas_limit, decoder) = decoder.decode_field("gas_limit")?;
        let (r, decoder) = decoder.decode_field("r")?;
        let (s, decoder) = decoder.decode_field("s")?;
        let (v, decoder) = decoder.decode_field("v")?;
        let rest = decoder.finish()?;
        let tx = Transaction {
            to,
            from,
            data,
            chain_id,
            nonce,
            value,
            max_gas,
            max_fee,
            gas_limit,
            r,
            s,
            v,
        };
        Ok((tx, rest))
    }
}

/// A validator transaction: consensus-side payload signed by a member of
/// the current validator set. Wire format is
/// `[data, chainId, nonce, r, s, v]`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidatorTransaction {
    pub data: Bytes,
    pub chain_id: u64,
    pub nonce: u64,
    pub r: U256,
    pub s: U256,
    pub v: u64,
}

impl ValidatorTransaction {
    pub fn compute_hash(&self) -> H256 {
        H256(keccak_hash(self.encode_to_vec()))
    }

    pub fn unsigned_hash(&self) -> H256 {
        let mut buf = Vec::new();
        Encoder::new(&mut buf)
            .encode_field(&self.data)
            .encode_field(&self.chain_id)
            .encode_field(&self.nonce)
            .finish();
        H256(keccak_hash(buf))
    }

    pub fn recover_signer(&self) -> Result<Address, CryptoError> {
        let sig = signature_from_parts(self.r, self.s, self.v)?;
        recover_signer(&sig, &self.unsigned_hash().0)
    }

    pub fn sign(&mut self, secret: &[u8; 32]) -> Result<(), CryptoError> {
        let sig = sign_recoverable(&self.unsigned_hash().0, secret)?;
        self.r = U256::from_big_endian(&sig[..32]);
        self.s = U256::from_big_endian(&sig[32..64]);
        self.v = sig[64] as u64;
        Ok(())
    }
}

impl RLPEncode for ValidatorTransaction {
    fn encode(&self, buf: &mut dyn bytes::BufMut) {
        Encoder::new(buf)
            .encode_field(&self.data)
            .encode_field(&self.chain_id)
            .encode_field(&self.nonce)
            .encode_field(&self.r)
            .encode_field(&self.s)
            .encode_field(&self.v)
            .finish();
    }
}

impl RLPDecode for ValidatorTransaction {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (data, decoder) = decoder.decode_field("data")?;
        let (chain_id, decoder) = decoder.decode_field("chain_id")?;
        let (nonce, decoder) = decoder.decode_field("nonce")?;
        let (r, decoder) = decoder.decode_field("r")?;
        let (s, decoder) = decoder.decode_field("s")?;
        let (v, decoder) = decoder.decode_field("v")?;
        let rest = decoder.finish()?;
        let tx = ValidatorTransaction {
            data,
            chain_id,
            nonce,
            r,
            s,
            v,
        };
        Ok((tx, rest))
    }
}

fn signature_from_parts(r: U256, s: U256, v: u64) -> Result<[u8; 65], CryptoError> {
    let mut sig = [0u8; 65];
    sig[..32].copy_from_slice(&r.to_big_endian());
    sig[32..64].copy_from_slice(&s.to_big_endian());
    sig[64] = u8::try_from(v).map_err(|_| CryptoError::InvalidRecoveryId)?;
    Ok(sig)
}
