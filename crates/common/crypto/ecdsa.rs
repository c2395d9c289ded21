use ethereum_types::Address;
use thiserror::Error;

use crate::keccak::keccak_hash;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Invalid recovery id")]
    InvalidRecoveryId,
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Invalid secret key")]
    InvalidSecretKey,
    #[error("Public key recovery failed")]
    RecoveryFailed,
}

/// Recovers the signing address from a 65-byte signature (r || s || recid)
/// over a 32-byte message digest.
pub fn recover_signer(sig: &[u8; 65], msg: &[u8; 32]) -> Result<Address, CryptoError> {
    // EIP-2: reject high-s signatures (s > secp256k1n/2)
    const SECP256K1_N_HALF: [u8; 32] =
        hex_literal::hex!("7fffffffffffffffffffffffffffffff5d576e7357a4501ddfe92f46681b20a0");
    if sig[32..64] > SECP256K1_N_HALF[..] {
        return Err(CryptoError::InvalidSignature);
    }

    let recovery_id = secp256k1::ecdsa::RecoveryId::from_i32(sig[64] as i32)
        .map_err(|_| CryptoError::InvalidRecoveryId)?;

    let recoverable_sig = secp256k1::ecdsa::RecoverableSignature::from_compact(
        &sig[..64],
        recovery_id,
    )
    .map_err(|_| CryptoError::InvalidSignature)?;

    let message = secp256k1::Message::from_digest(*msg);

    let public_key = secp256k1::SECP256K1
        .recover_ecdsa(&message, &recoverable_sig)
        .map_err(|_| CryptoError::RecoveryFailed)?;

    let hash = keccak_hash(&public_key.serialize_uncompressed()[1..]);
    Ok(Address::from_slice(&hash[12..]))
}

/// Signs a 32-byte digest with the given secret key, returning a 65-byte
/// signature (r || s || recid).
pub fn sign_recoverable(msg: &[u8; 32], secret: &[u8; 32]) -> Result<[u8; 65], CryptoError> {
    let secret_key =
        secp256k1::SecretKey::from_slice(secret).map_err(|_| CryptoError::InvalidSecretKey)?;
    let message = secp256k1::Message::from_digest(*msg);

    let signature = secp256k1::SECP256K1.sign_ecdsa_recoverable(&message, &secret_key);
    let (recovery_id, compact) = signature.serialize_compact();

    let mut out = [0u8; 65];
    out[..64].copy_from_slice(&compact);
    out[64] = recovery_id.to_i32() as u8;
    Ok(out)
}

/// The address whose private key is `secret`.
pub fn address_from_secret(secret: &[u8; 32]) -> Result<Address, CryptoError> {
    let secret_key =
        secp256k1::SecretKey::from_slice(secret).map_err(|_| CryptoError::InvalidSecretKey)?;
    let public_key = secret_key.public_key(secp256k1::SECP256K1);
    let hash = keccak_hash(&public_key.serialize_uncompressed()[1..]);
    Ok(Address::from_slice(&hash[12..]))
}
