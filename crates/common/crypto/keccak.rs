use tiny_keccak::{Hasher, Keccak};

/// KECCAK-256 digest of the given bytes.
pub fn keccak_hash(data: impl AsRef<[u8]>) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(data.as_ref());
    let mut output = [0u8; 32];
    hasher.finalize(&mut output);
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn empty_input() {
        assert_eq!(
            keccak_hash([]),
            hex!("c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470")
        );
    }

    #[test]
    fn known_vector() {
        assert_eq!(
            keccak_hash(b"abc"),
            hex!("4e03657aea45a94fc7d47ba826c8d667c0d1e6e33a64a036ec44f58fa12d6c45")
        );
    }
}
