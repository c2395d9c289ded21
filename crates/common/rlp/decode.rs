use bytes::Bytes;
use ethereum_types::{Address, H256, H520, U256};

use super::{
    constants::{MAX_RLP_PAYLOAD, RLP_EMPTY_LIST, RLP_NULL},
    error::RLPDecodeError,
};

pub trait RLPDecode: Sized {
    /// Decodes a value, returning it together with the bytes remaining
    /// after the item.
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError>;

    /// Decodes a value that spans the whole input.
    fn decode(rlp: &[u8]) -> Result<Self, RLPDecodeError> {
        let (decoded, rest) = Self::decode_unfinished(rlp)?;
        if !rest.is_empty() {
            return Err(RLPDecodeError::MalformedData);
        }
        Ok(decoded)
    }
}

/// Decodes an RLP item from a slice of bytes, returning:
/// - whether the item is a list,
/// - the item's payload without its prefix,
/// - the remaining bytes after the item.
pub fn decode_rlp_item(data: &[u8]) -> Result<(bool, &[u8], &[u8]), RLPDecodeError> {
    let (is_list, prefix_len, payload_len) = decode_prefix(data)?;
    let end = prefix_len
        .checked_add(payload_len)
        .ok_or(RLPDecodeError::InvalidLength)?;
    if data.len() < end {
        return Err(RLPDecodeError::InvalidLength);
    }
    Ok((is_list, &data[prefix_len..end], &data[end..]))
}

/// Splits off the first RLP item *including* its prefix, returning it
/// along with the remaining bytes.
pub fn get_item_with_prefix(data: &[u8]) -> Result<(&[u8], &[u8]), RLPDecodeError> {
    let (_, prefix_len, payload_len) = decode_prefix(data)?;
    let end = prefix_len
        .checked_add(payload_len)
        .ok_or(RLPDecodeError::InvalidLength)?;
    if data.len() < end {
        return Err(RLPDecodeError::InvalidLength);
    }
    Ok((&data[..end], &data[end..]))
}

/// Reads an item prefix: (is_list, prefix length, payload length).
fn decode_prefix(data: &[u8]) -> Result<(bool, usize, usize), RLPDecodeError> {
    let first_byte = *data.first().ok_or(RLPDecodeError::InvalidLength)?;
    match first_byte {
        0..=0x7F => Ok((false, 0, 1)),
        0x80..=0xB7 => Ok((false, 1, (first_byte - RLP_NULL) as usize)),
        0xB8..=0xBF => {
            let (prefix_len, payload_len) = decode_long_length(data, first_byte - 0xB7)?;
            Ok((false, prefix_len, payload_len))
        }
        RLP_EMPTY_LIST..=0xF7 => Ok((true, 1, (first_byte - RLP_EMPTY_LIST) as usize)),
        0xF8..=0xFF => {
            let (prefix_len, payload_len) = decode_long_length(data, first_byte - 0xF7)?;
            Ok((true, prefix_len, payload_len))
        }
    }
}

fn decode_long_length(
    data: &[u8],
    length_of_length: u8,
) -> Result<(usize, usize), RLPDecodeError> {
    let length_of_length = length_of_length as usize;
    if data.len() < length_of_length + 1 || length_of_length > size_of::<usize>() {
        return Err(RLPDecodeError::InvalidLength);
    }
    let mut payload_len: usize = 0;
    for byte in &data[1..length_of_length + 1] {
        payload_len = (payload_len << 8) | *byte as usize;
    }
    if payload_len < 56 || payload_len > MAX_RLP_PAYLOAD {
        // Lengths below 56 must use the short form.
        return Err(RLPDecodeError::MalformedData);
    }
    Ok((length_of_length + 1, payload_len))
}

/// Decodes the payload of a byte-string item into an unsigned integer.
fn decode_uint_payload(payload: &[u8]) -> Result<u64, RLPDecodeError> {
    if payload.len() > size_of::<u64>() {
        return Err(RLPDecodeError::InvalidLength);
    }
    if payload.first() == Some(&0) {
        // Leading zeros are forbidden in canonical integer encodings.
        return Err(RLPDecodeError::MalformedData);
    }
    let mut value: u64 = 0;
    for byte in payload {
        value = (value << 8) | *byte as u64;
    }
    Ok(value)
}

fn expect_string(rlp: &[u8]) -> Result<(&[u8], &[u8]), RLPDecodeError> {
    match decode_rlp_item(rlp)? {
        (false, payload, rest) => Ok((payload, rest)),
        (true, _, _) => Err(RLPDecodeError::UnexpectedList),
    }
}

impl RLPDecode for bool {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let first = *rlp.first().ok_or(RLPDecodeError::InvalidLength)?;
        match first {
            RLP_NULL => Ok((false, &rlp[1..])),
            0x01 => Ok((true, &rlp[1..])),
            _ => Err(RLPDecodeError::MalformedBool),
        }
    }
}

macro_rules! impl_decode_for_uint {
    ($t:ty) => {
        impl RLPDecode for $t {
            fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
                let (payload, rest) = expect_string(rlp)?;
                let value = decode_uint_payload(payload)?;
                let value = <$t>::try_from(value).map_err(|_| RLPDecodeError::InvalidLength)?;
                Ok((value, rest))
            }
        }
    };
}

impl_decode_for_uint!(u8);
impl_decode_for_uint!(u16);
impl_decode_for_uint!(u32);
impl_decode_for_uint!(u64);
impl_decode_for_uint!(usize);

impl RLPDecode for U256 {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (payload, rest) = expect_string(rlp)?;
        if payload.len() > 32 {
            return Err(RLPDecodeError::InvalidLength);
        }
        if payload.first() == Some(&0) {
            return Err(RLPDecodeError::MalformedData);
        }
        Ok((U256::from_big_endian(payload), rest))
    }
}

impl RLPDecode for Bytes {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (payload, rest) = expect_string(rlp)?;
        Ok((Bytes::copy_from_slice(payload), rest))
    }
}

impl RLPDecode for String {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (payload, rest) = expect_string(rlp)?;
        let value = String::from_utf8(payload.to_vec())
            .map_err(|_| RLPDecodeError::MalformedData)?;
        Ok((value, rest))
    }
}

impl<const N: usize> RLPDecode for [u8; N] {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (payload, rest) = expect_string(rlp)?;
        let value = payload
            .try_into()
            .map_err(|_| RLPDecodeError::InvalidLength)?;
        Ok((value, rest))
    }
}

impl RLPDecode for Address {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = <[u8; 20]>::decode_unfinished(rlp)?;
        Ok((Address::from(bytes), rest))
    }
}

impl RLPDecode for H256 {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = <[u8; 32]>::decode_unfinished(rlp)?;
        Ok((H256::from(bytes), rest))
    }
}

impl RLPDecode for H520 {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = <[u8; 65]>::decode_unfinished(rlp)?;
        Ok((H520::from(bytes), rest))
    }
}

impl<T: RLPDecode> RLPDecode for Vec<T> {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (is_list, mut payload, rest) = decode_rlp_item(rlp)?;
        if !is_list {
            return Err(RLPDecodeError::UnexpectedString);
        }
        let mut items = Vec::new();
        while !payload.is_empty() {
            let (item, next) = T::decode_unfinished(payload)?;
            items.push(item);
            payload = next;
        }
        Ok((items, rest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::encode;

    #[test]
    fn decode_integers() {
        assert_eq!(u64::decode(&[0x80]).unwrap(), 0);
        assert_eq!(u64::decode(&[0x07]).unwrap(), 7);
        assert_eq!(u64::decode(&[0x82, 0x04, 0x00]).unwrap(), 1024);
        assert!(u8::decode(&[0x82, 0x04, 0x00]).is_err());
    }

    #[test]
    fn decode_rejects_leading_zeros() {
        assert!(u64::decode(&[0x82, 0x00, 0x04]).is_err());
        assert!(U256::decode(&[0x82, 0x00, 0x04]).is_err());
    }

    #[test]
    fn decode_rejects_trailing_bytes() {
        assert!(u64::decode(&[0x01, 0x02]).is_err());
        assert_eq!(u64::decode_unfinished(&[0x01, 0x02]).unwrap(), (1, &[0x02][..]));
    }

    #[test]
    fn decode_byte_strings() {
        assert_eq!(Bytes::decode(&[0x80]).unwrap(), Bytes::new());
        assert_eq!(
            Bytes::decode(&[0x83, b'd', b'o', b'g']).unwrap(),
            Bytes::from_static(b"dog")
        );
        let long = vec![0x33u8; 80];
        let roundtrip = Bytes::decode(&encode(long.as_slice())).unwrap();
        assert_eq!(roundtrip, long.as_slice());
    }

    #[test]
    fn decode_rejects_non_canonical_long_form() {
        // "dog" encoded with a long-form prefix must be refused.
        assert!(Bytes::decode(&[0xb8, 0x03, b'd', b'o', b'g']).is_err());
    }

    #[test]
    fn decode_list_of_strings() {
        let encoded = [0xc8, 0x83, b'c', b'a', b't', 0x83, b'd', b'o', b'g'];
        let decoded = Vec::<String>::decode(&encoded).unwrap();
        assert_eq!(decoded, vec!["cat".to_string(), "dog".to_string()]);
    }

    #[test]
    fn hash_roundtrip() {
        let hash = H256::repeat_byte(0xab);
        let encoded = encode(hash);
        assert_eq!(H256::decode(&encoded).unwrap(), hash);
    }
}
