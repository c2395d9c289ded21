use bytes::{BufMut, Bytes};
use ethereum_types::{Address, H256, H520, U256};

use super::constants::RLP_NULL;

/// Function for encoding a value to RLP.
/// For encoding the value into an existing buffer, use [`RLPEncode::encode`].
pub fn encode<T: RLPEncode>(value: T) -> Vec<u8> {
    let mut buf = Vec::new();
    value.encode(&mut buf);
    buf
}

pub trait RLPEncode {
    fn encode(&self, buf: &mut dyn BufMut);

    fn encode_to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        buf
    }
}

/// Writes the prefix for a payload of the given length.
/// The payload itself must be appended by the caller.
pub fn encode_length(total_len: usize, buf: &mut dyn BufMut) {
    if total_len < 56 {
        buf.put_u8(0xc0 + total_len as u8);
    } else {
        let be = to_be_trimmed(total_len as u64);
        buf.put_u8(0xf7 + be.len() as u8);
        buf.put_slice(&be);
    }
}

/// Encodes a byte string: single bytes below 0x80 stand for themselves,
/// everything else gets a length prefix.
pub fn encode_bytes(bytes: &[u8], buf: &mut dyn BufMut) {
    if bytes.len() == 1 && bytes[0] < RLP_NULL {
        buf.put_u8(bytes[0]);
    } else if bytes.len() < 56 {
        buf.put_u8(RLP_NULL + bytes.len() as u8);
        buf.put_slice(bytes);
    } else {
        let be = to_be_trimmed(bytes.len() as u64);
        buf.put_u8(0xb7 + be.len() as u8);
        buf.put_slice(&be);
        buf.put_slice(bytes);
    }
}

/// Big-endian representation without leading zero bytes. Empty for zero.
fn to_be_trimmed(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    bytes[skip..].to_vec()
}

impl RLPEncode for bool {
    fn encode(&self, buf: &mut dyn BufMut) {
        if *self {
            buf.put_u8(0x01);
        } else {
            buf.put_u8(RLP_NULL);
        }
    }
}

macro_rules! impl_encode_for_uint {
    ($t:ty) => {
        impl RLPEncode for $t {
            fn encode(&self, buf: &mut dyn BufMut) {
                encode_bytes(&to_be_trimmed(*self as u64), buf);
            }
        }
    };
}

impl_encode_for_uint!(u8);
impl_encode_for_uint!(u16);
impl_encode_for_uint!(u32);
impl_encode_for_uint!(u64);
impl_encode_for_uint!(usize);

impl RLPEncode for U256 {
    fn encode(&self, buf: &mut dyn BufMut) {
        let be = self.to_big_endian();
        let skip = be.iter().take_while(|b| **b == 0).count();
        encode_bytes(&be[skip..], buf);
    }
}

impl RLPEncode for [u8] {
    fn encode(&self, buf: &mut dyn BufMut) {
        encode_bytes(self, buf);
    }
}

impl<const N: usize> RLPEncode for [u8; N] {
    fn encode(&self, buf: &mut dyn BufMut) {
        encode_bytes(self, buf);
    }
}

impl RLPEncode for Bytes {
    fn encode(&self, buf: &mut dyn BufMut) {
        encode_bytes(self, buf);
    }
}

impl RLPEncode for str {
    fn encode(&self, buf: &mut dyn BufMut) {
        encode_bytes(self.as_bytes(), buf);
    }
}

impl RLPEncode for String {
    fn encode(&self, buf: &mut dyn BufMut) {
        encode_bytes(self.as_bytes(), buf);
    }
}

impl RLPEncode for Address {
    fn encode(&self, buf: &mut dyn BufMut) {
        encode_bytes(self.as_bytes(), buf);
    }
}

impl RLPEncode for H256 {
    fn encode(&self, buf: &mut dyn BufMut) {
        encode_bytes(self.as_bytes(), buf);
    }
}

impl RLPEncode for H520 {
    fn encode(&self, buf: &mut dyn BufMut) {
        encode_bytes(self.as_bytes(), buf);
    }
}

impl<T: RLPEncode + ?Sized> RLPEncode for &T {
    fn encode(&self, buf: &mut dyn BufMut) {
        (*self).encode(buf);
    }
}

/// Lists are encoded as the concatenation of the encodings of their items,
/// wrapped in a list prefix.
impl<T: RLPEncode> RLPEncode for Vec<T> {
    fn encode(&self, buf: &mut dyn BufMut) {
        let mut payload = Vec::new();
        for item in self {
            item.encode(&mut payload);
        }
        encode_length(payload.len(), buf);
        buf.put_slice(&payload);
    }
}
