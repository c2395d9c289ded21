use bytes::BufMut;

use super::{
    decode::{RLPDecode, decode_rlp_item, get_item_with_prefix},
    encode::{RLPEncode, encode_length},
    error::RLPDecodeError,
};

/// # Struct decoding helper
///
/// Decodes a struct encoded as an RLP list, field by field, in the order
/// the fields are passed to [`Decoder::decode_field`].
#[derive(Debug)]
#[must_use = "`Decoder` must be consumed with `finish` to perform decoding checks"]
pub struct Decoder<'a> {
    payload: &'a [u8],
    remaining: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Result<Self, RLPDecodeError> {
        match decode_rlp_item(buf)? {
            (true, payload, remaining) => Ok(Self { payload, remaining }),
            (false, _, _) => Err(RLPDecodeError::UnexpectedString),
        }
    }

    pub fn decode_field<T: RLPDecode>(self, name: &str) -> Result<(T, Self), RLPDecodeError> {
        let (field, rest) = <T as RLPDecode>::decode_unfinished(self.payload)
            .map_err(|err| err.with_context(name))?;
        Ok((
            field,
            Self {
                payload: rest,
                ..self
            },
        ))
    }

    /// Returns the next field without decoding it, prefix included.
    pub fn get_encoded_item(self) -> Result<(Vec<u8>, Self), RLPDecodeError> {
        let (field, rest) = get_item_with_prefix(self.payload)?;
        Ok((
            field.to_vec(),
            Self {
                payload: rest,
                ..self
            },
        ))
    }

    /// Finishes decoding the list and returns the bytes after it.
    /// Fails if any unconsumed field payload remains.
    pub const fn finish(self) -> Result<&'a [u8], RLPDecodeError> {
        if self.payload.is_empty() {
            Ok(self.remaining)
        } else {
            Err(RLPDecodeError::MalformedData)
        }
    }
}

/// # Struct encoding helper
///
/// Encodes a struct as an RLP list, buffering fields until [`Encoder::finish`]
/// writes the prefixed result.
pub struct Encoder<'a> {
    buf: &'a mut dyn BufMut,
    temp_buf: Vec<u8>,
}

impl<'a> Encoder<'a> {
    pub fn new(buf: &'a mut dyn BufMut) -> Self {
        Self {
            buf,
            temp_buf: Vec::new(),
        }
    }

    pub fn encode_field<T: RLPEncode>(mut self, value: &T) -> Self {
        <T as RLPEncode>::encode(value, &mut self.temp_buf);
        self
    }

    /// Appends an already-encoded item as-is.
    pub fn encode_raw(mut self, value: &[u8]) -> Self {
        self.temp_buf.put_slice(value);
        self
    }

    pub fn finish(self) {
        encode_length(self.temp_buf.len(), self.buf);
        self.buf.put_slice(&self.temp_buf);
    }
}
