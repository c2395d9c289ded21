use bytes::Bytes;
use ethereum_types::{Address, H256};

use ember_rlp::{
    decode::RLPDecode,
    encode::RLPEncode,
    error::RLPDecodeError,
    structs::{Decoder, Encoder},
};

/// An event emitted by contract execution (a log entry).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Event {
    /// Address of the contract that emitted the event.
    pub creator: Address,
    pub data: Bytes,
    pub topics: Vec<H256>,
}

impl RLPEncode for Event {
    fn encode(&self, buf: &mut dyn bytes::BufMut) {
        Encoder::new(buf)
            .encode_field(&self.creator)
            .encode_field(&self.data)
            .encode_field(&self.topics)
            .finish();
    }
}

impl RLPDecode for Event {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (creator, decoder) = decoder.decode_field("creator")?;
        let (data, decoder) = decoder.decode_field("data")?;
        let (topics, decoder) = decoder.decode_field("topics")?;
        let rest = decoder.finish()?;
        Ok((
            Event {
                creator,
                data,
                topics,
            },
            rest,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_rlp::encode::encode;

    #[test]
    fn event_roundtrip() {
        let event = Event {
            creator: Address::from_low_u64_be(7),
            data: Bytes::from_static(&[1, 2, 3]),
            topics: vec![H256::repeat_byte(0xaa), H256::repeat_byte(0xbb)],
        };
        let bytes = encode(&event);
        assert_eq!(Event::decode(&bytes).unwrap(), event);
    }
}
