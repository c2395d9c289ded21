use ethereum_types::H256;
use thiserror::Error;

use ember_common::types::{Transaction, ValidatorTransaction};
use ember_rlp::{decode::RLPDecode, encode::RLPEncode, error::RLPDecodeError};

/// Every message starts with a two-byte command id written as four ASCII
/// hex characters, followed by the command payload.
const COMMAND_LEN: usize = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("Command does not exist: {0}")]
    UnknownCommand(String),
    #[error("Message payload is truncated")]
    Truncated,
    #[error("RLP decode error: {0}")]
    Rlp(#[from] RLPDecodeError),
}

/// Peer-to-peer gossip and request messages.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    /// `0000`: node info request.
    Info,
    /// `0001`: a single payload transaction.
    SendTransaction(Transaction),
    /// `0002`: length-prefixed payload transactions.
    SendBulkTransactions(Vec<Transaction>),
    /// `0003`: request a block by height.
    RequestBlockByNumber(u64),
    /// `0004`: request a block by hash.
    RequestBlockByHash(H256),
    /// `0005`: request the blocks in `[start, end]`.
    RequestBlockRange(u64, u64),
    /// `0006`: announce a newly accepted best block.
    NewBestBlock(Vec<u8>),
    /// `0007`: a single validator transaction.
    SendValidatorTransaction(ValidatorTransaction),
    /// `0008`: length-prefixed validator transactions.
    SendBulkValidatorTransactions(Vec<ValidatorTransaction>),
}

impl Message {
    pub const fn command(&self) -> &'static str {
        match self {
            Message::Info => "0000",
            Message::SendTransaction(_) => "0001",
            Message::SendBulkTransactions(_) => "0002",
            Message::RequestBlockByNumber(_) => "0003",
            Message::RequestBlockByHash(_) => "0004",
            Message::RequestBlockRange(..) => "0005",
            Message::NewBestBlock(_) => "0006",
            Message::SendValidatorTransaction(_) => "0007",
            Message::SendBulkValidatorTransactions(_) => "0008",
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(self.command().as_bytes());
        match self {
            Message::Info => {}
            Message::SendTransaction(tx) => buf.extend_from_slice(&tx.encode_to_vec()),
            Message::SendBulkTransactions(txs) => {
                buf.extend_from_slice(&(txs.len() as u64).to_be_bytes());
                for tx in txs {
                    let bytes = tx.encode_to_vec();
                    buf.extend_from_slice(&(bytes.len() as u64).to_be_bytes());
                    buf.extend_from_slice(&bytes);
                }
            }
            Message::RequestBlockByNumber(height) => {
                buf.extend_from_slice(&height.to_be_bytes());
            }
            Message::RequestBlockByHash(hash) => buf.extend_from_slice(hash.as_bytes()),
            Message::RequestBlockRange(start, end) => {
                buf.extend_from_slice(&start.to_be_bytes());
                buf.extend_from_slice(&end.to_be_bytes());
            }
            Message::NewBestBlock(bytes) => buf.extend_from_slice(bytes),
            Message::SendValidatorTransaction(tx) => {
                buf.extend_from_slice(&tx.encode_to_vec());
            }
            Message::SendBulkValidatorTransactions(txs) => {
                buf.extend_from_slice(&(txs.len() as u64).to_be_bytes());
                for tx in txs {
                    let bytes = tx.encode_to_vec();
                    buf.extend_from_slice(&(bytes.len() as u64).to_be_bytes());
                    buf.extend_from_slice(&bytes);
                }
            }
        }
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Message, MessageError> {
        if data.len() < COMMAND_LEN {
            return Err(MessageError::Truncated);
        }
        let (command, payload) = data.split_at(COMMAND_LEN);
        let command = std::str::from_utf8(command)
            .map_err(|_| MessageError::UnknownCommand(hex_of(command)))?;
        match command {
            "0000" => Ok(Message::Info),
            "0001" => Ok(Message::SendTransaction(Transaction::decode(payload)?)),
            "0002" => Ok(Message::SendBulkTransactions(decode_bulk(payload)?)),
            "0003" => Ok(Message::RequestBlockByNumber(read_u64(payload, 0)?)),
            "0004" => {
                if payload.len() != 32 {
                    return Err(MessageError::Truncated);
                }
                Ok(Message::RequestBlockByHash(H256::from_slice(payload)))
            }
            "0005" => Ok(Message::RequestBlockRange(
                read_u64(payload, 0)?,
                read_u64(payload, 8)?,
            )),
            "0006" => Ok(Message::NewBestBlock(payload.to_vec())),
            "0007" => Ok(Message::SendValidatorTransaction(
                ValidatorTransaction::decode(payload)?,
            )),
            "0008" => Ok(Message::SendBulkValidatorTransactions(decode_bulk(
                payload,
            )?)),
            other => Err(MessageError::UnknownCommand(other.to_string())),
        }
    }
}

fn hex_of(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn read_u64(payload: &[u8], offset: usize) -> Result<u64, MessageError> {
    let slice = payload
        .get(offset..offset + 8)
        .ok_or(MessageError::Truncated)?;
    let bytes: [u8; 8] = slice.try_into().map_err(|_| MessageError::Truncated)?;
    Ok(u64::from_be_bytes(bytes))
}

fn decode_bulk<T: RLPDecode>(payload: &[u8]) -> Result<Vec<T>, MessageError> {
    let count = read_u64(payload, 0)? as usize;
    let mut items = Vec::with_capacity(count.min(1024));
    let mut offset = 8;
    for _ in 0..count {
        let length = read_u64(payload, offset)? as usize;
        offset += 8;
        let bytes = payload
            .get(offset..offset + length)
            .ok_or(MessageError::Truncated)?;
        items.push(T::decode(bytes)?);
        offset += length;
    }
    Ok(items)
}

/// Answer to the `0000` info request: version, wall-clock epoch in
/// microseconds, best height and hash, and the known peer list.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InfoResponse {
    pub version: String,
    pub epoch_micros: u64,
    pub height: u64,
    pub best_hash: H256,
    pub peers: Vec<Vec<u8>>,
}

impl InfoResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(self.version.len() as u8);
        buf.extend_from_slice(self.version.as_bytes());
        buf.extend_from_slice(&self.epoch_micros.to_be_bytes());
        buf.extend_from_slice(&self.height.to_be_bytes());
        buf.extend_from_slice(self.best_hash.as_bytes());
        buf.extend_from_slice(&(self.peers.len() as u16).to_be_bytes());
        for peer in &self.peers {
            buf.push(peer.len() as u8);
            buf.extend_from_slice(peer);
        }
        buf
    }

    pub fn decode(data: &[u8]) -> Result<InfoResponse, MessageError> {
        let version_len = *data.first().ok_or(MessageError::Truncated)? as usize;
        let mut offset = 1;
        let version_bytes = data
            .get(offset..offset + version_len)
            .ok_or(MessageError::Truncated)?;
        let version = String::from_utf8(version_bytes.to_vec())
            .map_err(|_| MessageError::Truncated)?;
        offset += version_len;

        let epoch_micros = read_u64(data, offset)?;
        offset += 8;
        let height = read_u64(data, offset)?;
        offset += 8;
        let hash_bytes = data
            .get(offset..offset + 32)
            .ok_or(MessageError::Truncated)?;
        let best_hash = H256::from_slice(hash_bytes);
        offset += 32;

        let count_bytes: [u8; 2] = data
            .get(offset..offset + 2)
            .ok_or(MessageError::Truncated)?
            .try_into()
            .map_err(|_| MessageError::Truncated)?;
        let count = u16::from_be_bytes(count_bytes) as usize;
        offset += 2;
        let mut peers = Vec::with_capacity(count);
        for _ in 0..count {
            let peer_len = *data.get(offset).ok_or(MessageError::Truncated)? as usize;
            offset += 1;
            let peer = data
                .get(offset..offset + peer_len)
                .ok_or(MessageError::Truncated)?;
            peers.push(peer.to_vec());
            offset += peer_len;
        }

        Ok(InfoResponse {
            version,
            epoch_micros,
            height,
            best_hash,
            peers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use ethereum_types::{Address, U256};

    fn signed_tx(nonce: u64) -> Transaction {
        let mut tx = Transaction {
            to: Address::from_low_u64_be(1),
            chain_id: 8848,
            nonce,
            value: U256::from(5),
            max_gas: 21_000,
            max_fee: 1,
            gas_limit: 21_000,
            ..Default::default()
        };
        tx.sign(&[0x11; 32]).unwrap();
        tx
    }

    fn signed_validator_tx(nonce: u64) -> ValidatorTransaction {
        let mut tx = ValidatorTransaction {
            data: Bytes::from_static(b"seed"),
            chain_id: 8848,
            nonce,
            ..Default::default()
        };
        tx.sign(&[0x22; 32]).unwrap();
        tx
    }

    #[test]
    fn command_ids_are_stable() {
        assert_eq!(Message::Info.command(), "0000");
        assert_eq!(
            Message::RequestBlockByNumber(1).encode()[..4],
            *b"0003"
        );
        assert_eq!(Message::NewBestBlock(vec![]).encode(), b"0006".to_vec());
    }

    #[test]
    fn single_transaction_roundtrip() {
        let message = Message::SendTransaction(signed_tx(0));
        let decoded = Message::decode(&message.encode()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn bulk_transactions_roundtrip() {
        let message = Message::SendBulkTransactions(vec![signed_tx(0), signed_tx(1)]);
        assert_eq!(Message::decode(&message.encode()).unwrap(), message);

        let message =
            Message::SendBulkValidatorTransactions(vec![signed_validator_tx(0)]);
        assert_eq!(Message::decode(&message.encode()).unwrap(), message);
    }

    #[test]
    fn block_requests_roundtrip() {
        for message in [
            Message::RequestBlockByNumber(42),
            Message::RequestBlockByHash(H256::repeat_byte(0xab)),
            Message::RequestBlockRange(10, 20),
            Message::NewBestBlock(vec![1, 2, 3]),
        ] {
            assert_eq!(Message::decode(&message.encode()).unwrap(), message);
        }
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert_eq!(
            Message::decode(b"9999"),
            Err(MessageError::UnknownCommand("9999".to_string()))
        );
        assert_eq!(Message::decode(b"00"), Err(MessageError::Truncated));
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let mut bytes = Message::RequestBlockRange(1, 2).encode();
        bytes.truncate(bytes.len() - 1);
        assert_eq!(Message::decode(&bytes), Err(MessageError::Truncated));
    }

    #[test]
    fn info_response_roundtrip() {
        let response = InfoResponse {
            version: "ember/0.1.0".to_string(),
            epoch_micros: 1_656_356_645_000_000,
            height: 12,
            best_hash: H256::repeat_byte(0x5e),
            peers: vec![vec![1, 2, 3], vec![4]],
        };
        assert_eq!(
            InfoResponse::decode(&response.encode()).unwrap(),
            response
        );
    }
}
