use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use ember_chain::{Blockchain, ChainError, MempoolError};

use crate::{
    messages::{InfoResponse, Message},
    peers::PeerBook,
};

/// Most blocks served for one range request.
const MAX_RANGE_BLOCKS: u64 = 1024;

/// What the transport should do with an inbound message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    /// Write these bytes back to the requesting peer.
    Response(Vec<u8>),
    /// Write each serialized block back to the requesting peer.
    Blocks(Vec<Vec<u8>>),
    /// Absorbed; nothing to send.
    Handled,
}

/// Dispatches one decoded message against the execution core. Gossip
/// messages are absorbed; invalid gossip is logged, never answered.
pub fn handle_message(
    chain: &Blockchain,
    peers: &PeerBook,
    version: &str,
    message: Message,
) -> Result<Inbound, ChainError> {
    match message {
        Message::Info => {
            let latest = chain.head.latest()?;
            let epoch_micros = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|elapsed| elapsed.as_micros() as u64)
                .unwrap_or_default();
            let response = InfoResponse {
                version: version.to_string(),
                epoch_micros,
                height: latest.height,
                best_hash: latest.compute_hash(),
                peers: peers.list(),
            };
            Ok(Inbound::Response(response.encode()))
        }
        Message::SendTransaction(tx) => {
            absorb_transaction(chain, tx);
            Ok(Inbound::Handled)
        }
        Message::SendBulkTransactions(txs) => {
            for tx in txs {
                absorb_transaction(chain, tx);
            }
            Ok(Inbound::Handled)
        }
        Message::RequestBlockByNumber(height) => {
            let block = chain.head.get_by_height(height)?;
            Ok(Inbound::Blocks(
                block.into_iter().map(|b| b.serialize()).collect(),
            ))
        }
        Message::RequestBlockByHash(hash) => {
            let block = chain.head.get_by_hash(&hash)?;
            Ok(Inbound::Blocks(
                block.into_iter().map(|b| b.serialize()).collect(),
            ))
        }
        Message::RequestBlockRange(start, end) => {
            let mut blocks = Vec::new();
            if start <= end {
                let end = end.min(start + MAX_RANGE_BLOCKS - 1);
                for height in start..=end {
                    match chain.head.get_by_height(height)? {
                        Some(block) => blocks.push(block.serialize()),
                        None => break,
                    }
                }
            }
            Ok(Inbound::Blocks(blocks))
        }
        Message::NewBestBlock(bytes) => {
            match chain.parse_block(&bytes) {
                Ok(parsed) => debug!(height = parsed.height, ?parsed.status, "best block gossip"),
                Err(err) => warn!(%err, "ignoring malformed best-block gossip"),
            }
            Ok(Inbound::Handled)
        }
        Message::SendValidatorTransaction(tx) => {
            absorb_validator_transaction(chain, tx);
            Ok(Inbound::Handled)
        }
        Message::SendBulkValidatorTransactions(txs) => {
            for tx in txs {
                absorb_validator_transaction(chain, tx);
            }
            Ok(Inbound::Handled)
        }
    }
}

fn absorb_transaction(chain: &Blockchain, tx: ember_common::types::Transaction) {
    match chain.add_transaction(tx) {
        Ok(hash) => debug!(%hash, "pooled gossiped transaction"),
        Err(MempoolError::AlreadyKnown) => {}
        Err(err) => warn!(%err, "dropping gossiped transaction"),
    }
}

fn absorb_validator_transaction(chain: &Blockchain, tx: ember_common::types::ValidatorTransaction) {
    match chain.add_validator_transaction(tx) {
        Ok(hash) => debug!(%hash, "pooled gossiped validator transaction"),
        Err(MempoolError::AlreadyKnown) => {}
        Err(err) => warn!(%err, "dropping gossiped validator transaction"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WireGossip;
    use std::sync::Arc;

    use bytes::Bytes;
    use ethereum_types::{Address, H256, U256};

    use ember_chain::{ChainHead, NoopGossip};
    use ember_common::types::{Block, ChainConfig, Transaction};
    use ember_storage::InMemoryStore;
    use ember_vm::{state::StateStore, test_utils::ScriptedVm};

    const SENDER_KEY: [u8; 32] = [0x7a; 32];

    fn test_chain() -> Blockchain {
        let mut genesis = Block::new(H256::zero(), 1_656_356_645_000_000_000, 0);
        genesis.finalize(&[0x42; 32]).unwrap();
        let mut state = StateStore::new();
        state.add_balance(
            ember_crypto::address_from_secret(&SENDER_KEY).unwrap(),
            U256::from(1_000_000_000u64),
        );
        state.commit_all();
        Blockchain::new(
            ChainConfig::default(),
            ChainHead::new(genesis),
            state,
            Arc::new(InMemoryStore::new()),
            Box::new(ScriptedVm),
            Arc::new(NoopGossip),
        )
    }

    fn signed_transfer() -> Transaction {
        let mut tx = Transaction {
            to: Address::from_low_u64_be(1),
            data: Bytes::new(),
            chain_id: 8848,
            nonce: 0,
            value: U256::one(),
            max_gas: 21_000,
            max_fee: 1,
            gas_limit: 21_000,
            ..Default::default()
        };
        tx.sign(&SENDER_KEY).unwrap();
        tx
    }

    #[test]
    fn info_request_reports_the_chain_head() {
        let chain = test_chain();
        let peers = PeerBook::new();
        peers.connect(vec![7]);

        let Inbound::Response(bytes) =
            handle_message(&chain, &peers, "ember/0.1.0", Message::Info).unwrap()
        else {
            panic!("expected a response");
        };
        let info = InfoResponse::decode(&bytes).unwrap();
        assert_eq!(info.version, "ember/0.1.0");
        assert_eq!(info.height, 0);
        assert_eq!(
            info.best_hash,
            chain.head.latest().unwrap().compute_hash()
        );
        assert_eq!(info.peers, vec![vec![7u8]]);
    }

    #[test]
    fn gossiped_transaction_lands_in_the_mempool() {
        let chain = test_chain();
        let peers = PeerBook::new();
        let tx = signed_transfer();
        let hash = tx.compute_hash();

        let result = handle_message(
            &chain,
            &peers,
            "v",
            Message::SendTransaction(tx.clone()),
        )
        .unwrap();
        assert_eq!(result, Inbound::Handled);
        assert!(chain.mempool.contains(&hash).unwrap());

        // A duplicate is absorbed without error.
        let again =
            handle_message(&chain, &peers, "v", Message::SendTransaction(tx)).unwrap();
        assert_eq!(again, Inbound::Handled);
    }

    #[test]
    fn block_requests_answer_from_the_head() {
        let chain = test_chain();
        let peers = PeerBook::new();
        let genesis = chain.head.latest().unwrap();

        let by_number =
            handle_message(&chain, &peers, "v", Message::RequestBlockByNumber(0)).unwrap();
        assert_eq!(by_number, Inbound::Blocks(vec![genesis.serialize()]));

        let by_hash = handle_message(
            &chain,
            &peers,
            "v",
            Message::RequestBlockByHash(genesis.compute_hash()),
        )
        .unwrap();
        assert_eq!(by_hash, Inbound::Blocks(vec![genesis.serialize()]));

        let miss =
            handle_message(&chain, &peers, "v", Message::RequestBlockByNumber(99)).unwrap();
        assert_eq!(miss, Inbound::Blocks(vec![]));

        let range =
            handle_message(&chain, &peers, "v", Message::RequestBlockRange(0, 10)).unwrap();
        assert_eq!(range, Inbound::Blocks(vec![genesis.serialize()]));
    }

    #[test]
    fn best_block_gossip_enters_the_tip() {
        let chain = test_chain();
        let peers = PeerBook::new();
        let latest = chain.head.latest().unwrap();
        let mut block = Block::new(
            latest.compute_hash(),
            latest.timestamp + 1_000_000_000,
            latest.height + 1,
        );
        block.finalize(&[0x42; 32]).unwrap();

        handle_message(
            &chain,
            &peers,
            "v",
            Message::NewBestBlock(block.serialize()),
        )
        .unwrap();
        assert!(chain.tip.is_processing(&block.compute_hash()).unwrap());
    }

    #[test]
    fn wire_gossip_integrates_with_the_chain() {
        let mut genesis = Block::new(H256::zero(), 1_656_356_645_000_000_000, 0);
        genesis.finalize(&[0x42; 32]).unwrap();
        let mut state = StateStore::new();
        state.add_balance(
            ember_crypto::address_from_secret(&SENDER_KEY).unwrap(),
            U256::from(1_000_000_000u64),
        );
        state.commit_all();
        let gossip = Arc::new(WireGossip::new());
        let chain = Blockchain::new(
            ChainConfig::default(),
            ChainHead::new(genesis),
            state,
            Arc::new(InMemoryStore::new()),
            Box::new(ScriptedVm),
            gossip.clone(),
        );

        chain.add_transaction(signed_transfer()).unwrap();
        let frames = gossip.drain();
        assert_eq!(frames.len(), 1);
        assert!(matches!(
            Message::decode(&frames[0]).unwrap(),
            Message::SendTransaction(_)
        ));
    }
}
