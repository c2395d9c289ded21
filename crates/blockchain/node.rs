use std::sync::{Arc, Mutex, RwLock};

use ethereum_types::H256;
use tracing::info;

use ember_common::types::{Block, BlockHash, ChainConfig, ValidatorTransaction};
use ember_storage::KvStore;
use ember_vm::{backends::BytecodeVm, state::StateStore};

use crate::{
    Blockchain, ChainHead,
    chain_tip::BlockStatus,
    error::{ChainError, NodeError},
    gossip::Gossip,
    validator::ValidatorScheduler,
};

/// AvalancheGo error code for a block lookup miss.
pub const ERR_BLOCK_NOT_FOUND: u32 = 2;
/// Consensus-engine state in which this node may propose blocks.
pub const STATE_NORMAL_OP: u32 = 3;

/// Parameters of the consensus engine's `initialize` hook.
#[derive(Clone, Debug)]
pub struct InitializeRequest {
    pub network_id: u32,
    pub subnet_id: H256,
    pub chain_id: H256,
    pub node_id: Vec<u8>,
    pub genesis_bytes: Vec<u8>,
}

/// Descriptor of one block, as reported back to the consensus engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockDescriptor {
    pub id: BlockHash,
    pub parent_id: BlockHash,
    pub height: u64,
    pub timestamp: u64,
    pub bytes: Vec<u8>,
}

/// Answer of the `getBlock` hook. Unseen hashes report `Unknown` with
/// [`ERR_BLOCK_NOT_FOUND`] instead of failing the call.
#[derive(Clone, Debug)]
pub struct GetBlockResponse {
    pub status: BlockStatus,
    pub err_code: u32,
    pub parent_id: BlockHash,
    pub height: u64,
    pub timestamp: u64,
    pub bytes: Vec<u8>,
}

struct Seed {
    config: ChainConfig,
    vm: Box<dyn BytecodeVm + Send + Sync>,
    gossip: Arc<dyn Gossip>,
    proposer_key: Option<[u8; 32]>,
}

struct NodeInner {
    chain: Blockchain,
    scheduler: ValidatorScheduler,
}

/// The execution core as seen by an AvalancheGo-compatible consensus
/// engine: one struct per chain, driven entirely through the hook methods.
pub struct ExecutionNode {
    seed: Mutex<Option<Seed>>,
    inner: RwLock<Option<NodeInner>>,
    peers: Mutex<Vec<Vec<u8>>>,
    db: Arc<dyn KvStore>,
}

impl ExecutionNode {
    pub fn new(
        config: ChainConfig,
        db: Arc<dyn KvStore>,
        vm: Box<dyn BytecodeVm + Send + Sync>,
        gossip: Arc<dyn Gossip>,
        proposer_key: Option<[u8; 32]>,
    ) -> Self {
        ExecutionNode {
            seed: Mutex::new(Some(Seed {
                config,
                vm,
                gossip,
                proposer_key,
            })),
            inner: RwLock::new(None),
            peers: Mutex::new(Vec::new()),
            db,
        }
    }

    fn with_inner<R>(
        &self,
        f: impl FnOnce(&NodeInner) -> Result<R, NodeError>,
    ) -> Result<R, NodeError> {
        let guard = self.inner.read().map_err(|_| NodeError::LockError)?;
        let inner = guard.as_ref().ok_or(NodeError::NotInitialized)?;
        f(inner)
    }

    /// Brings the chain up: loads the head and the state snapshot from the
    /// store (verifying the height marker), or starts from the supplied
    /// genesis block. Calling it twice is fatal.
    pub fn initialize(&self, request: &InitializeRequest) -> Result<BlockDescriptor, NodeError> {
        let seed = self
            .seed
            .lock()
            .map_err(|_| NodeError::LockError)?
            .take()
            .ok_or(NodeError::AlreadyInitialized)?;

        let head = match ChainHead::load_from_db(self.db.as_ref())? {
            Some(head) => head,
            None => {
                let genesis =
                    Block::deserialize(&request.genesis_bytes).map_err(ChainError::from)?;
                ChainHead::new(genesis)
            }
        };
        let latest = head.latest().map_err(NodeError::Chain)?;
        let state = match StateStore::load_from_db(self.db.as_ref(), latest.height)? {
            Some(state) => state,
            None => StateStore::new(),
        };

        let chain = Blockchain::new(
            seed.config,
            head,
            state,
            self.db.clone(),
            seed.vm,
            seed.gossip,
        );
        let scheduler = ValidatorScheduler::new(seed.proposer_key);
        let descriptor = descriptor_of(&latest);

        let mut guard = self.inner.write().map_err(|_| NodeError::LockError)?;
        *guard = Some(NodeInner { chain, scheduler });
        info!(
            network_id = request.network_id,
            height = descriptor.height,
            "execution node initialized"
        );
        Ok(descriptor)
    }

    /// State transition signal from the consensus engine; normal operation
    /// arms the validator scheduler. Answers the latest accepted block.
    pub fn set_state(&self, state: u32) -> Result<BlockDescriptor, NodeError> {
        self.with_inner(|inner| {
            if state == STATE_NORMAL_OP {
                inner.scheduler.start();
            }
            Ok(descriptor_of(inner.chain.head.latest()?.as_ref()))
        })
    }

    /// Builds the next block proposal, if this node currently proposes.
    pub fn build_block(&self) -> Result<Option<BlockDescriptor>, NodeError> {
        self.with_inner(|inner| {
            Ok(inner
                .scheduler
                .build_proposal(&inner.chain)?
                .map(|block| descriptor_of(&block)))
        })
    }

    pub fn parse_block(&self, bytes: &[u8]) -> Result<crate::ParsedBlock, NodeError> {
        self.with_inner(|inner| Ok(inner.chain.parse_block(bytes)?))
    }

    pub fn get_block(&self, id: &BlockHash) -> Result<GetBlockResponse, NodeError> {
        self.with_inner(|inner| {
            if let Some(block) = inner.chain.head.get_by_hash(id)? {
                return Ok(found(&block, BlockStatus::Accepted));
            }
            if let (Some(block), Some(status)) =
                (inner.chain.tip.get(id)?, inner.chain.tip.status(id)?)
            {
                return Ok(found(&block, status));
            }
            Ok(GetBlockResponse {
                status: BlockStatus::Unknown,
                err_code: ERR_BLOCK_NOT_FOUND,
                parent_id: H256::zero(),
                height: 0,
                timestamp: 0,
                bytes: Vec::new(),
            })
        })
    }

    pub fn get_ancestors(
        &self,
        id: &BlockHash,
        max_count: u64,
        max_bytes: u64,
        max_nanos: u64,
    ) -> Result<crate::AncestorsResponse, NodeError> {
        self.with_inner(|inner| {
            Ok(inner
                .chain
                .get_ancestors(id, max_count, max_bytes, max_nanos)?)
        })
    }

    pub fn verify_block(&self, bytes: &[u8]) -> Result<BlockHash, NodeError> {
        self.with_inner(|inner| Ok(inner.chain.verify_block(bytes)?))
    }

    pub fn accept_block(&self, id: &BlockHash) -> Result<(), NodeError> {
        self.with_inner(|inner| Ok(inner.chain.accept_block(id)?))
    }

    pub fn reject_block(&self, id: &BlockHash) -> Result<(), NodeError> {
        self.with_inner(|inner| Ok(inner.chain.reject_block(id)?))
    }

    pub fn set_preference(&self, id: BlockHash) -> Result<(), NodeError> {
        self.with_inner(|inner| Ok(inner.chain.tip.set_preference(id)?))
    }

    /// Validates a payload transaction, pools it and schedules a gossip
    /// broadcast on first acceptance.
    pub fn submit_transaction(
        &self,
        tx: ember_common::types::Transaction,
    ) -> Result<BlockHash, NodeError> {
        self.with_inner(|inner| Ok(inner.chain.add_transaction(tx)?))
    }

    pub fn submit_validator_transaction(
        &self,
        tx: ValidatorTransaction,
    ) -> Result<BlockHash, NodeError> {
        self.with_inner(|inner| Ok(inner.chain.add_validator_transaction(tx)?))
    }

    /// Copy of the validator-transaction set, for consensus-side use.
    pub fn validator_mempool(&self) -> Result<Vec<ValidatorTransaction>, NodeError> {
        self.with_inner(|inner| {
            inner
                .chain
                .mempool
                .validator_transactions()
                .map_err(NodeError::Mempool)
        })
    }

    // ── Peer book ──────────────────────────────────────────────────────

    pub fn connect_node(&self, node_id: Vec<u8>) -> Result<(), NodeError> {
        let mut peers = self.peers.lock().map_err(|_| NodeError::LockError)?;
        info!(peer = %hex::encode(&node_id), "peer connected");
        peers.push(node_id);
        Ok(())
    }

    pub fn disconnect_node(&self, node_id: &[u8]) -> Result<(), NodeError> {
        let mut peers = self.peers.lock().map_err(|_| NodeError::LockError)?;
        if let Some(position) = peers.iter().position(|known| known == node_id) {
            peers.remove(position);
            info!(peer = %hex::encode(node_id), "peer disconnected");
        }
        Ok(())
    }

    pub fn connected_peers(&self) -> Result<Vec<Vec<u8>>, NodeError> {
        Ok(self
            .peers
            .lock()
            .map_err(|_| NodeError::LockError)?
            .clone())
    }

    /// Clean shutdown: flushes the state snapshot (bumping the `latest`
    /// marker) and the chain-head dump. Until both batches return, the
    /// previous snapshot stays authoritative.
    pub fn shutdown(&self) -> Result<(), NodeError> {
        self.with_inner(|inner| {
            let latest = inner.chain.head.latest()?;
            inner
                .chain
                .lock_state()?
                .snapshot_to_db(self.db.as_ref(), latest.height)?;
            inner.chain.head.dump_to_db(self.db.as_ref())?;
            info!(height = latest.height, "node shut down cleanly");
            Ok(())
        })
    }
}

fn descriptor_of(block: &Block) -> BlockDescriptor {
    BlockDescriptor {
        id: block.compute_hash(),
        parent_id: block.prev_hash,
        height: block.height,
        timestamp: block.timestamp,
        bytes: block.serialize(),
    }
}

fn found(block: &Block, status: BlockStatus) -> GetBlockResponse {
    GetBlockResponse {
        status,
        err_code: 0,
        parent_id: block.prev_hash,
        height: block.height,
        timestamp: block.timestamp,
        bytes: block.serialize(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{
        GENESIS_TIMESTAMP, ONE_ETHER, PROPOSER_KEY, genesis_block, sender_address, transfer_tx,
    };
    use crate::{NoopGossip, error::MempoolError};
    use ember_common::types::Transaction;
    use ember_storage::InMemoryStore;
    use ember_vm::test_utils::ScriptedVm;
    use ethereum_types::{Address, U256};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingGossip {
        tx_broadcasts: StdMutex<usize>,
        block_announcements: StdMutex<usize>,
    }

    impl Gossip for RecordingGossip {
        fn broadcast_transaction(&self, _tx: &Transaction) {
            *self.tx_broadcasts.lock().unwrap() += 1;
        }
        fn broadcast_validator_transaction(&self, _tx: &ValidatorTransaction) {}
        fn announce_best_block(&self, _block: &Block) {
            *self.block_announcements.lock().unwrap() += 1;
        }
    }

    fn initialize_request() -> InitializeRequest {
        InitializeRequest {
            network_id: 1,
            subnet_id: H256::repeat_byte(1),
            chain_id: H256::repeat_byte(2),
            node_id: vec![0xaa],
            genesis_bytes: genesis_block().serialize(),
        }
    }

    fn funded_node(db: Arc<InMemoryStore>, gossip: Arc<dyn Gossip>) -> ExecutionNode {
        let node = ExecutionNode::new(
            ChainConfig::default(),
            db,
            Box::new(ScriptedVm),
            gossip,
            Some(PROPOSER_KEY),
        );
        node.initialize(&initialize_request()).unwrap();
        // Seed the sender account the way a genesis allocation would.
        node.with_inner(|inner| {
            let mut state = inner.chain.lock_state()?;
            state.add_balance(sender_address(), U256::from(ONE_ETHER));
            state.commit_all();
            Ok(())
        })
        .unwrap();
        node
    }

    fn processing_block(node: &ExecutionNode, txs: Vec<Transaction>, offset: u64) -> Block {
        node.with_inner(|inner| {
            let latest = inner.chain.head.latest()?;
            let mut block = Block::new(
                latest.compute_hash(),
                latest.timestamp + offset,
                latest.height + 1,
            );
            block.transactions = txs;
            block.finalize(&PROPOSER_KEY).map_err(|_| {
                NodeError::Chain(ChainError::Custom("sign".to_string()))
            })?;
            Ok(block)
        })
        .unwrap()
    }

    #[test]
    fn genesis_initialization_is_deterministic() {
        let db = Arc::new(InMemoryStore::new());
        let node = ExecutionNode::new(
            ChainConfig::default(),
            db,
            Box::new(ScriptedVm),
            Arc::new(NoopGossip),
            None,
        );
        let descriptor = node.initialize(&initialize_request()).unwrap();
        assert_eq!(descriptor.height, 0);
        assert_eq!(descriptor.parent_id, H256::zero());
        assert_eq!(descriptor.timestamp, GENESIS_TIMESTAMP);
        assert_eq!(descriptor.id, genesis_block().compute_hash());
    }

    #[test]
    fn double_initialize_is_fatal() {
        let db = Arc::new(InMemoryStore::new());
        let node = ExecutionNode::new(
            ChainConfig::default(),
            db,
            Box::new(ScriptedVm),
            Arc::new(NoopGossip),
            None,
        );
        node.initialize(&initialize_request()).unwrap();
        assert!(matches!(
            node.initialize(&initialize_request()),
            Err(NodeError::AlreadyInitialized)
        ));
    }

    #[test]
    fn uninitialized_hooks_refuse() {
        let node = ExecutionNode::new(
            ChainConfig::default(),
            Arc::new(InMemoryStore::new()),
            Box::new(ScriptedVm),
            Arc::new(NoopGossip),
            None,
        );
        assert!(matches!(
            node.build_block(),
            Err(NodeError::NotInitialized)
        ));
    }

    #[test]
    fn transfer_through_accept_hook() {
        let db = Arc::new(InMemoryStore::new());
        let node = funded_node(db, Arc::new(NoopGossip));
        let block = processing_block(&node, vec![transfer_tx(0, U256::one())], 1_000_000_000);
        let hash = node.verify_block(&block.serialize()).unwrap();
        node.accept_block(&hash).unwrap();

        let response = node.get_block(&hash).unwrap();
        assert_eq!(response.status, BlockStatus::Accepted);
        node.with_inner(|inner| {
            let state = inner.chain.lock_state()?;
            assert_eq!(
                state.get_balance(&Address::from_low_u64_be(0xb0b)),
                U256::one()
            );
            assert_eq!(
                state.get_balance(&sender_address()),
                U256::from(ONE_ETHER) - U256::from(21_001)
            );
            assert_eq!(state.get_nonce(&sender_address()), 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn preference_switch_accepts_one_sibling_and_rejects_the_other() {
        let db = Arc::new(InMemoryStore::new());
        let node = funded_node(db, Arc::new(NoopGossip));

        let block_b = processing_block(&node, vec![transfer_tx(0, U256::one())], 1_000_000_000);
        let block_b2 = processing_block(&node, vec![], 2_000_000_000);
        let hash_b = node.verify_block(&block_b.serialize()).unwrap();
        let hash_b2 = node.verify_block(&block_b2.serialize()).unwrap();

        node.set_preference(hash_b2).unwrap();
        node.accept_block(&hash_b2).unwrap();
        node.reject_block(&hash_b).unwrap();

        node.with_inner(|inner| {
            assert_eq!(inner.chain.head.latest()?.compute_hash(), hash_b2);
            // No residual pending writes from the rejected block.
            let state = inner.chain.lock_state()?;
            assert_eq!(
                state.pending_balance(&sender_address()),
                U256::from(ONE_ETHER)
            );
            assert_eq!(state.pending_nonce(&sender_address()), 0);
            Ok(())
        })
        .unwrap();
        assert_eq!(
            node.get_block(&hash_b).unwrap().status,
            BlockStatus::Rejected
        );
    }

    #[test]
    fn unknown_block_lookup_reports_err_code_2() {
        let db = Arc::new(InMemoryStore::new());
        let node = funded_node(db, Arc::new(NoopGossip));
        let response = node.get_block(&H256::repeat_byte(0x99)).unwrap();
        assert_eq!(response.status, BlockStatus::Unknown);
        assert_eq!(response.err_code, ERR_BLOCK_NOT_FOUND);
    }

    #[test]
    fn duplicate_transaction_broadcasts_once() {
        let db = Arc::new(InMemoryStore::new());
        let gossip = Arc::new(RecordingGossip::default());
        let node = funded_node(db, gossip.clone());

        let tx = transfer_tx(0, U256::one());
        node.submit_transaction(tx.clone()).unwrap();
        assert!(matches!(
            node.submit_transaction(tx),
            Err(NodeError::Mempool(MempoolError::AlreadyKnown))
        ));
        assert_eq!(*gossip.tx_broadcasts.lock().unwrap(), 1);
    }

    #[test]
    fn accept_announces_best_block_to_peers() {
        let db = Arc::new(InMemoryStore::new());
        let gossip = Arc::new(RecordingGossip::default());
        let node = funded_node(db, gossip.clone());

        let block = processing_block(&node, vec![], 1_000_000_000);
        let hash = node.verify_block(&block.serialize()).unwrap();
        node.accept_block(&hash).unwrap();
        assert_eq!(*gossip.block_announcements.lock().unwrap(), 1);
    }

    #[test]
    fn normal_op_arms_the_scheduler_and_builds() {
        let db = Arc::new(InMemoryStore::new());
        let node = funded_node(db, Arc::new(NoopGossip));
        node.submit_transaction(transfer_tx(0, U256::one())).unwrap();

        assert!(node.build_block().unwrap().is_none());
        node.set_state(STATE_NORMAL_OP).unwrap();
        let proposal = node.build_block().unwrap().unwrap();
        assert_eq!(proposal.height, 1);

        // The proposal round-trips through parse and lands as processing.
        let parsed = node.parse_block(&proposal.bytes).unwrap();
        assert_eq!(parsed.status, BlockStatus::Processing);
    }

    #[test]
    fn shutdown_then_restart_restores_head_and_state() {
        let db = Arc::new(InMemoryStore::new());
        let node = funded_node(db.clone(), Arc::new(NoopGossip));
        let block = processing_block(&node, vec![transfer_tx(0, U256::one())], 1_000_000_000);
        let hash = node.verify_block(&block.serialize()).unwrap();
        node.accept_block(&hash).unwrap();
        node.shutdown().unwrap();

        let restarted = ExecutionNode::new(
            ChainConfig::default(),
            db,
            Box::new(ScriptedVm),
            Arc::new(NoopGossip),
            None,
        );
        let descriptor = restarted.initialize(&initialize_request()).unwrap();
        assert_eq!(descriptor.id, hash);
        assert_eq!(descriptor.height, 1);
        restarted
            .with_inner(|inner| {
                let state = inner.chain.lock_state()?;
                assert_eq!(
                    state.get_balance(&Address::from_low_u64_be(0xb0b)),
                    U256::one()
                );
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn peer_book_connect_disconnect() {
        let db = Arc::new(InMemoryStore::new());
        let node = funded_node(db, Arc::new(NoopGossip));
        node.connect_node(vec![1, 2, 3]).unwrap();
        node.connect_node(vec![4, 5]).unwrap();
        assert_eq!(node.connected_peers().unwrap().len(), 2);
        node.disconnect_node(&[1, 2, 3]).unwrap();
        assert_eq!(node.connected_peers().unwrap(), vec![vec![4u8, 5]]);
    }
}
