use ember_common::types::{Block, Transaction, ValidatorTransaction};

/// Fan-out hooks toward the peer network. The transport lives outside the
/// execution core; implementations must not block.
pub trait Gossip: Send + Sync {
    fn broadcast_transaction(&self, tx: &Transaction);
    fn broadcast_validator_transaction(&self, tx: &ValidatorTransaction);
    fn announce_best_block(&self, block: &Block);
}

/// Gossip sink for nodes without a network (tests, tools).
#[derive(Debug, Default)]
pub struct NoopGossip;

impl Gossip for NoopGossip {
    fn broadcast_transaction(&self, _tx: &Transaction) {}
    fn broadcast_validator_transaction(&self, _tx: &ValidatorTransaction) {}
    fn announce_best_block(&self, _block: &Block) {}
}
