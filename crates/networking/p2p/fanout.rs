use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard},
};

use tracing::debug;

use ember_chain::Gossip;
use ember_common::types::{Block, Transaction, ValidatorTransaction};

use crate::messages::Message;

/// Gossip fan-out backed by an outbound frame queue. The execution core
/// pushes encoded messages here; the transport drains and writes them to
/// every connected peer.
#[derive(Debug, Default)]
pub struct WireGossip {
    outbound: Mutex<VecDeque<Vec<u8>>>,
}

impl WireGossip {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<Vec<u8>>> {
        match self.outbound.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn push(&self, message: Message) {
        let frame = message.encode();
        debug!(command = message.command(), bytes = frame.len(), "queued broadcast");
        self.queue().push_back(frame);
    }

    /// Takes every queued frame, oldest first.
    pub fn drain(&self) -> Vec<Vec<u8>> {
        self.queue().drain(..).collect()
    }

    pub fn pending(&self) -> usize {
        self.queue().len()
    }
}

impl Gossip for WireGossip {
    fn broadcast_transaction(&self, tx: &Transaction) {
        self.push(Message::SendTransaction(tx.clone()));
    }

    fn broadcast_validator_transaction(&self, tx: &ValidatorTransaction) {
        self.push(Message::SendValidatorTransaction(tx.clone()));
    }

    fn announce_best_block(&self, block: &Block) {
        self.push(Message::NewBestBlock(block.serialize()));
    }
}
