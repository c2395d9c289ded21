use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use tracing::{debug, info};

use ember_common::types::Block;

use crate::{Blockchain, error::ChainError};

/// Most payload transactions drained into one proposal.
pub const MAX_BLOCK_TRANSACTIONS: usize = 512;

/// Decides whether this node proposes the next block. Armed when the
/// consensus engine reaches normal operation; proposing requires the
/// validator key.
pub struct ValidatorScheduler {
    armed: AtomicBool,
    proposer_key: Option<[u8; 32]>,
}

impl ValidatorScheduler {
    pub fn new(proposer_key: Option<[u8; 32]>) -> Self {
        ValidatorScheduler {
            armed: AtomicBool::new(false),
            proposer_key,
        }
    }

    /// Called when the consensus engine signals normal operation.
    pub fn start(&self) {
        if !self.armed.swap(true, Ordering::SeqCst) {
            info!(
                validator = self.proposer_key.is_some(),
                "validator scheduler armed"
            );
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    /// Builds, finalizes and signs the next block proposal: pending
    /// transactions in arrival order under the block gas limit, plus the
    /// current validator-transaction set. Nothing is committed; commit
    /// happens only when the consensus engine accepts.
    pub fn build_proposal(&self, chain: &Blockchain) -> Result<Option<Block>, ChainError> {
        if !self.is_armed() {
            return Ok(None);
        }
        let Some(proposer_key) = self.proposer_key.as_ref() else {
            return Ok(None);
        };

        let transactions = chain
            .mempool
            .select(MAX_BLOCK_TRANSACTIONS, chain.config.block_gas_limit)?;
        let validator_transactions = chain.mempool.validator_transactions()?;
        if transactions.is_empty() && validator_transactions.is_empty() {
            debug!("nothing to propose");
            return Ok(None);
        }

        let latest = chain.head.latest()?;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos() as u64)
            .unwrap_or_default();
        // Proposals must carry a strictly increasing timestamp.
        let timestamp = now.max(latest.timestamp + 1);

        let mut block = Block::new(latest.compute_hash(), timestamp, latest.height + 1);
        block.transactions = transactions;
        block.validator_transactions = validator_transactions;
        block
            .finalize(proposer_key)
            .map_err(|err| ChainError::Custom(format!("failed to sign proposal: {err}")))?;
        info!(
            height = block.height,
            txs = block.transactions.len(),
            "block proposal built"
        );
        Ok(Some(block))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{PROPOSER_KEY, test_chain, transfer_tx};
    use ethereum_types::U256;

    #[test]
    fn disarmed_scheduler_builds_nothing() {
        let chain = test_chain();
        chain.add_transaction(transfer_tx(0, U256::one())).unwrap();
        let scheduler = ValidatorScheduler::new(Some(PROPOSER_KEY));
        assert!(scheduler.build_proposal(&chain).unwrap().is_none());
    }

    #[test]
    fn non_validator_never_proposes() {
        let chain = test_chain();
        chain.add_transaction(transfer_tx(0, U256::one())).unwrap();
        let scheduler = ValidatorScheduler::new(None);
        scheduler.start();
        assert!(scheduler.build_proposal(&chain).unwrap().is_none());
    }

    #[test]
    fn empty_mempool_yields_no_proposal() {
        let chain = test_chain();
        let scheduler = ValidatorScheduler::new(Some(PROPOSER_KEY));
        scheduler.start();
        assert!(scheduler.build_proposal(&chain).unwrap().is_none());
    }

    #[test]
    fn proposal_extends_head_and_validates() {
        let chain = test_chain();
        chain.add_transaction(transfer_tx(0, U256::one())).unwrap();
        let scheduler = ValidatorScheduler::new(Some(PROPOSER_KEY));
        scheduler.start();

        let block = scheduler.build_proposal(&chain).unwrap().unwrap();
        assert_eq!(block.height, 1);
        assert_eq!(
            block.prev_hash,
            chain.head.latest().unwrap().compute_hash()
        );
        assert_eq!(block.transactions.len(), 1);
        chain.validate_block(&block).unwrap();
    }
}
