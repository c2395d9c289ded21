use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use tracing::debug;

use ember_common::types::{Block, BlockHash};

use crate::error::ChainError;

/// Consensus status of a tentative block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockStatus {
    Processing,
    Accepted,
    Rejected,
    Unknown,
}

#[derive(Debug)]
struct TipEntry {
    block: Arc<Block>,
    status: BlockStatus,
}

/// Blocks under consensus but not yet part of the head. Entries enter as
/// `Processing` on first observation; acceptance removes the entry (the
/// block moves into the head), rejection flips it to `Rejected` until
/// garbage collection reclaims it.
#[derive(Debug, Default)]
pub struct ChainTip {
    inner: RwLock<TipInner>,
}

#[derive(Debug, Default)]
struct TipInner {
    entries: HashMap<BlockHash, TipEntry>,
    preference: Option<BlockHash>,
}

/// Decided entries are kept for this many accepted heights before GC.
const TIP_RETENTION_HEIGHTS: u64 = 2;

impl ChainTip {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, TipInner>, ChainError> {
        self.inner.read().map_err(|_| ChainError::LockError)
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, TipInner>, ChainError> {
        self.inner.write().map_err(|_| ChainError::LockError)
    }

    /// Registers a block as processing. Re-observing a known block keeps
    /// its stored status.
    pub fn process(&self, block: Arc<Block>) -> Result<(), ChainError> {
        let mut inner = self.write()?;
        let hash = block.compute_hash();
        inner.entries.entry(hash).or_insert(TipEntry {
            block,
            status: BlockStatus::Processing,
        });
        Ok(())
    }

    pub fn exists(&self, hash: &BlockHash) -> Result<bool, ChainError> {
        Ok(self.read()?.entries.contains_key(hash))
    }

    pub fn status(&self, hash: &BlockHash) -> Result<Option<BlockStatus>, ChainError> {
        Ok(self.read()?.entries.get(hash).map(|entry| entry.status))
    }

    pub fn get(&self, hash: &BlockHash) -> Result<Option<Arc<Block>>, ChainError> {
        Ok(self.read()?.entries.get(hash).map(|entry| entry.block.clone()))
    }

    pub fn is_processing(&self, hash: &BlockHash) -> Result<bool, ChainError> {
        Ok(matches!(
            self.status(hash)?,
            Some(BlockStatus::Processing)
        ))
    }

    pub fn set_preference(&self, hash: BlockHash) -> Result<(), ChainError> {
        self.write()?.preference = Some(hash);
        Ok(())
    }

    pub fn preference(&self) -> Result<Option<BlockHash>, ChainError> {
        Ok(self.read()?.preference)
    }

    /// Removes and returns a processing block for acceptance; the caller
    /// takes ownership and migrates it into the head.
    pub fn take_processing(&self, hash: &BlockHash) -> Result<Arc<Block>, ChainError> {
        let mut inner = self.write()?;
        let status = inner
            .entries
            .get(hash)
            .map(|entry| entry.status)
            .ok_or(ChainError::BlockUnknown(*hash))?;
        if status != BlockStatus::Processing {
            return Err(ChainError::NotProcessing(*hash));
        }
        let entry = inner
            .entries
            .remove(hash)
            .ok_or(ChainError::BlockUnknown(*hash))?;
        Ok(entry.block)
    }

    /// Flips a block to `Rejected`, returning it for rollback.
    pub fn reject(&self, hash: &BlockHash) -> Result<Arc<Block>, ChainError> {
        let mut inner = self.write()?;
        let entry = inner
            .entries
            .get_mut(hash)
            .ok_or(ChainError::BlockUnknown(*hash))?;
        entry.status = BlockStatus::Rejected;
        Ok(entry.block.clone())
    }

    /// Drops entries whose height fell `TIP_RETENTION_HEIGHTS` or more
    /// below the accepted chain.
    pub fn gc(&self, accepted_height: u64) -> Result<(), ChainError> {
        let mut inner = self.write()?;
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| {
            entry.block.height + TIP_RETENTION_HEIGHTS > accepted_height
        });
        let dropped = before - inner.entries.len();
        if dropped > 0 {
            debug!(dropped, accepted_height, "chain tip garbage collected");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethereum_types::H256;

    fn block_at(height: u64) -> Arc<Block> {
        let mut block = Block::new(H256::repeat_byte(height as u8), height, height);
        block.finalize(&[0x42; 32]).unwrap();
        Arc::new(block)
    }

    #[test]
    fn processing_lifecycle() {
        let tip = ChainTip::new();
        let block = block_at(1);
        let hash = block.compute_hash();

        tip.process(block).unwrap();
        assert!(tip.is_processing(&hash).unwrap());

        let taken = tip.take_processing(&hash).unwrap();
        assert_eq!(taken.compute_hash(), hash);
        // Ownership moved out; the entry is gone.
        assert!(!tip.exists(&hash).unwrap());
    }

    #[test]
    fn take_unknown_block_is_typed_error() {
        let tip = ChainTip::new();
        let missing = H256::repeat_byte(0xee);
        assert!(matches!(
            tip.take_processing(&missing),
            Err(ChainError::BlockUnknown(hash)) if hash == missing
        ));
    }

    #[test]
    fn rejected_blocks_keep_their_status() {
        let tip = ChainTip::new();
        let block = block_at(2);
        let hash = block.compute_hash();
        tip.process(block).unwrap();
        tip.reject(&hash).unwrap();
        assert_eq!(tip.status(&hash).unwrap(), Some(BlockStatus::Rejected));
        assert!(matches!(
            tip.take_processing(&hash),
            Err(ChainError::NotProcessing(_))
        ));
    }

    #[test]
    fn reobserving_keeps_stored_status() {
        let tip = ChainTip::new();
        let block = block_at(3);
        let hash = block.compute_hash();
        tip.process(block.clone()).unwrap();
        tip.reject(&hash).unwrap();
        tip.process(block).unwrap();
        assert_eq!(tip.status(&hash).unwrap(), Some(BlockStatus::Rejected));
    }

    #[test]
    fn gc_reclaims_old_entries() {
        let tip = ChainTip::new();
        let old = block_at(1);
        let fresh = block_at(9);
        let old_hash = old.compute_hash();
        let fresh_hash = fresh.compute_hash();
        tip.process(old).unwrap();
        tip.process(fresh).unwrap();
        tip.reject(&old_hash).unwrap();

        tip.gc(5).unwrap();
        assert!(!tip.exists(&old_hash).unwrap());
        assert!(tip.exists(&fresh_hash).unwrap());
    }
}
