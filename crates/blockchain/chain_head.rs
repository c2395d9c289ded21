use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, RwLock},
};

use ethereum_types::H256;
use tracing::info;

use ember_common::types::{Block, BlockHash, BlockNumber};
use ember_storage::{DbPrefix, KvStore, WriteBatch};
use ember_vm::host::BlockHashProvider;

use crate::error::{ChainError, InvalidBlockError};

/// The authoritative accepted chain: append-only, indexed by height and by
/// hash. A block is never visible here before its parent.
#[derive(Debug)]
pub struct ChainHead {
    inner: RwLock<HeadInner>,
}

#[derive(Debug, Default)]
struct HeadInner {
    blocks: HashMap<BlockHash, Arc<Block>>,
    heights: BTreeMap<BlockNumber, BlockHash>,
}

impl ChainHead {
    pub fn new(genesis: Block) -> Self {
        let mut inner = HeadInner::default();
        let hash = genesis.compute_hash();
        inner.heights.insert(genesis.height, hash);
        inner.blocks.insert(hash, Arc::new(genesis));
        ChainHead {
            inner: RwLock::new(inner),
        }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, HeadInner>, ChainError> {
        self.inner.read().map_err(|_| ChainError::LockError)
    }

    /// The block with the maximum height.
    pub fn latest(&self) -> Result<Arc<Block>, ChainError> {
        let inner = self.read()?;
        inner
            .heights
            .last_key_value()
            .and_then(|(_, hash)| inner.blocks.get(hash).cloned())
            .ok_or_else(|| ChainError::Custom("chain head is empty".to_string()))
    }

    pub fn exists(&self, hash: &BlockHash) -> Result<bool, ChainError> {
        Ok(self.read()?.blocks.contains_key(hash))
    }

    pub fn get_by_hash(&self, hash: &BlockHash) -> Result<Option<Arc<Block>>, ChainError> {
        Ok(self.read()?.blocks.get(hash).cloned())
    }

    pub fn get_by_height(&self, height: BlockNumber) -> Result<Option<Arc<Block>>, ChainError> {
        let inner = self.read()?;
        Ok(inner
            .heights
            .get(&height)
            .and_then(|hash| inner.blocks.get(hash))
            .cloned())
    }

    /// Appends an accepted block. The block must link to the current
    /// latest block.
    pub fn append(&self, block: Arc<Block>) -> Result<(), ChainError> {
        let mut inner = self.inner.write().map_err(|_| ChainError::LockError)?;
        if let Some((latest_height, latest_hash)) = inner.heights.last_key_value() {
            if block.prev_hash != *latest_hash {
                return Err(InvalidBlockError::ParentMismatch.into());
            }
            if block.height != latest_height + 1 {
                return Err(InvalidBlockError::WrongHeight {
                    parent: *latest_height,
                    got: block.height,
                }
                .into());
            }
        }
        let hash = block.compute_hash();
        inner.heights.insert(block.height, hash);
        inner.blocks.insert(hash, block);
        Ok(())
    }

    /// Persists every accepted block plus the height index.
    pub fn dump_to_db(&self, db: &dyn KvStore) -> Result<(), ChainError> {
        let inner = self.read()?;
        let mut blocks = WriteBatch::new();
        let mut heights = WriteBatch::new();
        for (height, hash) in &inner.heights {
            if let Some(block) = inner.blocks.get(hash) {
                blocks.put(hash.as_bytes(), block.serialize());
                heights.put(height.to_be_bytes().to_vec(), hash.as_bytes());
            }
        }
        db.write_batch(blocks, DbPrefix::Blocks)?;
        db.write_batch(heights, DbPrefix::BlockHeights)?;
        info!(blocks = inner.blocks.len(), "chain head dumped to db");
        Ok(())
    }

    /// Rebuilds the head from a previous dump. Returns `None` when the
    /// store holds no blocks.
    pub fn load_from_db(db: &dyn KvStore) -> Result<Option<ChainHead>, ChainError> {
        let height_index = db.read_batch(DbPrefix::BlockHeights)?;
        if height_index.is_empty() {
            return Ok(None);
        }
        let mut inner = HeadInner::default();
        for (height_key, hash_bytes) in height_index {
            let height = u64::from_be_bytes(
                height_key
                    .try_into()
                    .map_err(|_| ChainError::Custom("malformed height key".to_string()))?,
            );
            let hash = H256::from_slice(&hash_bytes);
            let bytes = db
                .get(hash.as_bytes(), DbPrefix::Blocks)?
                .ok_or_else(|| ChainError::Custom(format!("missing block {hash:#x}")))?;
            let block = Block::deserialize(&bytes)?;
            inner.heights.insert(height, hash);
            inner.blocks.insert(hash, Arc::new(block));
        }
        Ok(Some(ChainHead {
            inner: RwLock::new(inner),
        }))
    }
}

impl BlockHashProvider for ChainHead {
    fn block_hash_at(&self, height: u64) -> Option<H256> {
        self.read().ok()?.heights.get(&height).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_storage::InMemoryStore;

    const KEY: [u8; 32] = [0x42; 32];

    fn genesis() -> Block {
        let mut block = Block::new(H256::zero(), 1_656_356_645_000_000_000, 0);
        block.finalize(&KEY).unwrap();
        block
    }

    fn child_of(parent: &Block) -> Block {
        let mut block = Block::new(
            parent.compute_hash(),
            parent.timestamp + 1_000_000_000,
            parent.height + 1,
        );
        block.finalize(&KEY).unwrap();
        block
    }

    #[test]
    fn latest_follows_appends() {
        let genesis = genesis();
        let head = ChainHead::new(genesis.clone());
        assert_eq!(head.latest().unwrap().height, 0);

        let block = child_of(&genesis);
        head.append(Arc::new(block.clone())).unwrap();
        assert_eq!(head.latest().unwrap().height, 1);
        assert_eq!(
            head.latest().unwrap().compute_hash(),
            block.compute_hash()
        );
    }

    #[test]
    fn append_rejects_broken_linkage() {
        let genesis = genesis();
        let head = ChainHead::new(genesis.clone());

        let mut orphan = child_of(&genesis);
        orphan.prev_hash = H256::repeat_byte(9);
        orphan.finalize(&KEY).unwrap();
        assert!(matches!(
            head.append(Arc::new(orphan)),
            Err(ChainError::InvalidBlock(InvalidBlockError::ParentMismatch))
        ));

        let mut skipper = child_of(&genesis);
        skipper.height = 5;
        skipper.finalize(&KEY).unwrap();
        assert!(matches!(
            head.append(Arc::new(skipper)),
            Err(ChainError::InvalidBlock(InvalidBlockError::WrongHeight { .. }))
        ));
    }

    #[test]
    fn every_block_links_to_its_parent() {
        let genesis = genesis();
        let head = ChainHead::new(genesis.clone());
        let b1 = child_of(&genesis);
        let b2 = child_of(&b1);
        head.append(Arc::new(b1)).unwrap();
        head.append(Arc::new(b2)).unwrap();

        for height in 1..=2 {
            let block = head.get_by_height(height).unwrap().unwrap();
            let parent = head.get_by_height(height - 1).unwrap().unwrap();
            assert_eq!(block.prev_hash, parent.compute_hash());
        }
    }

    #[test]
    fn dump_and_load_roundtrip() {
        let genesis = genesis();
        let head = ChainHead::new(genesis.clone());
        let b1 = child_of(&genesis);
        head.append(Arc::new(b1.clone())).unwrap();

        let db = InMemoryStore::new();
        head.dump_to_db(&db).unwrap();
        let loaded = ChainHead::load_from_db(&db).unwrap().unwrap();
        assert_eq!(loaded.latest().unwrap().compute_hash(), b1.compute_hash());
        assert!(loaded.exists(&genesis.compute_hash()).unwrap());
    }

    #[test]
    fn block_hash_provider_answers_committed_heights() {
        let genesis = genesis();
        let hash = genesis.compute_hash();
        let head = ChainHead::new(genesis);
        assert_eq!(head.block_hash_at(0), Some(hash));
        assert_eq!(head.block_hash_at(7), None);
    }
}
