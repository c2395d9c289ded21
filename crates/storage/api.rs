use crate::{error::StoreError, keys::DbPrefix};

/// A batch of writes applied under one lock acquisition.
///
/// If any single put fails the whole batch fails; the backend may leave a
/// partial write behind, so callers must treat the store as suspect and
/// abort on error.
#[derive(Debug, Default)]
pub struct WriteBatch {
    pub puts: Vec<(Vec<u8>, Vec<u8>)>,
    pub deletes: Vec<Vec<u8>>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.puts.push((key.into(), value.into()));
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.deletes.push(key.into());
    }

    pub fn is_empty(&self) -> bool {
        self.puts.is_empty() && self.deletes.is_empty()
    }
}

/// Prefixed access to a sorted byte-oriented key-value store.
///
/// Single-key operations are not atomic with respect to batches; callers
/// must not interleave them concurrently on overlapping keys.
pub trait KvStore: Send + Sync {
    fn has(&self, key: &[u8], prefix: DbPrefix) -> Result<bool, StoreError>;

    fn get(&self, key: &[u8], prefix: DbPrefix) -> Result<Option<Vec<u8>>, StoreError>;

    fn put(&self, key: &[u8], value: &[u8], prefix: DbPrefix) -> Result<(), StoreError>;

    fn delete(&self, key: &[u8], prefix: DbPrefix) -> Result<(), StoreError>;

    /// Applies all puts, then all deletes, serialized by the batch mutex.
    fn write_batch(&self, batch: WriteBatch, prefix: DbPrefix) -> Result<(), StoreError>;

    /// Returns every entry under `prefix`, with the prefix stripped from
    /// the returned keys.
    fn read_batch(&self, prefix: DbPrefix) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;
}
