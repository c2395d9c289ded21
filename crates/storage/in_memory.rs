use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};

use tracing::debug;

use crate::{
    api::{KvStore, WriteBatch},
    error::StoreError,
    keys::DbPrefix,
};

/// Sorted in-memory backend. Prefix scans are range scans over the
/// underlying `BTreeMap`.
#[derive(Clone, Debug, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<BTreeMap<Vec<u8>, Vec<u8>>>>,
    // Serializes write_batch/read_batch; single-key ops bypass it.
    batch_lock: Arc<Mutex<()>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> Result<MutexGuard<'_, BTreeMap<Vec<u8>, Vec<u8>>>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::LockError)
    }
}

fn prefixed(key: &[u8], prefix: DbPrefix) -> Vec<u8> {
    let tag = prefix.tag();
    let mut full = Vec::with_capacity(tag.len() + key.len());
    full.extend_from_slice(&tag);
    full.extend_from_slice(key);
    full
}

impl KvStore for InMemoryStore {
    fn has(&self, key: &[u8], prefix: DbPrefix) -> Result<bool, StoreError> {
        Ok(self.inner()?.contains_key(&prefixed(key, prefix)))
    }

    fn get(&self, key: &[u8], prefix: DbPrefix) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.inner()?.get(&prefixed(key, prefix)).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8], prefix: DbPrefix) -> Result<(), StoreError> {
        self.inner()?.insert(prefixed(key, prefix), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8], prefix: DbPrefix) -> Result<(), StoreError> {
        self.inner()?.remove(&prefixed(key, prefix));
        Ok(())
    }

    fn write_batch(&self, batch: WriteBatch, prefix: DbPrefix) -> Result<(), StoreError> {
        let _guard = self.batch_lock.lock().map_err(|_| StoreError::LockError)?;
        debug!(
            puts = batch.puts.len(),
            deletes = batch.deletes.len(),
            ?prefix,
            "writing batch"
        );
        let mut inner = self.inner()?;
        for (key, value) in batch.puts {
            inner.insert(prefixed(&key, prefix), value);
        }
        for key in batch.deletes {
            inner.remove(&prefixed(&key, prefix));
        }
        Ok(())
    }

    fn read_batch(&self, prefix: DbPrefix) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let _guard = self.batch_lock.lock().map_err(|_| StoreError::LockError)?;
        let tag = prefix.tag();
        let mut upper = tag;
        // Tags are ASCII, so this cannot wrap.
        upper[3] += 1;
        let inner = self.inner()?;
        Ok(inner
            .range(tag.to_vec()..upper.to_vec())
            .map(|(key, value)| (key[tag.len()..].to_vec(), value.clone()))
            .collect())
    }
}
