//! Host transactions
//!
//! A [`HostTransaction`] pairs a read view with a [`WriteBatch`]. Reads see
//! the transaction's own staged writes on top of the committed state;
//! nothing is visible to anyone else until [`HostTransaction::commit`].
//! Dropping a transaction without committing discards it.
//!
//! ```text
//! begin()  ──►  get / scan (view + batch)  ──►  put / delete (batch)
//!                                                  │
//!                              commit(): store.commit(batch)  or  abort()
//! ```

use crate::batch::{Mutation, WriteBatch};
use crate::traits::HostStore;
use crate::view::{KvRead, ReadView};
use std::collections::BTreeMap;
use tracing::debug;
use vatstore_core::Result;

/// Staged mutations over a committed view
pub struct HostTransaction<'a> {
    store: &'a dyn HostStore,
    base: ReadView,
    batch: WriteBatch,
}

impl<'a> HostTransaction<'a> {
    /// Begin a transaction against the store's current state
    pub fn begin(store: &'a dyn HostStore) -> Self {
        let base = store.read_view();
        HostTransaction {
            store,
            base,
            batch: WriteBatch::new(),
        }
    }

    /// Store version this transaction reads from
    pub fn base_version(&self) -> u64 {
        self.base.version()
    }

    /// Stage a put
    pub fn put(&mut self, key: impl Into<String>, value: Vec<u8>) {
        self.batch.put(key, value);
    }

    /// Stage a delete
    pub fn delete(&mut self, key: impl Into<String>) {
        self.batch.delete(key);
    }

    /// Stage every key under a prefix for deletion
    ///
    /// Returns the number of keys removed.
    pub fn delete_prefix(&mut self, prefix: &str) -> Result<usize> {
        let keys: Vec<String> = self.scan_prefix(prefix)?.into_iter().map(|(k, _)| k).collect();
        let count = keys.len();
        for key in keys {
            self.batch.delete(key);
        }
        Ok(count)
    }

    /// Fold a batch staged elsewhere into this transaction
    pub fn stage(&mut self, batch: WriteBatch) {
        self.batch.merge(batch);
    }

    /// Mutations staged so far
    pub fn pending(&self) -> &WriteBatch {
        &self.batch
    }

    /// Take the staged mutations without committing them
    pub fn into_batch(self) -> WriteBatch {
        self.batch
    }

    /// Apply all staged mutations atomically
    pub fn commit(self) -> Result<u64> {
        if self.batch.is_empty() {
            return Ok(self.base.version());
        }
        let staged = self.batch.len();
        let version = self.store.commit(self.batch, self.base.version())?;
        debug!(staged, version, "committed host transaction");
        Ok(version)
    }

    /// Discard all staged mutations
    pub fn abort(self) {
        debug!(discarded = self.batch.len(), "aborted host transaction");
    }
}

impl KvRead for HostTransaction<'_> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.batch.get(key) {
            Some(Mutation::Put(value)) => Ok(Some(value.clone())),
            Some(Mutation::Delete) => Ok(None),
            None => self.base.get(key),
        }
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let mut merged: BTreeMap<String, Vec<u8>> = self
            .base
            .range_prefix(prefix)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (key, mutation) in self.batch.prefix(prefix) {
            match mutation {
                Mutation::Put(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                Mutation::Delete => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::traits::HostStoreExt;
    use vatstore_core::Error;

    #[test]
    fn test_reads_see_own_writes() {
        let store = MemoryStore::new();
        let mut txn = store.begin();
        txn.put("a", b"1".to_vec());
        assert_eq!(txn.get("a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.read_view().get("a").unwrap(), None);
    }

    #[test]
    fn test_scan_merges_batch_and_base() {
        let store = MemoryStore::new();
        let mut setup = store.begin();
        setup.put("p.1", b"base".to_vec());
        setup.put("p.2", b"base".to_vec());
        setup.commit().unwrap();

        let mut txn = store.begin();
        txn.delete("p.1");
        txn.put("p.3", b"new".to_vec());
        txn.put("p.2", b"updated".to_vec());
        let scanned = txn.scan_prefix("p.").unwrap();
        assert_eq!(
            scanned,
            vec![
                ("p.2".to_string(), b"updated".to_vec()),
                ("p.3".to_string(), b"new".to_vec()),
            ]
        );
    }

    #[test]
    fn test_abort_leaves_store_untouched() {
        let store = MemoryStore::new();
        let mut txn = store.begin();
        txn.put("a", b"1".to_vec());
        txn.abort();
        assert!(store.read_view().is_empty());
        assert_eq!(store.version(), 0);
    }

    #[test]
    fn test_drop_without_commit_discards() {
        let store = MemoryStore::new();
        {
            let mut txn = store.begin();
            txn.put("a", b"1".to_vec());
        }
        assert!(store.read_view().is_empty());
    }

    #[test]
    fn test_empty_commit_keeps_version() {
        let store = MemoryStore::new();
        let txn = store.begin();
        assert_eq!(txn.commit().unwrap(), 0);
        assert_eq!(store.version(), 0);
    }

    #[test]
    fn test_stale_transaction_conflicts() {
        let store = MemoryStore::new();
        let mut first = store.begin();
        let mut second = store.begin();
        first.put("a", b"1".to_vec());
        second.put("b", b"2".to_vec());
        first.commit().unwrap();
        let err = second.commit().unwrap_err();
        assert!(matches!(
            err,
            Error::TransactionConflict {
                base_version: 0,
                current_version: 1
            }
        ));
        assert_eq!(store.read_view().get("b").unwrap(), None);
    }

    #[test]
    fn test_delete_prefix() {
        let store = MemoryStore::new();
        let mut setup = store.begin();
        setup.put("x.1", vec![]);
        setup.put("x.2", vec![]);
        setup.put("y.1", vec![]);
        setup.commit().unwrap();

        let mut txn = store.begin();
        assert_eq!(txn.delete_prefix("x.").unwrap(), 2);
        txn.commit().unwrap();
        let view = store.read_view();
        assert!(view.scan_prefix("x.").unwrap().is_empty());
        assert!(view.contains("y.1").unwrap());
    }
}
