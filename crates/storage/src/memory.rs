//! In-memory host store
//!
//! `MemoryStore` keeps committed state in a `BTreeMap` behind an `Arc`.
//! Readers clone the `Arc`; a commit copies the map only if a reader still
//! holds the previous one (`Arc::make_mut`). No files are created and all
//! data is lost when the store is dropped.

use crate::batch::{Mutation, WriteBatch};
use crate::traits::HostStore;
use crate::view::{ReadView, SharedMap};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use vatstore_core::{Error, Result};

struct State {
    data: SharedMap,
    version: u64,
}

/// Ephemeral host store
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::from_map(BTreeMap::new(), 0)
    }

    /// Create a store holding `data` at `version` (used by recovery)
    pub fn from_map(data: BTreeMap<String, Vec<u8>>, version: u64) -> Self {
        MemoryStore {
            state: RwLock::new(State {
                data: Arc::new(data),
                version,
            }),
        }
    }

    /// Number of committed keys
    pub fn len(&self) -> usize {
        self.state.read().data.len()
    }

    /// Whether the store holds no keys
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check the base version and apply a batch
    ///
    /// `persist` runs under the write lock after the conflict check and
    /// before the in-memory apply, so a failed persist leaves memory
    /// untouched.
    pub(crate) fn apply_with<F>(&self, batch: WriteBatch, base_version: u64, persist: F) -> Result<u64>
    where
        F: FnOnce(&WriteBatch, u64) -> Result<()>,
    {
        let mut state = self.state.write();
        if state.version != base_version {
            return Err(Error::TransactionConflict {
                base_version,
                current_version: state.version,
            });
        }
        let next_version = state.version + 1;
        persist(&batch, next_version)?;

        let data = Arc::make_mut(&mut state.data);
        for (key, mutation) in batch.into_mutations() {
            match mutation {
                Mutation::Put(value) => {
                    data.insert(key, value);
                }
                Mutation::Delete => {
                    data.remove(&key);
                }
            }
        }
        state.version = next_version;
        Ok(next_version)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl HostStore for MemoryStore {
    fn read_view(&self) -> ReadView {
        let state = self.state.read();
        ReadView::new(Arc::clone(&state.data), state.version)
    }

    fn commit(&self, batch: WriteBatch, base_version: u64) -> Result<u64> {
        self.apply_with(batch, base_version, |_, _| Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::HostStoreExt;
    use crate::view::KvRead;

    #[test]
    fn test_commit_increments_version() {
        let store = MemoryStore::new();
        let mut txn = store.begin();
        txn.put("k", b"v".to_vec());
        assert_eq!(txn.commit().unwrap(), 1);
        assert_eq!(store.version(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_view_is_isolated_from_later_commits() {
        let store = MemoryStore::new();
        let mut txn = store.begin();
        txn.put("k", b"old".to_vec());
        txn.commit().unwrap();

        let view = store.read_view();

        let mut txn = store.begin();
        txn.put("k", b"new".to_vec());
        txn.put("other", b"x".to_vec());
        txn.commit().unwrap();

        assert_eq!(view.get("k").unwrap(), Some(b"old".to_vec()));
        assert_eq!(view.get("other").unwrap(), None);
        assert_eq!(view.version(), 1);
        assert_eq!(store.read_view().get("k").unwrap(), Some(b"new".to_vec()));
    }

    #[test]
    fn test_failed_persist_leaves_state() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.put("k", b"v".to_vec());
        let result = store.apply_with(batch, 0, |_, _| Err(Error::Corruption("disk".into())));
        assert!(result.is_err());
        assert!(store.is_empty());
        assert_eq!(store.version(), 0);
    }
}
