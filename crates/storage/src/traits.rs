//! Host store interface
//!
//! The artifact stores never write directly. Every mutation is staged in a
//! `HostTransaction` and reaches the host store as one [`WriteBatch`]
//! through [`HostStore::commit`], which must apply the whole batch
//! atomically and durably, or not at all.

use crate::batch::WriteBatch;
use crate::transaction::HostTransaction;
use crate::view::ReadView;
use vatstore_core::Result;

/// Transactional ordered key-value store the artifact layer rides on
pub trait HostStore: Send + Sync {
    /// Immutable view of the last committed state
    fn read_view(&self) -> ReadView;

    /// Atomically apply a batch staged against `base_version`
    ///
    /// Returns the new commit version. Fails with `TransactionConflict` if
    /// another commit landed after `base_version`.
    fn commit(&self, batch: WriteBatch, base_version: u64) -> Result<u64>;

    /// Version of the last committed state
    fn version(&self) -> u64 {
        self.read_view().version()
    }

    /// Force buffered commits to stable storage
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Convenience for starting transactions on any host store
pub trait HostStoreExt: HostStore {
    /// Begin a transaction against the current committed state
    fn begin(&self) -> HostTransaction<'_>
    where
        Self: Sized,
    {
        HostTransaction::begin(self)
    }
}

impl<T: HostStore> HostStoreExt for T {}
