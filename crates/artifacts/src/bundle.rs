//! Bundle store
//!
//! Bundles are write-once code packages addressed by content. Installing
//! the same bytes twice is a no-op that returns the same ID. Each bundle
//! carries an explicit owners set; a bundle with no owners is eligible for
//! pruning when the retention mode does not keep history.

use crate::keys;
use crate::records::{read_json, scan_json, write_json, BundleRecord};
use std::collections::BTreeSet;
use tracing::debug;
use vatstore_core::{BundleId, Error, Result, VatId};
use vatstore_storage::{HostTransaction, KvRead};

/// Bundle operations over a host transaction
#[derive(Debug, Clone, Copy, Default)]
pub struct BundleStore;

impl BundleStore {
    /// Install bundle bytes, returning their ID
    pub fn install_bundle(&self, txn: &mut HostTransaction<'_>, bytes: &[u8]) -> Result<BundleId> {
        let bundle_id = BundleId::for_bytes(bytes);
        if self.has_bundle(&*txn, &bundle_id)? {
            debug!(bundle = %bundle_id, "bundle already installed");
            return Ok(bundle_id);
        }
        let record = BundleRecord {
            bundle_id,
            size: bytes.len() as u64,
            owners: BTreeSet::new(),
        };
        txn.put(keys::bundle_data(&bundle_id), bytes.to_vec());
        write_json(txn, keys::bundle_meta(&bundle_id), &record)?;
        debug!(bundle = %bundle_id, size = record.size, "installed bundle");
        Ok(bundle_id)
    }

    /// Whether a bundle is installed
    pub fn has_bundle<K: KvRead + ?Sized>(&self, kv: &K, bundle_id: &BundleId) -> Result<bool> {
        kv.contains(&keys::bundle_meta(bundle_id))
    }

    /// Record of an installed bundle
    pub fn bundle_info<K: KvRead + ?Sized>(
        &self,
        kv: &K,
        bundle_id: &BundleId,
    ) -> Result<Option<BundleRecord>> {
        read_json(kv, &keys::bundle_meta(bundle_id))
    }

    fn require<K: KvRead + ?Sized>(&self, kv: &K, bundle_id: &BundleId) -> Result<BundleRecord> {
        self.bundle_info(kv, bundle_id)?
            .ok_or_else(|| Error::not_found(format!("bundle {}", bundle_id)))
    }

    /// Bytes of an installed bundle
    pub fn get_bundle<K: KvRead + ?Sized>(&self, kv: &K, bundle_id: &BundleId) -> Result<Vec<u8>> {
        let bytes = kv
            .get(&keys::bundle_data(bundle_id))?
            .ok_or_else(|| Error::not_found(format!("bundle {}", bundle_id)))?;
        let actual = BundleId::for_bytes(&bytes);
        if actual != *bundle_id {
            return Err(Error::Corruption(format!(
                "bundle {} holds bytes of {}",
                bundle_id, actual
            )));
        }
        Ok(bytes)
    }

    /// Every installed bundle in ID order
    pub fn list_bundles<K: KvRead + ?Sized>(&self, kv: &K) -> Result<Vec<BundleRecord>> {
        scan_json(kv, keys::BUNDLE_META)
    }

    /// Add `vat_id` to the bundle's owners; returns whether it was added
    pub fn retain_bundle(
        &self,
        txn: &mut HostTransaction<'_>,
        bundle_id: &BundleId,
        vat_id: &VatId,
    ) -> Result<bool> {
        let mut record = self.require(&*txn, bundle_id)?;
        let added = record.owners.insert(vat_id.clone());
        if added {
            write_json(txn, keys::bundle_meta(bundle_id), &record)?;
            debug!(bundle = %bundle_id, vat = %vat_id, "retained bundle");
        }
        Ok(added)
    }

    /// Remove `vat_id` from the bundle's owners; returns whether it was removed
    pub fn release_bundle(
        &self,
        txn: &mut HostTransaction<'_>,
        bundle_id: &BundleId,
        vat_id: &VatId,
    ) -> Result<bool> {
        let mut record = self.require(&*txn, bundle_id)?;
        let removed = record.owners.remove(vat_id);
        if removed {
            write_json(txn, keys::bundle_meta(bundle_id), &record)?;
            debug!(bundle = %bundle_id, vat = %vat_id, "released bundle");
        }
        Ok(removed)
    }

    /// Release every bundle a vat retains; returns how many were released
    pub fn release_all(&self, txn: &mut HostTransaction<'_>, vat_id: &VatId) -> Result<usize> {
        let held: Vec<BundleId> = self
            .list_bundles(&*txn)?
            .into_iter()
            .filter(|record| record.owners.contains(vat_id))
            .map(|record| record.bundle_id)
            .collect();
        for bundle_id in &held {
            self.release_bundle(txn, bundle_id, vat_id)?;
        }
        Ok(held.len())
    }

    /// Remove a bundle's record and bytes
    pub(crate) fn remove(&self, txn: &mut HostTransaction<'_>, bundle_id: &BundleId) {
        txn.delete(keys::bundle_meta(bundle_id));
        txn.delete(keys::bundle_data(bundle_id));
    }

    /// Store exported bundle bytes after checking them against `record`
    pub fn import_bundle(
        &self,
        txn: &mut HostTransaction<'_>,
        record: &BundleRecord,
        bytes: &[u8],
    ) -> Result<()> {
        let actual = BundleId::for_bytes(bytes);
        if actual != record.bundle_id {
            return Err(Error::hash_mismatch(
                record.artifact_name().to_string(),
                record.bundle_id.content_hash(),
                actual.content_hash(),
            ));
        }
        if bytes.len() as u64 != record.size {
            return Err(Error::inconsistent(
                record.artifact_name().to_string(),
                format!("bundle is {} bytes, record says {}", bytes.len(), record.size),
            ));
        }
        txn.put(keys::bundle_data(&record.bundle_id), bytes.to_vec());
        write_json(txn, keys::bundle_meta(&record.bundle_id), record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vatstore_storage::{HostStore, HostStoreExt, MemoryStore};

    fn vat(id: &str) -> VatId {
        VatId::new(id).unwrap()
    }

    #[test]
    fn test_install_is_idempotent() {
        let store = MemoryStore::new();
        let bundles = BundleStore;
        let mut txn = store.begin();
        let first = bundles.install_bundle(&mut txn, b"export default 1").unwrap();
        txn.commit().unwrap();
        let keys_after_first = store.read_view().len();

        let mut txn = store.begin();
        let second = bundles.install_bundle(&mut txn, b"export default 1").unwrap();
        assert!(txn.pending().is_empty());
        txn.commit().unwrap();

        assert_eq!(first, second);
        assert_eq!(store.read_view().len(), keys_after_first);
        assert!(first.to_string().starts_with("b1-"));
    }

    #[test]
    fn test_zero_length_bundle() {
        let store = MemoryStore::new();
        let mut txn = store.begin();
        let id = BundleStore.install_bundle(&mut txn, b"").unwrap();
        assert_eq!(BundleStore.get_bundle(&txn, &id).unwrap(), Vec::<u8>::new());
        assert_eq!(BundleStore.bundle_info(&txn, &id).unwrap().unwrap().size, 0);
    }

    #[test]
    fn test_missing_bundle() {
        let store = MemoryStore::new();
        let view = store.read_view();
        let id = BundleId::for_bytes(b"never installed");
        assert!(BundleStore.get_bundle(&view, &id).unwrap_err().is_not_found());
        assert!(!BundleStore.has_bundle(&view, &id).unwrap());

        let mut txn = store.begin();
        assert!(BundleStore
            .retain_bundle(&mut txn, &id, &vat("v1"))
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_owners() {
        let store = MemoryStore::new();
        let bundles = BundleStore;
        let mut txn = store.begin();
        let id = bundles.install_bundle(&mut txn, b"code").unwrap();
        assert!(bundles.retain_bundle(&mut txn, &id, &vat("v1")).unwrap());
        assert!(!bundles.retain_bundle(&mut txn, &id, &vat("v1")).unwrap());
        assert!(bundles.retain_bundle(&mut txn, &id, &vat("v2")).unwrap());
        assert!(bundles.release_bundle(&mut txn, &id, &vat("v1")).unwrap());

        let record = bundles.bundle_info(&txn, &id).unwrap().unwrap();
        assert_eq!(record.owners.into_iter().collect::<Vec<_>>(), vec![vat("v2")]);

        assert_eq!(bundles.release_all(&mut txn, &vat("v2")).unwrap(), 1);
        assert!(!bundles.bundle_info(&txn, &id).unwrap().unwrap().is_retained());
    }

    #[test]
    fn test_import_checks_id() {
        let store = MemoryStore::new();
        let record = BundleRecord {
            bundle_id: BundleId::for_bytes(b"real"),
            size: 4,
            owners: BTreeSet::new(),
        };
        let mut txn = store.begin();
        assert!(matches!(
            BundleStore.import_bundle(&mut txn, &record, b"fake"),
            Err(Error::HashMismatch { .. })
        ));
        BundleStore.import_bundle(&mut txn, &record, b"real").unwrap();
        assert_eq!(BundleStore.list_bundles(&txn).unwrap(), vec![record]);
    }
}
