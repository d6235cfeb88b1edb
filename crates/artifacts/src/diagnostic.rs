//! Debug-only diagnostic artifacts
//!
//! Opaque per-vat blobs (GC traces, heap dumps, profiler output) that only
//! the `debug` mode retains and exports.

use crate::keys;
use crate::records::DiagnosticInfo;
use tracing::debug;
use vatstore_core::{ContentHash, DiagnosticName, Error, Result, VatId};
use vatstore_storage::{HostTransaction, KvRead};

/// Diagnostic operations over a host transaction
#[derive(Debug, Clone, Copy, Default)]
pub struct DiagnosticStore;

impl DiagnosticStore {
    /// Store (or replace) a diagnostic blob
    pub fn record_diagnostic(
        &self,
        txn: &mut HostTransaction<'_>,
        vat_id: &VatId,
        name: &DiagnosticName,
        bytes: &[u8],
    ) {
        txn.put(keys::diagnostic(vat_id, name), bytes.to_vec());
        debug!(vat = %vat_id, name = %name, size = bytes.len(), "recorded diagnostic");
    }

    /// Bytes of a diagnostic blob
    pub fn read_diagnostic<K: KvRead + ?Sized>(
        &self,
        kv: &K,
        vat_id: &VatId,
        name: &DiagnosticName,
    ) -> Result<Vec<u8>> {
        kv.get(&keys::diagnostic(vat_id, name))?
            .ok_or_else(|| Error::not_found(format!("diagnostic {} of {}", name, vat_id)))
    }

    /// Every diagnostic of a vat in name order
    pub fn list_diagnostics<K: KvRead + ?Sized>(
        &self,
        kv: &K,
        vat_id: &VatId,
    ) -> Result<Vec<DiagnosticInfo>> {
        kv.scan_prefix(&keys::diagnostics_prefix(vat_id))?
            .into_iter()
            .map(|(key, bytes)| {
                let name = keys::last_segment(&key)
                    .ok_or_else(|| Error::Corruption(format!("bad diagnostic key {}", key)))?;
                Ok(DiagnosticInfo {
                    vat_id: vat_id.clone(),
                    name: DiagnosticName::new(name)?,
                    hash: ContentHash::of(&bytes),
                    size: bytes.len() as u64,
                })
            })
            .collect()
    }

    /// Remove one diagnostic blob
    pub fn remove(&self, txn: &mut HostTransaction<'_>, vat_id: &VatId, name: &DiagnosticName) {
        txn.delete(keys::diagnostic(vat_id, name));
    }

    /// Remove every diagnostic of a vat
    pub fn delete_vat_diagnostics(&self, txn: &mut HostTransaction<'_>, vat_id: &VatId) -> Result<usize> {
        txn.delete_prefix(&keys::diagnostics_prefix(vat_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vatstore_storage::{HostStoreExt, MemoryStore};

    #[test]
    fn test_record_list_remove() {
        let store = MemoryStore::new();
        let vat = VatId::new("v1").unwrap();
        let trace = DiagnosticName::new("gc-trace").unwrap();
        let dump = DiagnosticName::new("heap-dump").unwrap();

        let mut txn = store.begin();
        DiagnosticStore.record_diagnostic(&mut txn, &vat, &trace, b"gc");
        DiagnosticStore.record_diagnostic(&mut txn, &vat, &dump, b"dump");

        let listed = DiagnosticStore.list_diagnostics(&txn, &vat).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].name, trace);
        assert_eq!(listed[0].hash, ContentHash::of(b"gc"));

        DiagnosticStore.remove(&mut txn, &vat, &trace);
        assert!(DiagnosticStore
            .read_diagnostic(&txn, &vat, &trace)
            .unwrap_err()
            .is_not_found());
        assert_eq!(DiagnosticStore.delete_vat_diagnostics(&mut txn, &vat).unwrap(), 1);
    }
}
