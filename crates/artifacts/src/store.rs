//! Artifact store facade
//!
//! [`ArtifactStore`] owns the host store and the per-kind stores configured
//! from a [`StoreConfig`]. All mutation goes through a [`Crank`]: one host
//! transaction collecting every transcript, snapshot, bundle and diagnostic
//! write of a unit of kernel execution. Committing the crank hands the whole
//! batch to the host store at once; dropping it without committing discards
//! everything.
//!
//! ```text
//! let mut crank = store.begin_crank();
//! crank.append_entry(&v7, 10, &entry)?;
//! crank.save_snapshot(&v7, &heap, 11)?;
//! crank.commit()?;
//! ```
//!
//! Reads outside a crank go through an [`ArtifactReader`], a consistent
//! view of the last committed state.

use crate::bundle::BundleStore;
use crate::diagnostic::DiagnosticStore;
use crate::inventory::{list_vats, Inventory, VatInventory};
use crate::records::{BundleRecord, DiagnosticInfo, SnapshotRecord, SpanRecord};
use crate::retention::{self, CompactionReport};
use crate::snapshot::SnapshotStore;
use crate::transcript::{SpanState, TranscriptStore};
use std::sync::Arc;
use tracing::{debug, info};
use vatstore_core::{
    ArtifactMode, BundleId, ContentHash, DiagnosticName, Error, Result, StoreConfig,
    TranscriptEntry, VatId,
};
use vatstore_storage::{HostStore, HostTransaction, ReadView};

/// Transcript, snapshot and bundle storage over a host store
pub struct ArtifactStore {
    host: Arc<dyn HostStore>,
    config: StoreConfig,
    transcripts: TranscriptStore,
    snapshots: SnapshotStore,
}

impl ArtifactStore {
    /// Wrap a host store, validating the configuration
    pub fn new(host: Arc<dyn HostStore>, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        Ok(ArtifactStore {
            host,
            transcripts: TranscriptStore::new(config.max_span_entries),
            snapshots: SnapshotStore::new(config.compress_snapshots, config.compression_level),
            config,
        })
    }

    /// Active configuration
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Underlying host store
    pub fn host(&self) -> &Arc<dyn HostStore> {
        &self.host
    }

    /// Transcript operations
    pub fn transcripts(&self) -> &TranscriptStore {
        &self.transcripts
    }

    /// Snapshot operations
    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    /// Start a crank
    pub fn begin_crank(&self) -> Crank<'_> {
        Crank {
            store: self,
            txn: HostTransaction::begin(self.host.as_ref()),
        }
    }

    /// Consistent view of the last committed state
    pub fn reader(&self) -> ArtifactReader {
        ArtifactReader {
            view: self.host.read_view(),
            transcripts: self.transcripts,
            snapshots: self.snapshots,
        }
    }

    /// Compact every vat under the configured retention mode
    pub fn compact(&self) -> Result<CompactionReport> {
        let mut crank = self.begin_crank();
        let report = crank.compact_all()?;
        crank.commit()?;
        Ok(report)
    }
}

impl std::fmt::Debug for ArtifactStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactStore")
            .field("version", &self.host.version())
            .field("config", &self.config)
            .finish()
    }
}

/// Read-only access to committed artifacts
#[derive(Debug, Clone)]
pub struct ArtifactReader {
    view: ReadView,
    transcripts: TranscriptStore,
    snapshots: SnapshotStore,
}

impl ArtifactReader {
    /// The underlying key-value view
    pub fn view(&self) -> &ReadView {
        &self.view
    }

    /// Store version the reader observes
    pub fn version(&self) -> u64 {
        self.view.version()
    }

    /// Entries of a span
    pub fn read_span(&self, vat_id: &VatId, start_pos: u64) -> Result<Vec<TranscriptEntry>> {
        self.transcripts.read_span(&self.view, vat_id, start_pos)
    }

    /// A vat's open span
    pub fn current_span(&self, vat_id: &VatId) -> Result<Option<SpanRecord>> {
        self.transcripts.current_span(&self.view, vat_id)
    }

    /// Record of the span starting at `start_pos`
    pub fn span(&self, vat_id: &VatId, start_pos: u64) -> Result<Option<SpanRecord>> {
        self.transcripts.span(&self.view, vat_id, start_pos)
    }

    /// Byte form of a span, re-hashed against its record
    pub fn export_span(&self, span: &SpanRecord) -> Result<Vec<u8>> {
        self.transcripts.export_span(&self.view, span)
    }

    /// Every span of a vat
    pub fn list_spans(&self, vat_id: &VatId) -> Result<Vec<SpanRecord>> {
        self.transcripts.list_spans(&self.view, vat_id)
    }

    /// Transcript lifecycle state of a vat
    pub fn span_state(&self, vat_id: &VatId) -> Result<SpanState> {
        self.transcripts.state(&self.view, vat_id)
    }

    /// Heap and record of a vat's active snapshot
    pub fn load_active_snapshot(&self, vat_id: &VatId) -> Result<(Vec<u8>, SnapshotRecord)> {
        self.snapshots.load_active_snapshot(&self.view, vat_id)
    }

    /// Record of the snapshot at `position`
    pub fn snapshot_info(&self, vat_id: &VatId, position: u64) -> Result<Option<SnapshotRecord>> {
        self.snapshots.snapshot_info(&self.view, vat_id, position)
    }

    /// Uncompressed heap of any stored snapshot
    pub fn read_heap(&self, record: &SnapshotRecord) -> Result<Vec<u8>> {
        self.snapshots.read_heap(&self.view, record)
    }

    /// Every snapshot record of a vat
    pub fn list_snapshots(&self, vat_id: &VatId) -> Result<Vec<SnapshotRecord>> {
        self.snapshots.list_snapshots(&self.view, vat_id)
    }

    /// Bytes of a bundle
    pub fn get_bundle(&self, bundle_id: &BundleId) -> Result<Vec<u8>> {
        BundleStore.get_bundle(&self.view, bundle_id)
    }

    /// Whether a bundle is installed
    pub fn has_bundle(&self, bundle_id: &BundleId) -> Result<bool> {
        BundleStore.has_bundle(&self.view, bundle_id)
    }

    /// Record of a bundle
    pub fn bundle_info(&self, bundle_id: &BundleId) -> Result<Option<BundleRecord>> {
        BundleStore.bundle_info(&self.view, bundle_id)
    }

    /// Every installed bundle
    pub fn list_bundles(&self) -> Result<Vec<BundleRecord>> {
        BundleStore.list_bundles(&self.view)
    }

    /// Bytes of a diagnostic
    pub fn read_diagnostic(&self, vat_id: &VatId, name: &DiagnosticName) -> Result<Vec<u8>> {
        DiagnosticStore.read_diagnostic(&self.view, vat_id, name)
    }

    /// Every diagnostic of a vat
    pub fn list_diagnostics(&self, vat_id: &VatId) -> Result<Vec<DiagnosticInfo>> {
        DiagnosticStore.list_diagnostics(&self.view, vat_id)
    }

    /// Every vat with records
    pub fn list_vats(&self) -> Result<Vec<VatId>> {
        list_vats(&self.view)
    }

    /// Records of one vat
    pub fn vat_inventory(&self, vat_id: &VatId) -> Result<VatInventory> {
        VatInventory::collect(&self.view, vat_id)
    }

    /// Every artifact record
    pub fn inventory(&self) -> Result<Inventory> {
        Inventory::collect(&self.view)
    }
}

/// One atomic unit of artifact mutations
///
/// Any error returned by a crank operation is crank-fatal: the caller
/// should drop or [`abort`](Crank::abort) the crank.
pub struct Crank<'a> {
    store: &'a ArtifactStore,
    txn: HostTransaction<'a>,
}

impl<'a> Crank<'a> {
    /// Create a vat's transcript
    pub fn init_vat(&mut self, vat_id: &VatId) -> Result<SpanRecord> {
        self.store.transcripts.init_vat(&mut self.txn, vat_id)
    }

    /// Append a transcript entry at `position`
    pub fn append_entry(
        &mut self,
        vat_id: &VatId,
        position: u64,
        entry: &TranscriptEntry,
    ) -> Result<u64> {
        self.store
            .transcripts
            .append_entry(&mut self.txn, vat_id, position, entry)
    }

    /// Close the open span at `new_position` and open the next
    pub fn rollover_span(&mut self, vat_id: &VatId, new_position: u64) -> Result<SpanRecord> {
        self.store
            .transcripts
            .rollover_span(&mut self.txn, vat_id, new_position)
    }

    /// Start a new incarnation (vat upgrade)
    ///
    /// The previous incarnation's active snapshot stops being the restart
    /// baseline.
    pub fn rollover_incarnation(&mut self, vat_id: &VatId) -> Result<u64> {
        let incarnation = self
            .store
            .transcripts
            .rollover_incarnation(&mut self.txn, vat_id)?;
        self.store
            .snapshots
            .stop_using_last_snapshot(&mut self.txn, vat_id)?;
        Ok(incarnation)
    }

    /// Save a heap snapshot at `at_position`
    pub fn save_snapshot(
        &mut self,
        vat_id: &VatId,
        heap: &[u8],
        at_position: u64,
    ) -> Result<SnapshotRecord> {
        let record = self.store.snapshots.save_snapshot(
            &mut self.txn,
            &self.store.transcripts,
            vat_id,
            heap,
            at_position,
        )?;
        if self.store.config.compact_on_snapshot {
            self.compact_vat(vat_id)?;
        }
        Ok(record)
    }

    /// Heap and record of a vat's active snapshot, including this crank's writes
    pub fn load_active_snapshot(&self, vat_id: &VatId) -> Result<(Vec<u8>, SnapshotRecord)> {
        self.store.snapshots.load_active_snapshot(&self.txn, vat_id)
    }

    /// Clear a vat's active snapshot marker
    pub fn stop_using_last_snapshot(&mut self, vat_id: &VatId) -> Result<Option<SnapshotRecord>> {
        self.store
            .snapshots
            .stop_using_last_snapshot(&mut self.txn, vat_id)
    }

    /// Remove a superseded snapshot the retention mode does not require
    pub fn prune_snapshot(&mut self, vat_id: &VatId, snapshot_id: &ContentHash) -> Result<()> {
        retention::prune_snapshot(
            &mut self.txn,
            &self.store.snapshots,
            vat_id,
            snapshot_id,
            self.store.config.artifact_mode,
        )
    }

    /// Install bundle bytes
    pub fn install_bundle(&mut self, bytes: &[u8]) -> Result<BundleId> {
        BundleStore.install_bundle(&mut self.txn, bytes)
    }

    /// Bytes of a bundle, including this crank's installs
    pub fn get_bundle(&self, bundle_id: &BundleId) -> Result<Vec<u8>> {
        BundleStore.get_bundle(&self.txn, bundle_id)
    }

    /// Mark a bundle as used by a vat
    ///
    /// Only a live vat can take a reference; owners of a bundle are always
    /// vats with a transcript.
    pub fn retain_bundle(&mut self, bundle_id: &BundleId, vat_id: &VatId) -> Result<bool> {
        if !matches!(
            self.store.transcripts.state(&self.txn, vat_id)?,
            SpanState::Open(_)
        ) {
            return Err(Error::NoActiveSpan {
                vat_id: vat_id.clone(),
            });
        }
        BundleStore.retain_bundle(&mut self.txn, bundle_id, vat_id)
    }

    /// Drop a vat's use of a bundle
    pub fn release_bundle(&mut self, bundle_id: &BundleId, vat_id: &VatId) -> Result<bool> {
        BundleStore.release_bundle(&mut self.txn, bundle_id, vat_id)
    }

    /// Remove an unretained bundle the retention mode does not require
    pub fn prune_bundle(&mut self, bundle_id: &BundleId) -> Result<()> {
        retention::prune_bundle(
            &mut self.txn,
            &BundleStore,
            bundle_id,
            self.store.config.artifact_mode,
        )
    }

    /// Store a debug-only diagnostic blob for a vat
    ///
    /// The vat must have a transcript, live or stopped. Fails with
    /// `NotFound` otherwise.
    pub fn record_diagnostic(
        &mut self,
        vat_id: &VatId,
        name: &DiagnosticName,
        bytes: &[u8],
    ) -> Result<()> {
        if let SpanState::NoSpan = self.store.transcripts.state(&self.txn, vat_id)? {
            return Err(Error::not_found(format!("vat {}", vat_id)));
        }
        DiagnosticStore.record_diagnostic(&mut self.txn, vat_id, name, bytes);
        Ok(())
    }

    /// Entries of a span, including this crank's appends
    pub fn read_span(&self, vat_id: &VatId, start_pos: u64) -> Result<Vec<TranscriptEntry>> {
        self.store.transcripts.read_span(&self.txn, vat_id, start_pos)
    }

    /// A vat's open span, including this crank's appends
    pub fn current_span(&self, vat_id: &VatId) -> Result<Option<SpanRecord>> {
        self.store.transcripts.current_span(&self.txn, vat_id)
    }

    /// Stop a vat: close its transcript, clear its snapshot, release its bundles
    pub fn terminate_vat(&mut self, vat_id: &VatId) -> Result<()> {
        self.store
            .transcripts
            .stop_using_transcript(&mut self.txn, vat_id)?;
        self.store
            .snapshots
            .stop_using_last_snapshot(&mut self.txn, vat_id)?;
        let released = BundleStore.release_all(&mut self.txn, vat_id)?;
        info!(vat = %vat_id, released, "terminated vat");
        Ok(())
    }

    /// Remove every artifact of a terminated vat
    pub fn delete_vat(&mut self, vat_id: &VatId) -> Result<()> {
        let store = self.store;
        store.transcripts.delete_vat_transcript(&mut self.txn, vat_id)?;
        store.snapshots.delete_vat_snapshots(&mut self.txn, vat_id)?;
        DiagnosticStore.delete_vat_diagnostics(&mut self.txn, vat_id)?;
        Ok(())
    }

    /// Compact one vat under the configured retention mode
    pub fn compact_vat(&mut self, vat_id: &VatId) -> Result<CompactionReport> {
        self.compact_vat_as(vat_id, self.store.config.artifact_mode)
    }

    /// Compact one vat under an explicit retention mode
    pub fn compact_vat_as(&mut self, vat_id: &VatId, mode: ArtifactMode) -> Result<CompactionReport> {
        retention::compact_vat(&mut self.txn, &self.store.transcripts, vat_id, mode)
    }

    /// Compact every vat under the configured retention mode
    pub fn compact_all(&mut self) -> Result<CompactionReport> {
        retention::compact_all(
            &mut self.txn,
            &self.store.transcripts,
            self.store.config.artifact_mode,
        )
    }

    /// Reads that observe this crank's staged writes
    pub fn view(&self) -> &HostTransaction<'a> {
        &self.txn
    }

    /// Commit every staged mutation atomically
    pub fn commit(self) -> Result<u64> {
        let version = self.txn.commit()?;
        debug!(version, "committed crank");
        Ok(version)
    }

    /// Discard every staged mutation
    pub fn abort(self) {
        self.txn.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vatstore_storage::MemoryStore;

    fn vat() -> VatId {
        VatId::new("v7").unwrap()
    }

    fn entry(n: u64) -> TranscriptEntry {
        TranscriptEntry::new(n, json!({"n": n}))
    }

    fn store(config: StoreConfig) -> ArtifactStore {
        ArtifactStore::new(Arc::new(MemoryStore::new()), config).unwrap()
    }

    #[test]
    fn test_crank_commit_is_atomic() {
        let store = store(StoreConfig::default());
        let mut crank = store.begin_crank();
        crank.init_vat(&vat()).unwrap();
        crank.append_entry(&vat(), 0, &entry(0)).unwrap();
        let id = crank.install_bundle(b"code").unwrap();
        assert!(store.reader().current_span(&vat()).unwrap().is_none());
        assert_eq!(crank.get_bundle(&id).unwrap(), b"code");
        crank.commit().unwrap();

        let reader = store.reader();
        assert_eq!(reader.read_span(&vat(), 0).unwrap(), vec![entry(0)]);
        assert!(reader.has_bundle(&id).unwrap());
    }

    #[test]
    fn test_dropped_crank_leaves_nothing() {
        let store = store(StoreConfig::default());
        {
            let mut crank = store.begin_crank();
            crank.init_vat(&vat()).unwrap();
            crank.append_entry(&vat(), 0, &entry(0)).unwrap();
        }
        assert_eq!(store.host().version(), 0);
        assert!(store.reader().list_vats().unwrap().is_empty());
    }

    #[test]
    fn test_compact_on_snapshot() {
        let config = StoreConfig {
            compact_on_snapshot: true,
            ..StoreConfig::default()
        };
        let store = store(config);
        let mut crank = store.begin_crank();
        crank.init_vat(&vat()).unwrap();
        for pos in 0..3 {
            crank.append_entry(&vat(), pos, &entry(pos)).unwrap();
        }
        crank.save_snapshot(&vat(), b"heap", 3).unwrap();
        crank.commit().unwrap();

        let reader = store.reader();
        assert!(reader.read_span(&vat(), 0).unwrap_err().is_not_found());
        assert_eq!(reader.load_active_snapshot(&vat()).unwrap().1.position, 3);
    }

    #[test]
    fn test_incarnation_clears_active_snapshot() {
        let store = store(StoreConfig::default());
        let mut crank = store.begin_crank();
        crank.init_vat(&vat()).unwrap();
        crank.append_entry(&vat(), 0, &entry(0)).unwrap();
        crank.save_snapshot(&vat(), b"heap", 1).unwrap();
        assert_eq!(crank.rollover_incarnation(&vat()).unwrap(), 1);
        assert!(crank.load_active_snapshot(&vat()).unwrap_err().is_not_found());
    }

    #[test]
    fn test_unknown_vat_cannot_retain_or_record() {
        let store = store(StoreConfig::default());
        let stranger = VatId::new("v99").unwrap();
        let mut crank = store.begin_crank();
        let id = crank.install_bundle(b"code").unwrap();
        assert!(matches!(
            crank.retain_bundle(&id, &stranger),
            Err(Error::NoActiveSpan { .. })
        ));
        let err = crank
            .record_diagnostic(&stranger, &DiagnosticName::new("trace").unwrap(), b"t")
            .unwrap_err();
        assert!(err.is_not_found());
        crank.commit().unwrap();

        let reader = store.reader();
        assert!(reader.list_vats().unwrap().is_empty());
        assert!(!reader.bundle_info(&id).unwrap().unwrap().is_retained());
    }

    #[test]
    fn test_stopped_vat_keeps_diagnostics_but_not_bundles() {
        let store = store(StoreConfig::default());
        let mut crank = store.begin_crank();
        crank.init_vat(&vat()).unwrap();
        let id = crank.install_bundle(b"code").unwrap();
        crank.terminate_vat(&vat()).unwrap();
        assert!(crank.retain_bundle(&id, &vat()).is_err());
        crank
            .record_diagnostic(&vat(), &DiagnosticName::new("post-mortem").unwrap(), b"p")
            .unwrap();
        crank.commit().unwrap();
    }

    #[test]
    fn test_terminate_and_delete() {
        let store = store(StoreConfig::default());
        let mut crank = store.begin_crank();
        crank.init_vat(&vat()).unwrap();
        let id = crank.install_bundle(b"code").unwrap();
        crank.retain_bundle(&id, &vat()).unwrap();
        crank.append_entry(&vat(), 0, &entry(0)).unwrap();
        crank.save_snapshot(&vat(), b"heap", 1).unwrap();
        crank
            .record_diagnostic(&vat(), &DiagnosticName::new("trace").unwrap(), b"t")
            .unwrap();
        crank.terminate_vat(&vat()).unwrap();
        assert!(matches!(
            crank.append_entry(&vat(), 1, &entry(1)),
            Err(Error::NoActiveSpan { .. })
        ));
        crank.delete_vat(&vat()).unwrap();
        crank.commit().unwrap();

        let reader = store.reader();
        assert!(reader.list_vats().unwrap().is_empty());
        assert!(!reader.bundle_info(&id).unwrap().unwrap().is_retained());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = StoreConfig {
            max_span_entries: Some(0),
            ..StoreConfig::default()
        };
        assert!(matches!(
            ArtifactStore::new(Arc::new(MemoryStore::new()), config),
            Err(Error::Config(_))
        ));
    }
}
