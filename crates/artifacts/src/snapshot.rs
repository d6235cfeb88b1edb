//! Snapshot store
//!
//! A snapshot is a vat heap checkpoint taken at a transcript position. Its
//! identity is the SHA-256 of the uncompressed heap; the stored bytes may be
//! zstd-compressed. At most one snapshot per vat is active: the restart
//! baseline that replay starts from.
//!
//! Saving a snapshot also closes the transcript span at the snapshot
//! position, so every snapshot sits exactly on a span boundary.

use crate::keys;
use crate::records::{read_json, scan_json, write_json, SnapshotRecord};
use crate::transcript::TranscriptStore;
use tracing::{debug, info};
use vatstore_core::{ContentHash, Error, Result, VatId};
use vatstore_storage::{HostTransaction, KvRead};

/// Snapshot operations over a host transaction
#[derive(Debug, Clone, Copy)]
pub struct SnapshotStore {
    compress: bool,
    level: i32,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        SnapshotStore::new(true, vatstore_core::DEFAULT_COMPRESSION_LEVEL)
    }
}

impl SnapshotStore {
    /// Create a store with the given compression settings
    pub fn new(compress: bool, level: i32) -> Self {
        SnapshotStore { compress, level }
    }

    fn encode_heap(&self, heap: &[u8]) -> Result<Vec<u8>> {
        if self.compress {
            zstd::encode_all(heap, self.level).map_err(|e| Error::Compression(e.to_string()))
        } else {
            Ok(heap.to_vec())
        }
    }

    fn decode_heap(record: &SnapshotRecord, stored: Vec<u8>) -> Result<Vec<u8>> {
        let heap = if record.compressed {
            zstd::decode_all(stored.as_slice()).map_err(|e| Error::Compression(e.to_string()))?
        } else {
            stored
        };
        let actual = ContentHash::of(&heap);
        if actual != record.snapshot_id {
            return Err(Error::Corruption(format!(
                "{} hashes to {}, record says {}",
                record.artifact_name(),
                actual,
                record.snapshot_id
            )));
        }
        Ok(heap)
    }

    /// Save `heap` as the vat's active snapshot at `at_position`
    ///
    /// `at_position` must equal the end of the open span. The open span is
    /// rolled over there unless it is already an empty span starting at
    /// `at_position`.
    pub fn save_snapshot(
        &self,
        txn: &mut HostTransaction<'_>,
        transcripts: &TranscriptStore,
        vat_id: &VatId,
        heap: &[u8],
        at_position: u64,
    ) -> Result<SnapshotRecord> {
        let current = transcripts
            .current_span(&*txn, vat_id)?
            .ok_or_else(|| Error::NoActiveSpan {
                vat_id: vat_id.clone(),
            })?;
        if at_position != current.end_pos {
            return Err(Error::PositionMismatch {
                vat_id: vat_id.clone(),
                expected: current.end_pos,
                actual: at_position,
            });
        }
        if self.snapshot_info(&*txn, vat_id, at_position)?.is_some() {
            return Err(Error::InvalidOperation(format!(
                "vat {} already has a snapshot at position {}",
                vat_id, at_position
            )));
        }

        let stored = self.encode_heap(heap)?;
        let record = SnapshotRecord {
            vat_id: vat_id.clone(),
            snapshot_id: ContentHash::of(heap),
            position: at_position,
            uncompressed_size: heap.len() as u64,
            compressed_size: stored.len() as u64,
            compressed: self.compress,
            in_use: true,
            populated: true,
        };

        self.stop_using_last_snapshot(txn, vat_id)?;
        txn.put(keys::snapshot_data(vat_id, at_position), stored);
        self.put_record(txn, &record)?;

        transcripts.rollover_span(txn, vat_id, at_position)?;

        info!(
            vat = %vat_id,
            position = at_position,
            snapshot_id = %record.snapshot_id,
            size = record.uncompressed_size,
            stored = record.compressed_size,
            "saved snapshot"
        );
        Ok(record)
    }

    fn put_record(&self, txn: &mut HostTransaction<'_>, record: &SnapshotRecord) -> Result<()> {
        if record.in_use {
            txn.put(
                keys::snapshot_active(&record.vat_id),
                record.position.to_string().into_bytes(),
            );
        }
        write_json(txn, keys::snapshot_meta(&record.vat_id, record.position), record)
    }

    /// The vat's active snapshot record
    pub fn active_snapshot<K: KvRead + ?Sized>(
        &self,
        kv: &K,
        vat_id: &VatId,
    ) -> Result<Option<SnapshotRecord>> {
        let Some(raw) = kv.get(&keys::snapshot_active(vat_id))? else {
            return Ok(None);
        };
        let position: u64 = std::str::from_utf8(&raw)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::Corruption(format!("bad active snapshot pointer for {}", vat_id)))?;
        let record = self.snapshot_info(kv, vat_id, position)?.ok_or_else(|| {
            Error::Corruption(format!(
                "active snapshot of {} at {} has no record",
                vat_id, position
            ))
        })?;
        Ok(Some(record))
    }

    /// Heap bytes and record of the vat's active snapshot
    pub fn load_active_snapshot<K: KvRead + ?Sized>(
        &self,
        kv: &K,
        vat_id: &VatId,
    ) -> Result<(Vec<u8>, SnapshotRecord)> {
        let record = self
            .active_snapshot(kv, vat_id)?
            .ok_or_else(|| Error::not_found(format!("active snapshot of {}", vat_id)))?;
        let heap = self.read_heap(kv, &record)?;
        debug!(vat = %vat_id, position = record.position, "loaded active snapshot");
        Ok((heap, record))
    }

    /// Uncompressed heap of a stored snapshot
    pub fn read_heap<K: KvRead + ?Sized>(&self, kv: &K, record: &SnapshotRecord) -> Result<Vec<u8>> {
        let stored = if record.populated {
            kv.get(&keys::snapshot_data(&record.vat_id, record.position))?
        } else {
            None
        };
        let stored = stored.ok_or_else(|| Error::not_found(record.artifact_name().to_string()))?;
        Self::decode_heap(record, stored)
    }

    /// Record of the snapshot at `position`
    pub fn snapshot_info<K: KvRead + ?Sized>(
        &self,
        kv: &K,
        vat_id: &VatId,
        position: u64,
    ) -> Result<Option<SnapshotRecord>> {
        read_json(kv, &keys::snapshot_meta(vat_id, position))
    }

    /// Every snapshot record of a vat in position order
    pub fn list_snapshots<K: KvRead + ?Sized>(
        &self,
        kv: &K,
        vat_id: &VatId,
    ) -> Result<Vec<SnapshotRecord>> {
        scan_json(kv, &keys::snapshot_meta_prefix(vat_id))
    }

    /// Snapshot record with the given ID
    pub fn find_snapshot<K: KvRead + ?Sized>(
        &self,
        kv: &K,
        vat_id: &VatId,
        snapshot_id: &ContentHash,
    ) -> Result<Option<SnapshotRecord>> {
        Ok(self
            .list_snapshots(kv, vat_id)?
            .into_iter()
            .find(|record| record.snapshot_id == *snapshot_id))
    }

    /// Clear the active marker; returns the previously active record
    pub fn stop_using_last_snapshot(
        &self,
        txn: &mut HostTransaction<'_>,
        vat_id: &VatId,
    ) -> Result<Option<SnapshotRecord>> {
        let Some(mut record) = self.active_snapshot(&*txn, vat_id)? else {
            return Ok(None);
        };
        record.in_use = false;
        txn.delete(keys::snapshot_active(vat_id));
        self.put_record(txn, &record)?;
        debug!(vat = %vat_id, position = record.position, "snapshot no longer active");
        Ok(Some(record))
    }

    /// Remove a snapshot record and its bytes
    pub(crate) fn remove(&self, txn: &mut HostTransaction<'_>, record: &SnapshotRecord) {
        if record.in_use {
            txn.delete(keys::snapshot_active(&record.vat_id));
        }
        txn.delete(keys::snapshot_meta(&record.vat_id, record.position));
        txn.delete(keys::snapshot_data(&record.vat_id, record.position));
    }

    /// Remove every snapshot of a vat
    ///
    /// Returns the number of snapshots removed.
    pub fn delete_vat_snapshots(&self, txn: &mut HostTransaction<'_>, vat_id: &VatId) -> Result<usize> {
        let removed = txn.delete_prefix(&keys::snapshot_meta_prefix(vat_id))?;
        txn.delete_prefix(&keys::snapshot_data_prefix(vat_id))?;
        txn.delete(keys::snapshot_active(vat_id));
        info!(vat = %vat_id, removed, "deleted snapshots");
        Ok(removed)
    }

    /// Store an exported heap after checking it against `record`
    pub fn import_snapshot(
        &self,
        txn: &mut HostTransaction<'_>,
        record: &SnapshotRecord,
        heap: &[u8],
    ) -> Result<()> {
        let actual = ContentHash::of(heap);
        if actual != record.snapshot_id {
            return Err(Error::hash_mismatch(
                record.artifact_name().to_string(),
                record.snapshot_id,
                actual,
            ));
        }
        if heap.len() as u64 != record.uncompressed_size {
            return Err(Error::inconsistent(
                record.artifact_name().to_string(),
                format!(
                    "heap is {} bytes, record says {}",
                    heap.len(),
                    record.uncompressed_size
                ),
            ));
        }
        let stored = self.encode_heap(heap)?;
        let mut record = record.clone();
        record.compressed = self.compress;
        record.compressed_size = stored.len() as u64;
        record.populated = true;
        txn.put(keys::snapshot_data(&record.vat_id, record.position), stored);
        self.put_record(txn, &record)
    }

    /// Store only the record of a snapshot whose heap was not exported
    pub fn import_snapshot_record(
        &self,
        txn: &mut HostTransaction<'_>,
        record: &SnapshotRecord,
    ) -> Result<()> {
        let mut record = record.clone();
        record.populated = false;
        self.put_record(txn, &record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vatstore_core::TranscriptEntry;
    use vatstore_storage::{HostStore, HostStoreExt, MemoryStore};

    fn vat() -> VatId {
        VatId::new("v7").unwrap()
    }

    fn store_with_entries(n: u64) -> MemoryStore {
        let store = MemoryStore::new();
        let transcripts = TranscriptStore::default();
        let mut txn = store.begin();
        transcripts.init_vat(&mut txn, &vat()).unwrap();
        for pos in 0..n {
            let entry = TranscriptEntry::new(pos, json!({"n": pos}));
            transcripts.append_entry(&mut txn, &vat(), pos, &entry).unwrap();
        }
        txn.commit().unwrap();
        store
    }

    #[test]
    fn test_save_and_load() {
        let store = store_with_entries(10);
        let snapshots = SnapshotStore::default();
        let transcripts = TranscriptStore::default();
        let heap = vec![7u8; 4096];

        let mut txn = store.begin();
        let record = snapshots
            .save_snapshot(&mut txn, &transcripts, &vat(), &heap, 10)
            .unwrap();
        txn.commit().unwrap();

        assert!(record.compressed_size < record.uncompressed_size);
        let view = store.read_view();
        let (loaded, active) = snapshots.load_active_snapshot(&view, &vat()).unwrap();
        assert_eq!(loaded, heap);
        assert_eq!(active.position, 10);
        assert_eq!(active.snapshot_id, ContentHash::of(&heap));

        let current = transcripts.current_span(&view, &vat()).unwrap().unwrap();
        assert_eq!((current.start_pos, current.end_pos), (10, 10));
    }

    #[test]
    fn test_uncompressed_storage() {
        let store = store_with_entries(1);
        let snapshots = SnapshotStore::new(false, 3);
        let mut txn = store.begin();
        let record = snapshots
            .save_snapshot(&mut txn, &TranscriptStore::default(), &vat(), b"heap", 1)
            .unwrap();
        assert!(!record.compressed);
        assert_eq!(record.compressed_size, 4);
        assert_eq!(snapshots.read_heap(&txn, &record).unwrap(), b"heap");
    }

    #[test]
    fn test_position_mismatch() {
        let store = store_with_entries(3);
        let mut txn = store.begin();
        let err = SnapshotStore::default()
            .save_snapshot(&mut txn, &TranscriptStore::default(), &vat(), b"h", 2)
            .unwrap_err();
        assert!(matches!(err, Error::PositionMismatch { expected: 3, actual: 2, .. }));
    }

    #[test]
    fn test_no_active_snapshot_is_not_found() {
        let store = store_with_entries(0);
        let err = SnapshotStore::default()
            .load_active_snapshot(&store.read_view(), &vat())
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_rollover_before_snapshot_is_not_repeated() {
        let store = store_with_entries(5);
        let transcripts = TranscriptStore::default();
        let mut txn = store.begin();
        transcripts.rollover_span(&mut txn, &vat(), 5).unwrap();
        SnapshotStore::default()
            .save_snapshot(&mut txn, &transcripts, &vat(), b"h", 5)
            .unwrap();
        let spans = transcripts.list_spans(&txn, &vat()).unwrap();
        let ranges: Vec<(u64, u64)> = spans.iter().map(|s| (s.start_pos, s.end_pos)).collect();
        assert_eq!(ranges, vec![(0, 5), (5, 5)]);
    }

    #[test]
    fn test_second_snapshot_at_same_position_fails() {
        let store = store_with_entries(2);
        let transcripts = TranscriptStore::default();
        let snapshots = SnapshotStore::default();
        let mut txn = store.begin();
        snapshots.save_snapshot(&mut txn, &transcripts, &vat(), b"a", 2).unwrap();
        assert!(matches!(
            snapshots.save_snapshot(&mut txn, &transcripts, &vat(), b"b", 2),
            Err(Error::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_new_snapshot_supersedes_active() {
        let store = store_with_entries(2);
        let transcripts = TranscriptStore::default();
        let snapshots = SnapshotStore::default();
        let mut txn = store.begin();
        snapshots.save_snapshot(&mut txn, &transcripts, &vat(), b"a", 2).unwrap();
        transcripts
            .append_entry(&mut txn, &vat(), 2, &TranscriptEntry::new(2, json!(null)))
            .unwrap();
        snapshots.save_snapshot(&mut txn, &transcripts, &vat(), b"b", 3).unwrap();

        let all = snapshots.list_snapshots(&txn, &vat()).unwrap();
        assert_eq!(all.len(), 2);
        assert!(!all[0].in_use);
        assert!(all[1].in_use);
        assert_eq!(snapshots.active_snapshot(&txn, &vat()).unwrap().unwrap().position, 3);
        assert_eq!(
            snapshots
                .find_snapshot(&txn, &vat(), &ContentHash::of(b"a"))
                .unwrap()
                .unwrap()
                .position,
            2
        );
    }

    #[test]
    fn test_import_verifies_hash() {
        let record = SnapshotRecord {
            vat_id: vat(),
            snapshot_id: ContentHash::of(b"heap"),
            position: 4,
            uncompressed_size: 4,
            compressed_size: 0,
            compressed: false,
            in_use: true,
            populated: true,
        };
        let store = MemoryStore::new();
        let snapshots = SnapshotStore::default();
        let mut txn = store.begin();
        assert!(matches!(
            snapshots.import_snapshot(&mut txn, &record, b"HEAP"),
            Err(Error::HashMismatch { .. })
        ));
        snapshots.import_snapshot(&mut txn, &record, b"heap").unwrap();
        let (heap, active) = snapshots.load_active_snapshot(&txn, &vat()).unwrap();
        assert_eq!(heap, b"heap");
        assert!(active.compressed);
    }

    #[test]
    fn test_stop_using_and_delete() {
        let store = store_with_entries(1);
        let snapshots = SnapshotStore::default();
        let mut txn = store.begin();
        snapshots
            .save_snapshot(&mut txn, &TranscriptStore::default(), &vat(), b"h", 1)
            .unwrap();
        let previous = snapshots.stop_using_last_snapshot(&mut txn, &vat()).unwrap();
        assert_eq!(previous.map(|r| r.position), Some(1));
        assert!(snapshots.active_snapshot(&txn, &vat()).unwrap().is_none());
        assert_eq!(snapshots.list_snapshots(&txn, &vat()).unwrap().len(), 1);

        assert_eq!(snapshots.delete_vat_snapshots(&mut txn, &vat()).unwrap(), 1);
        assert!(snapshots.list_snapshots(&txn, &vat()).unwrap().is_empty());
    }
}
