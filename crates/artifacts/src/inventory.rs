//! Per-vat artifact inventory
//!
//! An inventory is a snapshot of every artifact record in the store: the
//! span, snapshot and diagnostic records of each vat plus every bundle
//! record. Classification, compaction and export all work from an
//! inventory, so they agree on what exists.
//!
//! Two positions derived from a vat's records drive classification:
//!
//! - **restart position**: the active snapshot's position, or the start of
//!   the current incarnation when no snapshot is active. A restarted vat
//!   loads that snapshot (if any) and replays from there.
//! - **replay floor**: the oldest snapshot position of the current
//!   incarnation, never later than the restart position. Replay consumers
//!   need every span from there on.

use crate::bundle::BundleStore;
use crate::diagnostic::DiagnosticStore;
use crate::keys;
use crate::records::{BundleRecord, DiagnosticInfo, SnapshotRecord, SpanRecord};
use crate::snapshot::SnapshotStore;
use crate::transcript::TranscriptStore;
use std::collections::BTreeSet;
use vatstore_core::{Result, VatId};
use vatstore_storage::KvRead;

/// Every artifact record of one vat
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VatInventory {
    /// The vat
    pub vat_id: VatId,
    /// Spans in position order, the open one last
    pub spans: Vec<SpanRecord>,
    /// Snapshots in position order
    pub snapshots: Vec<SnapshotRecord>,
    /// Diagnostics in name order
    pub diagnostics: Vec<DiagnosticInfo>,
}

impl VatInventory {
    /// Read a vat's records
    pub fn collect<K: KvRead + ?Sized>(kv: &K, vat_id: &VatId) -> Result<Self> {
        Ok(VatInventory {
            vat_id: vat_id.clone(),
            spans: TranscriptStore::default().list_spans(kv, vat_id)?,
            snapshots: SnapshotStore::default().list_snapshots(kv, vat_id)?,
            diagnostics: DiagnosticStore.list_diagnostics(kv, vat_id)?,
        })
    }

    /// The open span, if the vat is live
    pub fn current_span(&self) -> Option<&SpanRecord> {
        self.spans.iter().find(|span| span.is_current)
    }

    /// The active snapshot, if any
    pub fn active_snapshot(&self) -> Option<&SnapshotRecord> {
        self.snapshots.iter().find(|snapshot| snapshot.in_use)
    }

    /// Latest incarnation seen in the transcript
    pub fn incarnation(&self) -> u64 {
        self.spans.iter().map(|span| span.incarnation).max().unwrap_or(0)
    }

    /// Position where the latest incarnation began
    pub fn incarnation_start(&self) -> u64 {
        let incarnation = self.incarnation();
        self.spans
            .iter()
            .filter(|span| span.incarnation == incarnation)
            .map(|span| span.start_pos)
            .min()
            .unwrap_or(0)
    }

    /// Position a restarted vat resumes replay from
    pub fn restart_position(&self) -> u64 {
        match self.active_snapshot() {
            Some(snapshot) => snapshot.position,
            None => self.incarnation_start(),
        }
    }

    /// Oldest position replay consumers need
    pub fn replay_floor(&self) -> u64 {
        let start = self.incarnation_start();
        let oldest = self
            .snapshots
            .iter()
            .map(|snapshot| snapshot.position)
            .filter(|position| *position >= start)
            .min();
        match oldest {
            Some(position) => position.min(self.restart_position()),
            None => self.restart_position(),
        }
    }

    /// One past the last transcript position
    pub fn transcript_end(&self) -> u64 {
        self.spans.last().map(|span| span.end_pos).unwrap_or(0)
    }
}

/// Every artifact record in the store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    /// Vats in ID order
    pub vats: Vec<VatInventory>,
    /// Bundles in ID order
    pub bundles: Vec<BundleRecord>,
}

impl Inventory {
    /// Read every record visible through `kv`
    pub fn collect<K: KvRead + ?Sized>(kv: &K) -> Result<Self> {
        let vats = list_vats(kv)?
            .iter()
            .map(|vat_id| VatInventory::collect(kv, vat_id))
            .collect::<Result<Vec<_>>>()?;
        Ok(Inventory {
            vats,
            bundles: BundleStore.list_bundles(kv)?,
        })
    }

    /// Records of one vat
    pub fn vat(&self, vat_id: &VatId) -> Option<&VatInventory> {
        self.vats.iter().find(|vat| &vat.vat_id == vat_id)
    }
}

/// Every vat with at least one record, in ID order
pub fn list_vats<K: KvRead + ?Sized>(kv: &K) -> Result<Vec<VatId>> {
    let mut vats = BTreeSet::new();
    for prefix in keys::VAT_RECORD_PREFIXES {
        for (key, _) in kv.scan_prefix(prefix)? {
            if let Some(vat_id) = keys::vat_of(prefix, &key) {
                vats.insert(vat_id);
            }
        }
    }
    Ok(vats.into_iter().collect())
}
