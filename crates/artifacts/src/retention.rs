//! Retention: compaction and explicit pruning
//!
//! Compaction drops the contents of closed spans and the diagnostics that
//! the retention mode does not require. Span records stay behind so the
//! transcript remains verifiably contiguous.
//!
//! Snapshots and bundles are only removed on request (`prune_snapshot`,
//! `prune_bundle`), and only when the classifier says the retention mode
//! does not need them.

use crate::bundle::BundleStore;
use crate::classify::{classify, Artifact};
use crate::diagnostic::DiagnosticStore;
use crate::inventory::{list_vats, VatInventory};
use crate::snapshot::SnapshotStore;
use crate::transcript::TranscriptStore;
use tracing::{debug, info, warn};
use vatstore_core::{ArtifactMode, BundleId, ContentHash, Error, Result, VatId};
use vatstore_storage::HostTransaction;

/// What a compaction pass removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionReport {
    /// Spans whose contents were dropped
    pub spans_pruned: usize,
    /// Transcript entries deleted
    pub entries_removed: u64,
    /// Diagnostic blobs deleted
    pub diagnostics_removed: usize,
}

impl CompactionReport {
    /// Add another report's counts to this one
    pub fn merge(&mut self, other: CompactionReport) {
        self.spans_pruned += other.spans_pruned;
        self.entries_removed += other.entries_removed;
        self.diagnostics_removed += other.diagnostics_removed;
    }

    /// Whether nothing was removed
    pub fn is_empty(&self) -> bool {
        *self == CompactionReport::default()
    }
}

/// Drop a vat's span contents and diagnostics not required by `mode`
pub fn compact_vat(
    txn: &mut HostTransaction<'_>,
    transcripts: &TranscriptStore,
    vat_id: &VatId,
    mode: ArtifactMode,
) -> Result<CompactionReport> {
    let vat = VatInventory::collect(&*txn, vat_id)?;
    let mut report = CompactionReport::default();

    for span in &vat.spans {
        if span.is_current || !span.populated {
            continue;
        }
        if !classify(&Artifact::Span { vat: &vat, span }, mode) {
            report.entries_removed += transcripts.prune_span_contents(txn, span)?;
            report.spans_pruned += 1;
        }
    }
    for diagnostic in &vat.diagnostics {
        if !classify(&Artifact::Diagnostic(diagnostic), mode) {
            DiagnosticStore.remove(txn, vat_id, &diagnostic.name);
            report.diagnostics_removed += 1;
        }
    }

    if !report.is_empty() {
        info!(
            vat = %vat_id,
            mode = %mode,
            spans = report.spans_pruned,
            entries = report.entries_removed,
            diagnostics = report.diagnostics_removed,
            "compacted vat"
        );
    }
    Ok(report)
}

/// Compact every vat in the store
pub fn compact_all(
    txn: &mut HostTransaction<'_>,
    transcripts: &TranscriptStore,
    mode: ArtifactMode,
) -> Result<CompactionReport> {
    let mut report = CompactionReport::default();
    for vat_id in list_vats(&*txn)? {
        report.merge(compact_vat(txn, transcripts, &vat_id, mode)?);
    }
    Ok(report)
}

/// Remove a snapshot that `mode` no longer requires
pub fn prune_snapshot(
    txn: &mut HostTransaction<'_>,
    snapshots: &SnapshotStore,
    vat_id: &VatId,
    snapshot_id: &ContentHash,
    mode: ArtifactMode,
) -> Result<()> {
    let vat = VatInventory::collect(&*txn, vat_id)?;
    let snapshot = vat
        .snapshots
        .iter()
        .find(|snapshot| snapshot.snapshot_id == *snapshot_id)
        .ok_or_else(|| Error::not_found(format!("snapshot {} of {}", snapshot_id, vat_id)))?;

    let artifact = Artifact::Snapshot {
        vat: &vat,
        snapshot,
    };
    if snapshot.in_use || classify(&artifact, mode) {
        warn!(vat = %vat_id, position = snapshot.position, mode = %mode, "refused to prune snapshot");
        return Err(Error::StillRequired {
            artifact: artifact.name().to_string(),
            mode,
        });
    }
    snapshots.remove(txn, snapshot);
    debug!(vat = %vat_id, position = snapshot.position, "pruned snapshot");
    Ok(())
}

/// Remove a bundle that no vat retains and `mode` does not require
pub fn prune_bundle(
    txn: &mut HostTransaction<'_>,
    bundles: &BundleStore,
    bundle_id: &BundleId,
    mode: ArtifactMode,
) -> Result<()> {
    let record = bundles
        .bundle_info(&*txn, bundle_id)?
        .ok_or_else(|| Error::not_found(format!("bundle {}", bundle_id)))?;
    let artifact = Artifact::Bundle(&record);
    if record.is_retained() || classify(&artifact, mode) {
        warn!(bundle = %bundle_id, owners = record.owners.len(), mode = %mode, "refused to prune bundle");
        return Err(Error::StillRequired {
            artifact: artifact.name().to_string(),
            mode,
        });
    }
    bundles.remove(txn, bundle_id);
    debug!(bundle = %bundle_id, "pruned bundle");
    Ok(())
}
