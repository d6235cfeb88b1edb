//! Artifact mode classifier
//!
//! `classify(artifact, mode)` decides whether an artifact belongs to the
//! artifact set of a mode. It is a pure function of the artifact, the
//! records of its vat, and the mode; retention, compaction and export all
//! go through it.
//!
//! | Artifact | operational | replay | archival | debug |
//! |----------|-------------|--------|----------|-------|
//! | open span | yes | yes | yes | yes |
//! | closed span ending after the restart position | yes | yes | yes | yes |
//! | closed span starting at or after the replay floor | no | yes | yes | yes |
//! | any other closed span | no | no | yes | yes |
//! | active snapshot | yes | yes | yes | yes |
//! | inactive snapshot | no | no | yes | yes |
//! | bundle retained by a vat | yes | yes | yes | yes |
//! | unretained bundle | no | no | yes | yes |
//! | diagnostic | no | no | no | yes |
//!
//! Each column includes the one to its left, so the sets are monotonic:
//! operational ⊆ replay ⊆ archival ⊆ debug.

use crate::artifact::ArtifactName;
use crate::inventory::VatInventory;
use crate::records::{BundleRecord, DiagnosticInfo, SnapshotRecord, SpanRecord};
use vatstore_core::{ArtifactMode, Result};

/// An artifact together with the context needed to classify it
#[derive(Debug, Clone, Copy)]
pub enum Artifact<'a> {
    /// A transcript span of a vat
    Span {
        /// Records of the owning vat
        vat: &'a VatInventory,
        /// The span
        span: &'a SpanRecord,
    },
    /// A snapshot of a vat
    Snapshot {
        /// Records of the owning vat
        vat: &'a VatInventory,
        /// The snapshot
        snapshot: &'a SnapshotRecord,
    },
    /// A debug-only diagnostic of a vat
    Diagnostic(&'a DiagnosticInfo),
    /// An installed bundle
    Bundle(&'a BundleRecord),
}

impl Artifact<'_> {
    /// Stable identifier of the artifact
    pub fn name(&self) -> ArtifactName {
        match self {
            Artifact::Span { span, .. } => span.artifact_name(),
            Artifact::Snapshot { snapshot, .. } => snapshot.artifact_name(),
            Artifact::Diagnostic(diagnostic) => diagnostic.artifact_name(),
            Artifact::Bundle(bundle) => bundle.artifact_name(),
        }
    }
}

/// Whether `artifact` belongs to the artifact set of `mode`
pub fn classify(artifact: &Artifact<'_>, mode: ArtifactMode) -> bool {
    match mode {
        ArtifactMode::Operational => operational(artifact),
        ArtifactMode::Replay => operational(artifact) || replay_only(artifact),
        ArtifactMode::Archival => !matches!(artifact, Artifact::Diagnostic(_)),
        ArtifactMode::Debug => true,
    }
}

/// [`classify`] with a mode name, rejecting unknown names
pub fn classify_str(artifact: &Artifact<'_>, mode: &str) -> Result<bool> {
    Ok(classify(artifact, ArtifactMode::parse(mode)?))
}

fn operational(artifact: &Artifact<'_>) -> bool {
    match artifact {
        Artifact::Span { vat, span } => span.is_current || span.end_pos > vat.restart_position(),
        Artifact::Snapshot { snapshot, .. } => snapshot.in_use,
        Artifact::Bundle(bundle) => bundle.is_retained(),
        Artifact::Diagnostic(_) => false,
    }
}

fn replay_only(artifact: &Artifact<'_>) -> bool {
    match artifact {
        Artifact::Span { vat, span } => span.start_pos >= vat.replay_floor(),
        _ => false,
    }
}

/// Every artifact of one vat, spans and snapshots interleaved by position
pub fn vat_artifacts(vat: &VatInventory) -> Vec<Artifact<'_>> {
    let mut artifacts: Vec<Artifact<'_>> = vat
        .spans
        .iter()
        .map(|span| Artifact::Span { vat, span })
        .chain(
            vat.snapshots
                .iter()
                .map(|snapshot| Artifact::Snapshot { vat, snapshot }),
        )
        .chain(vat.diagnostics.iter().map(Artifact::Diagnostic))
        .collect();
    artifacts.sort_by_key(|artifact| artifact.name());
    artifacts
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use vatstore_core::{BundleId, ContentHash, DiagnosticName, Error, VatId};

    fn vat_id() -> VatId {
        VatId::new("v7").unwrap()
    }

    fn span(start: u64, end: u64, current: bool) -> SpanRecord {
        SpanRecord {
            vat_id: vat_id(),
            start_pos: start,
            end_pos: end,
            hash: ContentHash::empty_span(),
            is_current: current,
            incarnation: 0,
            populated: true,
        }
    }

    fn snapshot(position: u64, in_use: bool) -> SnapshotRecord {
        SnapshotRecord {
            vat_id: vat_id(),
            snapshot_id: ContentHash::of(&position.to_be_bytes()),
            position,
            uncompressed_size: 8,
            compressed_size: 8,
            compressed: false,
            in_use,
            populated: true,
        }
    }

    fn included(vat: &VatInventory, mode: ArtifactMode) -> Vec<String> {
        vat_artifacts(vat)
            .iter()
            .filter(|artifact| classify(artifact, mode))
            .map(|artifact| artifact.name().to_string())
            .collect()
    }

    fn v7_after_snapshot() -> VatInventory {
        VatInventory {
            vat_id: vat_id(),
            spans: vec![span(0, 10, false), span(10, 15, true)],
            snapshots: vec![snapshot(10, true)],
            diagnostics: Vec::new(),
        }
    }

    #[test]
    fn test_operational_after_snapshot() {
        assert_eq!(
            included(&v7_after_snapshot(), ArtifactMode::Operational),
            vec!["snapshot.v7.10", "transcript.v7.10.15"]
        );
    }

    #[test]
    fn test_operational_fresh_vat_from_zero() {
        let vat = VatInventory {
            vat_id: vat_id(),
            spans: vec![span(0, 4, false), span(4, 9, true)],
            snapshots: Vec::new(),
            diagnostics: Vec::new(),
        };
        assert_eq!(
            included(&vat, ArtifactMode::Operational),
            vec!["transcript.v7.0.4", "transcript.v7.4.9"]
        );
    }

    #[test]
    fn test_replay_reaches_oldest_snapshot() {
        let vat = VatInventory {
            vat_id: vat_id(),
            spans: vec![span(0, 10, false), span(10, 20, false), span(20, 22, true)],
            snapshots: vec![snapshot(10, false), snapshot(20, true)],
            diagnostics: Vec::new(),
        };
        assert_eq!(
            included(&vat, ArtifactMode::Operational),
            vec!["snapshot.v7.20", "transcript.v7.20.22"]
        );
        assert_eq!(
            included(&vat, ArtifactMode::Replay),
            vec!["transcript.v7.10.20", "snapshot.v7.20", "transcript.v7.20.22"]
        );
        assert_eq!(included(&vat, ArtifactMode::Archival).len(), 5);
    }

    #[test]
    fn test_diagnostics_only_in_debug() {
        let mut vat = v7_after_snapshot();
        vat.diagnostics.push(DiagnosticInfo {
            vat_id: vat_id(),
            name: DiagnosticName::new("gc").unwrap(),
            hash: ContentHash::of(b"gc"),
            size: 2,
        });
        assert!(!included(&vat, ArtifactMode::Archival).contains(&"diagnostic.v7.gc".to_string()));
        assert_eq!(
            included(&vat, ArtifactMode::Debug).last().map(String::as_str),
            Some("diagnostic.v7.gc")
        );
    }

    #[test]
    fn test_bundles_by_owner() {
        let mut record = BundleRecord {
            bundle_id: BundleId::for_bytes(b"b"),
            size: 1,
            owners: BTreeSet::new(),
        };
        let artifact = Artifact::Bundle(&record);
        assert!(!classify(&artifact, ArtifactMode::Operational));
        assert!(!classify(&artifact, ArtifactMode::Replay));
        assert!(classify(&artifact, ArtifactMode::Archival));

        record.owners.insert(vat_id());
        assert!(classify(&Artifact::Bundle(&record), ArtifactMode::Operational));
    }

    #[test]
    fn test_unknown_mode_string() {
        let record = BundleRecord {
            bundle_id: BundleId::for_bytes(b"b"),
            size: 1,
            owners: BTreeSet::new(),
        };
        let err = classify_str(&Artifact::Bundle(&record), "forensic").unwrap_err();
        assert!(matches!(err, Error::InvalidMode(_)));
        assert!(classify_str(&Artifact::Bundle(&record), "debug").unwrap());
    }
}
