//! Export manifest
//!
//! The manifest is the ordered, hash-verified description of an export:
//!
//! - `format_version`, `mode`, `hash_algorithm`
//! - per vat: every span and snapshot record (exported or not), so the
//!   importer can rebuild metadata and check continuity
//! - the bundle records of every exported bundle
//! - one [`ArtifactEntry`] per exported payload, in export order
//!
//! The JSON form is canonical (struct field order, sorted vectors), so the
//! same store state and mode always produce byte-identical manifests, and
//! [`ExportManifest::digest`] identifies an export.

use crate::error::{ExportError, ExportResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use vatstore_artifacts::{
    ArtifactKind, ArtifactName, BundleRecord, DiagnosticInfo, SnapshotRecord, SpanRecord,
    VatInventory,
};
use vatstore_core::{ArtifactMode, ContentHash, VatId};

/// Current export format version
pub const EXPORT_FORMAT_VERSION: u32 = 1;

/// Hash algorithm named in every manifest
pub const HASH_ALGORITHM: &str = "sha256";

/// Metadata of one transcript span
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanMeta {
    /// First position
    pub start_pos: u64,
    /// One past the last position
    pub end_pos: u64,
    /// Rolling content hash
    pub hash: ContentHash,
    /// Incarnation the span belongs to
    pub incarnation: u64,
    /// Whether this is the open span
    pub is_current: bool,
    /// Whether the span's bytes are part of the export
    pub exported: bool,
}

/// Metadata of one snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    /// Transcript position
    pub position: u64,
    /// SHA-256 of the uncompressed heap
    pub snapshot_id: ContentHash,
    /// Uncompressed heap size
    pub size: u64,
    /// Whether this is the active snapshot
    pub in_use: bool,
    /// Whether the heap is part of the export
    pub exported: bool,
}

/// Metadata of one vat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VatManifest {
    /// The vat
    pub vat_id: VatId,
    /// Latest incarnation
    pub incarnation: u64,
    /// Position of the active snapshot
    pub active_snapshot: Option<u64>,
    /// Every span in position order
    pub spans: Vec<SpanMeta>,
    /// Every snapshot in position order
    pub snapshots: Vec<SnapshotMeta>,
}

impl VatManifest {
    /// Describe a vat, marking the artifacts named in `exported`
    pub fn from_inventory(vat: &VatInventory, exported: &BTreeSet<ArtifactName>) -> Self {
        VatManifest {
            vat_id: vat.vat_id.clone(),
            incarnation: vat.incarnation(),
            active_snapshot: vat.active_snapshot().map(|s| s.position),
            spans: vat
                .spans
                .iter()
                .map(|span| SpanMeta {
                    start_pos: span.start_pos,
                    end_pos: span.end_pos,
                    hash: span.hash,
                    incarnation: span.incarnation,
                    is_current: span.is_current,
                    exported: exported.contains(&span.artifact_name()),
                })
                .collect(),
            snapshots: vat
                .snapshots
                .iter()
                .map(|snapshot| SnapshotMeta {
                    position: snapshot.position,
                    snapshot_id: snapshot.snapshot_id,
                    size: snapshot.uncompressed_size,
                    in_use: snapshot.in_use,
                    exported: exported.contains(&snapshot.artifact_name()),
                })
                .collect(),
        }
    }

    /// Span records as they will exist after import
    pub fn span_records(&self) -> Vec<SpanRecord> {
        self.spans
            .iter()
            .map(|span| SpanRecord {
                vat_id: self.vat_id.clone(),
                start_pos: span.start_pos,
                end_pos: span.end_pos,
                hash: span.hash,
                is_current: span.is_current,
                incarnation: span.incarnation,
                populated: span.exported,
            })
            .collect()
    }

    /// Snapshot records as they will exist after import
    pub fn snapshot_records(&self) -> Vec<SnapshotRecord> {
        self.snapshots
            .iter()
            .map(|snapshot| SnapshotRecord {
                vat_id: self.vat_id.clone(),
                snapshot_id: snapshot.snapshot_id,
                position: snapshot.position,
                uncompressed_size: snapshot.size,
                compressed_size: 0,
                compressed: false,
                in_use: snapshot.in_use,
                populated: snapshot.exported,
            })
            .collect()
    }

    /// Rebuild the vat's inventory, with the given diagnostics
    pub fn inventory(&self, diagnostics: Vec<DiagnosticInfo>) -> VatInventory {
        VatInventory {
            vat_id: self.vat_id.clone(),
            spans: self.span_records(),
            snapshots: self.snapshot_records(),
            diagnostics,
        }
    }
}

/// One exported payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    /// Stable identifier; also the file name inside an archive
    pub name: ArtifactName,
    /// Kind tag
    pub kind: ArtifactKind,
    /// SHA-256 content hash (rolling hash for spans)
    pub hash: ContentHash,
    /// Payload size in bytes
    pub size: u64,
}

/// Ordered description of an export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportManifest {
    /// Export format version
    pub format_version: u32,
    /// Artifact mode the export was taken under
    pub mode: ArtifactMode,
    /// Hash algorithm of every content hash
    pub hash_algorithm: String,
    /// Per-vat metadata in vat order
    pub vats: Vec<VatManifest>,
    /// Records of the exported bundles in ID order
    pub bundles: Vec<BundleRecord>,
    /// Exported payloads in export order
    pub artifacts: Vec<ArtifactEntry>,
}

impl ExportManifest {
    /// An empty manifest for `mode`
    pub fn new(mode: ArtifactMode) -> Self {
        ExportManifest {
            format_version: EXPORT_FORMAT_VERSION,
            mode,
            hash_algorithm: HASH_ALGORITHM.to_string(),
            vats: Vec::new(),
            bundles: Vec::new(),
            artifacts: Vec::new(),
        }
    }

    /// Canonical JSON bytes
    pub fn to_json(&self) -> ExportResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Parse and version-check a manifest
    pub fn from_json(bytes: &[u8]) -> ExportResult<Self> {
        let manifest: ExportManifest = serde_json::from_slice(bytes)?;
        if manifest.format_version != EXPORT_FORMAT_VERSION {
            return Err(ExportError::UnsupportedVersion {
                version: manifest.format_version,
            });
        }
        if manifest.hash_algorithm != HASH_ALGORITHM {
            return Err(ExportError::Core(vatstore_core::Error::inconsistent(
                "manifest",
                format!("unsupported hash algorithm {:?}", manifest.hash_algorithm),
            )));
        }
        Ok(manifest)
    }

    /// SHA-256 of the canonical JSON
    pub fn digest(&self) -> ExportResult<ContentHash> {
        Ok(ContentHash::of(&self.to_json()?))
    }

    /// Entry of an exported artifact
    pub fn artifact(&self, name: &ArtifactName) -> Option<&ArtifactEntry> {
        self.artifacts
            .binary_search_by(|entry| entry.name.cmp(name))
            .ok()
            .map(|index| &self.artifacts[index])
    }

    /// Metadata of one vat
    pub fn vat(&self, vat_id: &VatId) -> Option<&VatManifest> {
        self.vats.iter().find(|vat| &vat.vat_id == vat_id)
    }

    /// Total payload bytes
    pub fn total_bytes(&self) -> u64 {
        self.artifacts.iter().map(|entry| entry.size).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vatstore_core::BundleId;

    fn manifest() -> ExportManifest {
        let mut manifest = ExportManifest::new(ArtifactMode::Replay);
        let bundle = BundleId::for_bytes(b"code");
        manifest.artifacts.push(ArtifactEntry {
            name: "transcript.v1.0.3".parse().unwrap(),
            kind: ArtifactKind::Transcript,
            hash: ContentHash::of(b"span"),
            size: 30,
        });
        manifest.artifacts.push(ArtifactEntry {
            name: ArtifactName::Bundle(bundle),
            kind: ArtifactKind::Bundle,
            hash: bundle.content_hash(),
            size: 4,
        });
        manifest
    }

    #[test]
    fn test_json_is_stable() {
        let manifest = manifest();
        let json = manifest.to_json().unwrap();
        assert_eq!(json, manifest.clone().to_json().unwrap());
        assert_eq!(ExportManifest::from_json(&json).unwrap(), manifest);
        assert_eq!(manifest.digest().unwrap(), ContentHash::of(&json));

        let text = String::from_utf8(json).unwrap();
        assert!(text.contains("\"mode\": \"replay\""));
        assert!(text.contains("\"name\": \"transcript.v1.0.3\""));
    }

    #[test]
    fn test_rejects_unknown_version() {
        let mut manifest = manifest();
        manifest.format_version = 2;
        let json = manifest.to_json().unwrap();
        assert!(matches!(
            ExportManifest::from_json(&json),
            Err(ExportError::UnsupportedVersion { version: 2 })
        ));
    }

    #[test]
    fn test_lookup_and_totals() {
        let manifest = manifest();
        let name: ArtifactName = "transcript.v1.0.3".parse().unwrap();
        assert_eq!(manifest.artifact(&name).unwrap().size, 30);
        assert!(manifest.artifact(&"snapshot.v1.3".parse().unwrap()).is_none());
        assert_eq!(manifest.total_bytes(), 34);
    }
}
