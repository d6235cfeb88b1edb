//! Export sessions
//!
//! [`ExportSession::begin`] pins a read view of the last committed state,
//! classifies every artifact under the requested mode and builds the
//! manifest. Payloads are read back from the same view on demand, so an
//! export is consistent even while new cranks commit.

use crate::manifest::{ArtifactEntry, ExportManifest, VatManifest};
use std::collections::BTreeSet;
use tracing::info;
use vatstore_artifacts::{
    classify, vat_artifacts, Artifact, ArtifactName, ArtifactReader, ArtifactStore, Inventory,
};
use vatstore_core::{ArtifactMode, ContentHash, Error, Result};

/// A consistent, in-progress export
#[derive(Debug)]
pub struct ExportSession {
    reader: ArtifactReader,
    inventory: Inventory,
    manifest: ExportManifest,
}

impl ExportSession {
    /// Begin an export, naming the mode as a string
    ///
    /// Fails with `InvalidMode` before touching the store.
    pub fn begin_named(store: &ArtifactStore, mode: &str) -> Result<Self> {
        Self::begin(store, ArtifactMode::parse(mode)?)
    }

    /// Begin an export of every artifact `mode` includes
    pub fn begin(store: &ArtifactStore, mode: ArtifactMode) -> Result<Self> {
        let reader = store.reader();
        let inventory = reader.inventory()?;
        let mut manifest = ExportManifest::new(mode);

        for vat in &inventory.vats {
            let mut exported = BTreeSet::new();
            for artifact in vat_artifacts(vat) {
                if classify(&artifact, mode) {
                    manifest.artifacts.push(describe(&reader, &artifact)?);
                    exported.insert(artifact.name());
                }
            }
            manifest.vats.push(VatManifest::from_inventory(vat, &exported));
        }

        for bundle in &inventory.bundles {
            let artifact = Artifact::Bundle(bundle);
            if classify(&artifact, mode) {
                manifest.artifacts.push(describe(&reader, &artifact)?);
                manifest.bundles.push(bundle.clone());
            }
        }

        info!(
            mode = %mode,
            version = reader.version(),
            vats = manifest.vats.len(),
            artifacts = manifest.artifacts.len(),
            bytes = manifest.total_bytes(),
            "began export"
        );
        Ok(ExportSession {
            reader,
            inventory,
            manifest,
        })
    }

    /// The export's manifest
    pub fn manifest(&self) -> &ExportManifest {
        &self.manifest
    }

    /// Store version the export reflects
    pub fn version(&self) -> u64 {
        self.reader.version()
    }

    /// Payload of an exported artifact
    pub fn artifact_bytes(&self, name: &ArtifactName) -> Result<Vec<u8>> {
        if self.manifest.artifact(name).is_none() {
            return Err(Error::not_found(format!("{} is not part of this export", name)));
        }
        let artifact = self.locate(name)?;
        payload(&self.reader, &artifact)
    }

    fn locate(&self, name: &ArtifactName) -> Result<Artifact<'_>> {
        let missing = || Error::not_found(name.to_string());
        match name {
            ArtifactName::Bundle(id) => self
                .inventory
                .bundles
                .iter()
                .find(|bundle| bundle.bundle_id == *id)
                .map(Artifact::Bundle)
                .ok_or_else(missing),
            _ => {
                let vat_id = name.vat_id().ok_or_else(missing)?;
                let vat = self.inventory.vat(vat_id).ok_or_else(missing)?;
                vat_artifacts(vat)
                    .into_iter()
                    .find(|artifact| artifact.name() == *name)
                    .ok_or_else(missing)
            }
        }
    }

    /// Every exported payload in manifest order
    pub fn payloads(&self) -> impl Iterator<Item = Result<(&ArtifactEntry, Vec<u8>)>> + '_ {
        self.manifest
            .artifacts
            .iter()
            .map(move |entry| {
                self.artifact_bytes(&entry.name)
                    .map(|bytes| (entry, bytes))
            })
    }
}

fn payload(reader: &ArtifactReader, artifact: &Artifact<'_>) -> Result<Vec<u8>> {
    match artifact {
        Artifact::Span { span, .. } => reader.export_span(span),
        Artifact::Snapshot { snapshot, .. } => reader.read_heap(snapshot),
        Artifact::Bundle(bundle) => reader.get_bundle(&bundle.bundle_id),
        Artifact::Diagnostic(diagnostic) => {
            reader.read_diagnostic(&diagnostic.vat_id, &diagnostic.name)
        }
    }
}

fn describe(reader: &ArtifactReader, artifact: &Artifact<'_>) -> Result<ArtifactEntry> {
    let name = artifact.name();
    let bytes = payload(reader, artifact).map_err(|e| match e {
        Error::NotFound(_) => Error::not_found(format!("{} (required for export)", name)),
        other => other,
    })?;
    let hash = match artifact {
        Artifact::Span { span, .. } => span.hash,
        _ => ContentHash::of(&bytes),
    };
    Ok(ArtifactEntry {
        kind: name.kind(),
        name,
        hash,
        size: bytes.len() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use vatstore_core::{StoreConfig, TranscriptEntry, VatId};
    use vatstore_storage::MemoryStore;

    fn v7() -> VatId {
        VatId::new("v7").unwrap()
    }

    fn v7_store() -> ArtifactStore {
        let store = ArtifactStore::new(Arc::new(MemoryStore::new()), StoreConfig::default()).unwrap();
        let mut crank = store.begin_crank();
        crank.init_vat(&v7()).unwrap();
        for pos in 0..10 {
            crank
                .append_entry(&v7(), pos, &TranscriptEntry::new(pos, json!({"n": pos})))
                .unwrap();
        }
        crank.save_snapshot(&v7(), b"heap@10", 10).unwrap();
        for pos in 10..15 {
            crank
                .append_entry(&v7(), pos, &TranscriptEntry::new(pos, json!({"n": pos})))
                .unwrap();
        }
        let id = crank.install_bundle(b"bundle").unwrap();
        crank.retain_bundle(&id, &v7()).unwrap();
        crank.install_bundle(b"orphan").unwrap();
        crank.commit().unwrap();
        store
    }

    fn names(session: &ExportSession) -> Vec<String> {
        session
            .manifest()
            .artifacts
            .iter()
            .map(|entry| entry.name.to_string())
            .collect()
    }

    #[test]
    fn test_operational_export_v7() {
        let store = v7_store();
        let session = ExportSession::begin(&store, ArtifactMode::Operational).unwrap();
        let names = names(&session);
        assert_eq!(names.len(), 3);
        assert_eq!(names[0], "snapshot.v7.10");
        assert_eq!(names[1], "transcript.v7.10.15");
        assert!(names[2].starts_with("bundle.b1-"));

        let vat = session.manifest().vat(&v7()).unwrap();
        assert_eq!(vat.spans.len(), 2);
        assert!(!vat.spans[0].exported);
        assert_eq!(vat.active_snapshot, Some(10));
    }

    #[test]
    fn test_archival_export_includes_everything() {
        let store = v7_store();
        let session = ExportSession::begin_named(&store, "archival").unwrap();
        assert_eq!(session.manifest().artifacts.len(), 5);
        for result in session.payloads() {
            let (entry, bytes) = result.unwrap();
            assert_eq!(entry.size, bytes.len() as u64);
        }
    }

    #[test]
    fn test_manifest_is_deterministic() {
        let store = v7_store();
        let first = ExportSession::begin(&store, ArtifactMode::Replay).unwrap();
        let second = ExportSession::begin(&store, ArtifactMode::Replay).unwrap();
        assert_eq!(
            first.manifest().to_json().unwrap(),
            second.manifest().to_json().unwrap()
        );
    }

    #[test]
    fn test_export_is_a_consistent_view() {
        let store = v7_store();
        let session = ExportSession::begin(&store, ArtifactMode::Operational).unwrap();

        let mut crank = store.begin_crank();
        crank
            .append_entry(&v7(), 15, &TranscriptEntry::new(15, json!(null)))
            .unwrap();
        crank.commit().unwrap();

        let name: ArtifactName = "transcript.v7.10.15".parse().unwrap();
        let bytes = session.artifact_bytes(&name).unwrap();
        assert_eq!(bytes.iter().filter(|b| **b == b'\n').count(), 5);
    }

    #[test]
    fn test_invalid_mode() {
        let store = v7_store();
        assert!(matches!(
            ExportSession::begin_named(&store, "everything"),
            Err(Error::InvalidMode(_))
        ));
    }

    #[test]
    fn test_compacted_required_span_is_not_found() {
        let store = v7_store();
        let mut crank = store.begin_crank();
        crank.compact_vat_as(&v7(), ArtifactMode::Operational).unwrap();
        crank.commit().unwrap();

        assert!(ExportSession::begin(&store, ArtifactMode::Operational).is_ok());
        let err = ExportSession::begin(&store, ArtifactMode::Archival).unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("transcript.v7.0.10"));
    }
}
