//! Import sessions
//!
//! Importing restores an export into an empty store:
//!
//! ```text
//! begin(manifest) ──► import_artifact(entry, bytes) × N ──► finalize()
//!   empty target?       hash check, stage into unit         continuity, boundaries,
//!                       (one per vat, one per bundle)       active snapshot, completeness
//!                                                           ──► one host commit
//! ```
//!
//! Nothing reaches the target store until `finalize` has validated every
//! unit; a failed or abandoned import leaves the store exactly as it was.

use crate::manifest::{ArtifactEntry, ExportManifest, VatManifest};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};
use vatstore_artifacts::{
    classify, keys, vat_artifacts, Artifact, ArtifactName, ArtifactStore,
    BundleStore, DiagnosticInfo, DiagnosticStore,
};
use vatstore_core::{BundleId, ContentHash, Error, Result, VatId};
use vatstore_storage::{HostStore, HostTransaction, KvRead, MemoryStore, WriteBatch};

/// Unit of staged writes
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Unit {
    Vat(VatId),
    Bundle(BundleId),
}

/// Outcome of a committed import
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    /// Vats restored
    pub vats: usize,
    /// Payloads imported
    pub artifacts: usize,
    /// Payload bytes imported
    pub bytes: u64,
    /// Store version after the import commit
    pub version: u64,
}

/// An in-progress import into an empty store
pub struct ImportSession<'s> {
    store: &'s ArtifactStore,
    manifest: ExportManifest,
    scratch: MemoryStore,
    units: BTreeMap<Unit, WriteBatch>,
    received: BTreeSet<ArtifactName>,
    diagnostics: BTreeMap<VatId, Vec<DiagnosticInfo>>,
}

impl std::fmt::Debug for ImportSession<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportSession")
            .field("mode", &self.manifest.mode)
            .field("expected", &self.manifest.artifacts.len())
            .field("received", &self.received.len())
            .finish()
    }
}

impl<'s> ImportSession<'s> {
    /// Begin importing `manifest` into `store`, which must hold no artifacts
    pub fn begin(store: &'s ArtifactStore, manifest: ExportManifest) -> Result<Self> {
        let view = store.host().read_view();
        for prefix in keys::ALL_PREFIXES {
            if !view.scan_prefix(prefix)?.is_empty() {
                warn!(prefix, "refusing import into a non-empty store");
                return Err(Error::InvalidOperation(
                    "import target store already holds artifacts".into(),
                ));
            }
        }
        check_manifest_order(&manifest)?;
        debug!(
            mode = %manifest.mode,
            artifacts = manifest.artifacts.len(),
            "began import"
        );
        Ok(ImportSession {
            store,
            manifest,
            scratch: MemoryStore::new(),
            units: BTreeMap::new(),
            received: BTreeSet::new(),
            diagnostics: BTreeMap::new(),
        })
    }

    /// The manifest being imported
    pub fn manifest(&self) -> &ExportManifest {
        &self.manifest
    }

    /// Artifacts still expected
    pub fn pending(&self) -> impl Iterator<Item = &ArtifactEntry> + '_ {
        self.manifest
            .artifacts
            .iter()
            .filter(move |entry| !self.received.contains(&entry.name))
    }

    /// Verify one payload against its manifest entry and stage it
    pub fn import_artifact(&mut self, name: &ArtifactName, bytes: &[u8]) -> Result<()> {
        let entry = self
            .manifest
            .artifact(name)
            .ok_or_else(|| Error::inconsistent(name.to_string(), "not listed in the manifest"))?
            .clone();
        if self.received.contains(name) {
            return Err(Error::inconsistent(name.to_string(), "imported twice"));
        }
        if bytes.len() as u64 != entry.size {
            return Err(Error::inconsistent(
                name.to_string(),
                format!("payload is {} bytes, manifest says {}", bytes.len(), entry.size),
            ));
        }

        let mut txn = HostTransaction::begin(&self.scratch);
        let unit = match name {
            ArtifactName::Span {
                vat_id, start_pos, ..
            } => {
                let vat = self.vat_manifest(vat_id)?;
                let record = vat
                    .span_records()
                    .into_iter()
                    .find(|span| span.start_pos == *start_pos && span.artifact_name() == *name)
                    .ok_or_else(|| Error::inconsistent(name.to_string(), "no matching span record"))?;
                if record.hash != entry.hash {
                    return Err(Error::hash_mismatch(name.to_string(), record.hash, entry.hash));
                }
                self.store.transcripts().import_span(&mut txn, &record, bytes)?;
                Unit::Vat(vat_id.clone())
            }
            ArtifactName::Snapshot { vat_id, position } => {
                let vat = self.vat_manifest(vat_id)?;
                let record = vat
                    .snapshot_records()
                    .into_iter()
                    .find(|snapshot| snapshot.position == *position)
                    .ok_or_else(|| {
                        Error::inconsistent(name.to_string(), "no matching snapshot record")
                    })?;
                verify_hash(name, &entry, bytes)?;
                self.store.snapshots().import_snapshot(&mut txn, &record, bytes)?;
                Unit::Vat(vat_id.clone())
            }
            ArtifactName::Bundle(bundle_id) => {
                let record = self
                    .manifest
                    .bundles
                    .iter()
                    .find(|bundle| bundle.bundle_id == *bundle_id)
                    .ok_or_else(|| Error::inconsistent(name.to_string(), "no matching bundle record"))?
                    .clone();
                verify_hash(name, &entry, bytes)?;
                BundleStore.import_bundle(&mut txn, &record, bytes)?;
                Unit::Bundle(*bundle_id)
            }
            ArtifactName::Diagnostic { vat_id, name: diag } => {
                self.vat_manifest(vat_id)?;
                verify_hash(name, &entry, bytes)?;
                DiagnosticStore.record_diagnostic(&mut txn, vat_id, diag, bytes);
                self.diagnostics
                    .entry(vat_id.clone())
                    .or_default()
                    .push(DiagnosticInfo {
                        vat_id: vat_id.clone(),
                        name: diag.clone(),
                        hash: entry.hash,
                        size: entry.size,
                    });
                Unit::Vat(vat_id.clone())
            }
        };

        self.units.entry(unit).or_default().merge(txn.into_batch());
        self.received.insert(name.clone());
        debug!(artifact = %name, size = bytes.len(), "staged artifact");
        Ok(())
    }

    fn vat_manifest(&self, vat_id: &VatId) -> Result<&VatManifest> {
        self.manifest
            .vat(vat_id)
            .ok_or_else(|| Error::inconsistent(vat_id.to_string(), "vat missing from manifest"))
    }

    /// Validate every unit and commit them in one host transaction
    pub fn finalize(mut self) -> Result<ImportSummary> {
        if let Some(missing) = self.pending().next() {
            return Err(Error::inconsistent(
                missing.name.to_string(),
                "payload was never imported",
            ));
        }

        let vats = std::mem::take(&mut self.manifest.vats);
        for vat in &vats {
            validate_vat(vat)?;
            let diagnostics = self.diagnostics.remove(&vat.vat_id).unwrap_or_default();
            self.check_completeness(vat, diagnostics)?;
            self.stage_metadata(vat)?;
        }
        self.check_bundles()?;

        let mut txn = HostTransaction::begin(self.store.host().as_ref());
        for (_, batch) in std::mem::take(&mut self.units) {
            txn.stage(batch);
        }
        let version = txn.commit()?;

        let summary = ImportSummary {
            vats: vats.len(),
            artifacts: self.received.len(),
            bytes: self.manifest.total_bytes(),
            version,
        };
        info!(
            mode = %self.manifest.mode,
            vats = summary.vats,
            artifacts = summary.artifacts,
            bytes = summary.bytes,
            version,
            "imported export"
        );
        Ok(summary)
    }

    /// Every artifact the manifest's mode includes must be exported, and nothing else
    fn check_completeness(&self, vat: &VatManifest, diagnostics: Vec<DiagnosticInfo>) -> Result<()> {
        let flagged = vat
            .spans
            .iter()
            .zip(vat.span_records())
            .map(|(meta, record)| (meta.exported, record.artifact_name()))
            .chain(
                vat.snapshots
                    .iter()
                    .zip(vat.snapshot_records())
                    .map(|(meta, record)| (meta.exported, record.artifact_name())),
            );
        for (exported, name) in flagged {
            if exported != self.received.contains(&name) {
                return Err(Error::inconsistent(
                    name.to_string(),
                    "export flag disagrees with the payload list",
                ));
            }
        }

        let inventory = vat.inventory(diagnostics);
        for artifact in vat_artifacts(&inventory) {
            let name = artifact.name();
            let required = classify(&artifact, self.manifest.mode);
            let exported = self.received.contains(&name);
            if required != exported {
                let reason = if required {
                    format!("required under {} but not exported", self.manifest.mode)
                } else {
                    format!("exported but not part of {}", self.manifest.mode)
                };
                return Err(Error::inconsistent(name.to_string(), reason));
            }
        }
        Ok(())
    }

    fn check_bundles(&self) -> Result<()> {
        for bundle in &self.manifest.bundles {
            let name = bundle.artifact_name();
            if !classify(&Artifact::Bundle(bundle), self.manifest.mode) {
                return Err(Error::inconsistent(
                    name.to_string(),
                    format!("exported but not part of {}", self.manifest.mode),
                ));
            }
            if !self.received.contains(&name) {
                return Err(Error::inconsistent(name.to_string(), "bundle payload missing"));
            }
        }
        Ok(())
    }

    /// Records of spans and snapshots whose payloads were not exported
    fn stage_metadata(&mut self, vat: &VatManifest) -> Result<()> {
        let mut txn = HostTransaction::begin(&self.scratch);
        for span in vat.span_records().iter().filter(|span| !span.populated) {
            self.store.transcripts().import_span_record(&mut txn, span)?;
        }
        for snapshot in vat.snapshot_records().iter().filter(|s| !s.populated) {
            self.store
                .snapshots()
                .import_snapshot_record(&mut txn, snapshot)?;
        }
        self.units
            .entry(Unit::Vat(vat.vat_id.clone()))
            .or_default()
            .merge(txn.into_batch());
        Ok(())
    }
}

fn verify_hash(name: &ArtifactName, entry: &ArtifactEntry, bytes: &[u8]) -> Result<()> {
    let actual = ContentHash::of(bytes);
    if actual != entry.hash {
        return Err(Error::hash_mismatch(name.to_string(), entry.hash, actual));
    }
    Ok(())
}

fn check_manifest_order(manifest: &ExportManifest) -> Result<()> {
    for pair in manifest.vats.windows(2) {
        if pair[0].vat_id >= pair[1].vat_id {
            return Err(Error::inconsistent(
                pair[1].vat_id.to_string(),
                "manifest vats out of order or duplicated",
            ));
        }
    }
    for pair in manifest.bundles.windows(2) {
        if pair[0].bundle_id >= pair[1].bundle_id {
            return Err(Error::inconsistent(
                pair[1].bundle_id.to_string(),
                "manifest bundles out of order or duplicated",
            ));
        }
    }
    for bundle in &manifest.bundles {
        if let Some(owner) = bundle.owners.iter().find(|vat_id| manifest.vat(vat_id).is_none()) {
            return Err(Error::inconsistent(
                bundle.bundle_id.to_string(),
                format!("owner {} missing from manifest", owner),
            ));
        }
    }
    for pair in manifest.artifacts.windows(2) {
        if pair[0].name >= pair[1].name {
            return Err(Error::inconsistent(
                pair[1].name.to_string(),
                "manifest artifacts out of order or duplicated",
            ));
        }
    }
    for entry in &manifest.artifacts {
        if entry.kind != entry.name.kind() {
            return Err(Error::inconsistent(
                entry.name.to_string(),
                format!("kind tag {} does not match name", entry.kind),
            ));
        }
        if let Some(vat_id) = entry.name.vat_id() {
            if manifest.vat(vat_id).is_none() {
                return Err(Error::inconsistent(entry.name.to_string(), "vat missing from manifest"));
            }
        }
    }
    Ok(())
}

/// Structural checks on one vat's records
fn validate_vat(vat: &VatManifest) -> Result<()> {
    let subject = vat.vat_id.to_string();

    let mut expected_start = 0;
    for span in &vat.spans {
        if span.start_pos != expected_start {
            return Err(Error::inconsistent(
                &subject,
                format!(
                    "span starting at {} does not continue from {}",
                    span.start_pos, expected_start
                ),
            ));
        }
        if span.end_pos < span.start_pos {
            return Err(Error::inconsistent(
                &subject,
                format!("span {}..{} ends before it starts", span.start_pos, span.end_pos),
            ));
        }
        expected_start = span.end_pos;
    }

    let current: Vec<usize> = vat
        .spans
        .iter()
        .enumerate()
        .filter(|(_, span)| span.is_current)
        .map(|(index, _)| index)
        .collect();
    match current.as_slice() {
        [] => {}
        [index] if *index + 1 == vat.spans.len() => {}
        _ => {
            return Err(Error::inconsistent(
                &subject,
                "the open span must be unique and last",
            ))
        }
    }
    for pair in vat.spans.windows(2) {
        if pair[0].incarnation > pair[1].incarnation {
            return Err(Error::inconsistent(&subject, "incarnations go backwards"));
        }
    }
    let incarnation = vat.spans.last().map(|span| span.incarnation).unwrap_or(0);
    if vat.incarnation != incarnation {
        return Err(Error::inconsistent(
            &subject,
            format!(
                "incarnation {} does not match its spans ({})",
                vat.incarnation, incarnation
            ),
        ));
    }

    let end = expected_start;
    let boundaries: BTreeSet<u64> = vat
        .spans
        .iter()
        .flat_map(|span| {
            let closed_end = (!span.is_current).then_some(span.end_pos);
            std::iter::once(span.start_pos).chain(closed_end)
        })
        .collect();
    for snapshot in &vat.snapshots {
        if snapshot.position > end {
            return Err(Error::inconsistent(
                &subject,
                format!(
                    "snapshot at position {} lies beyond the transcript end {}",
                    snapshot.position, end
                ),
            ));
        }
        if !boundaries.contains(&snapshot.position) {
            return Err(Error::inconsistent(
                &subject,
                format!(
                    "snapshot at position {} is not on a span boundary",
                    snapshot.position
                ),
            ));
        }
    }

    let active: Vec<u64> = vat
        .snapshots
        .iter()
        .filter(|snapshot| snapshot.in_use)
        .map(|snapshot| snapshot.position)
        .collect();
    if active.len() > 1 {
        return Err(Error::inconsistent(&subject, "more than one active snapshot"));
    }
    if active.first().copied() != vat.active_snapshot {
        return Err(Error::inconsistent(
            &subject,
            format!(
                "active snapshot {:?} does not match snapshot records {:?}",
                vat.active_snapshot, active
            ),
        ));
    }
    Ok(())
}
