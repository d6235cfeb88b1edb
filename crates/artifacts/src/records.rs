//! Metadata records kept alongside artifact bytes
//!
//! Records are stored as JSON under the keys in [`crate::keys`]. They are
//! also what an export manifest carries per vat, so an imported store can
//! rebuild exactly the same metadata even for artifacts whose bytes were
//! not exported.

use crate::artifact::ArtifactName;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use vatstore_core::{BundleId, ContentHash, DiagnosticName, Error, Result, VatId};
use vatstore_storage::{HostTransaction, KvRead};

/// One transcript span: the half-open position range `[start_pos, end_pos)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanRecord {
    /// Owning vat
    pub vat_id: VatId,
    /// First position covered
    pub start_pos: u64,
    /// One past the last position covered
    pub end_pos: u64,
    /// Rolling content hash of the entries
    pub hash: ContentHash,
    /// Whether this is the vat's open span
    pub is_current: bool,
    /// Vat incarnation the span belongs to
    pub incarnation: u64,
    /// Whether the entries are still stored (false after compaction)
    pub populated: bool,
}

impl SpanRecord {
    /// A fresh, empty open span
    pub fn open(vat_id: VatId, start_pos: u64, incarnation: u64) -> Self {
        SpanRecord {
            vat_id,
            start_pos,
            end_pos: start_pos,
            hash: ContentHash::empty_span(),
            is_current: true,
            incarnation,
            populated: true,
        }
    }

    /// Number of entries covered
    pub fn len(&self) -> u64 {
        self.end_pos - self.start_pos
    }

    /// Whether the span covers no positions
    pub fn is_empty(&self) -> bool {
        self.start_pos == self.end_pos
    }

    /// Export identifier of this span
    pub fn artifact_name(&self) -> ArtifactName {
        ArtifactName::Span {
            vat_id: self.vat_id.clone(),
            start_pos: self.start_pos,
            end_pos: self.end_pos,
        }
    }
}

/// One saved heap snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    /// Owning vat
    pub vat_id: VatId,
    /// SHA-256 of the uncompressed heap
    pub snapshot_id: ContentHash,
    /// Transcript position the heap corresponds to
    pub position: u64,
    /// Heap size before compression
    pub uncompressed_size: u64,
    /// Stored size (equal to `uncompressed_size` when not compressed)
    pub compressed_size: u64,
    /// Whether the stored bytes are zstd-compressed
    pub compressed: bool,
    /// Whether this is the vat's active (restart) snapshot
    pub in_use: bool,
    /// Whether the heap bytes are stored
    pub populated: bool,
}

impl SnapshotRecord {
    /// Export identifier of this snapshot
    pub fn artifact_name(&self) -> ArtifactName {
        ArtifactName::Snapshot {
            vat_id: self.vat_id.clone(),
            position: self.position,
        }
    }
}

/// One installed bundle and the vats retaining it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleRecord {
    /// Content-derived identifier
    pub bundle_id: BundleId,
    /// Size of the bundle bytes
    pub size: u64,
    /// Vats currently retaining the bundle
    #[serde(default)]
    pub owners: BTreeSet<VatId>,
}

impl BundleRecord {
    /// Whether some vat retains the bundle
    pub fn is_retained(&self) -> bool {
        !self.owners.is_empty()
    }

    /// Export identifier of this bundle
    pub fn artifact_name(&self) -> ArtifactName {
        ArtifactName::Bundle(self.bundle_id)
    }
}

/// A stored diagnostic artifact, described by its bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticInfo {
    /// Owning vat
    pub vat_id: VatId,
    /// Name within the vat
    pub name: DiagnosticName,
    /// SHA-256 of the bytes
    pub hash: ContentHash,
    /// Size of the bytes
    pub size: u64,
}

impl DiagnosticInfo {
    /// Export identifier of this diagnostic
    pub fn artifact_name(&self) -> ArtifactName {
        ArtifactName::Diagnostic {
            vat_id: self.vat_id.clone(),
            name: self.name.clone(),
        }
    }
}

pub(crate) fn read_json<T, K>(kv: &K, key: &str) -> Result<Option<T>>
where
    T: DeserializeOwned,
    K: KvRead + ?Sized,
{
    match kv.get(key)? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| Error::Corruption(format!("undecodable record {}: {}", key, e))),
        None => Ok(None),
    }
}

pub(crate) fn scan_json<T, K>(kv: &K, prefix: &str) -> Result<Vec<T>>
where
    T: DeserializeOwned,
    K: KvRead + ?Sized,
{
    kv.scan_prefix(prefix)?
        .into_iter()
        .map(|(key, bytes)| {
            serde_json::from_slice(&bytes)
                .map_err(|e| Error::Corruption(format!("undecodable record {}: {}", key, e)))
        })
        .collect()
}

pub(crate) fn write_json<T: Serialize>(
    txn: &mut HostTransaction<'_>,
    key: String,
    record: &T,
) -> Result<()> {
    let bytes = serde_json::to_vec(record)?;
    txn.put(key, bytes);
    Ok(())
}
