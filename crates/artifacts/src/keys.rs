//! Storage key schema
//!
//! Every artifact store lives under its own key prefix in the host store.
//! Positions are zero-padded to 20 digits so key order equals numeric
//! order, and identifiers never contain `.`, so a prefix ending in `.`
//! selects exactly one vat.
//!
//! ```text
//! transcript.current.<vat>              open span record (JSON)
//! transcript.span.<vat>.<start>         closed span record (JSON)
//! transcript.item.<vat>.<pos>           canonical entry bytes
//! snapshot.meta.<vat>.<pos>             snapshot record (JSON)
//! snapshot.data.<vat>.<pos>             heap bytes (maybe zstd)
//! snapshot.active.<vat>                 position of the active snapshot
//! bundle.meta.<bundleID>                bundle record (JSON)
//! bundle.data.<bundleID>                bundle bytes
//! diagnostic.<vat>.<name>               debug-only bytes
//! ```

use vatstore_core::{BundleId, DiagnosticName, VatId};

/// Prefix of open span records
pub const TRANSCRIPT_CURRENT: &str = "transcript.current.";
/// Prefix of closed span records
pub const TRANSCRIPT_SPAN: &str = "transcript.span.";
/// Prefix of transcript items
pub const TRANSCRIPT_ITEM: &str = "transcript.item.";
/// Prefix of snapshot records
pub const SNAPSHOT_META: &str = "snapshot.meta.";
/// Prefix of snapshot heap bytes
pub const SNAPSHOT_DATA: &str = "snapshot.data.";
/// Prefix of active snapshot pointers
pub const SNAPSHOT_ACTIVE: &str = "snapshot.active.";
/// Prefix of bundle records
pub const BUNDLE_META: &str = "bundle.meta.";
/// Prefix of bundle bytes
pub const BUNDLE_DATA: &str = "bundle.data.";
/// Prefix of diagnostic artifacts
pub const DIAGNOSTIC: &str = "diagnostic.";

/// Every prefix owned by the artifact stores
pub const ALL_PREFIXES: [&str; 9] = [
    TRANSCRIPT_CURRENT,
    TRANSCRIPT_SPAN,
    TRANSCRIPT_ITEM,
    SNAPSHOT_META,
    SNAPSHOT_DATA,
    SNAPSHOT_ACTIVE,
    BUNDLE_META,
    BUNDLE_DATA,
    DIAGNOSTIC,
];

/// Prefixes under which a vat's records appear
pub const VAT_RECORD_PREFIXES: [&str; 4] =
    [TRANSCRIPT_CURRENT, TRANSCRIPT_SPAN, SNAPSHOT_META, DIAGNOSTIC];

fn pos(position: u64) -> String {
    format!("{:020}", position)
}

/// Key of a vat's open span record
pub fn current_span(vat_id: &VatId) -> String {
    format!("{}{}", TRANSCRIPT_CURRENT, vat_id)
}

/// Key of a closed span record
pub fn closed_span(vat_id: &VatId, start_pos: u64) -> String {
    format!("{}{}.{}", TRANSCRIPT_SPAN, vat_id, pos(start_pos))
}

/// Prefix of a vat's closed span records
pub fn closed_spans_prefix(vat_id: &VatId) -> String {
    format!("{}{}.", TRANSCRIPT_SPAN, vat_id)
}

/// Key of one transcript item
pub fn item(vat_id: &VatId, position: u64) -> String {
    format!("{}{}.{}", TRANSCRIPT_ITEM, vat_id, pos(position))
}

/// Prefix of a vat's transcript items
pub fn items_prefix(vat_id: &VatId) -> String {
    format!("{}{}.", TRANSCRIPT_ITEM, vat_id)
}

/// Key of a snapshot record
pub fn snapshot_meta(vat_id: &VatId, position: u64) -> String {
    format!("{}{}.{}", SNAPSHOT_META, vat_id, pos(position))
}

/// Prefix of a vat's snapshot records
pub fn snapshot_meta_prefix(vat_id: &VatId) -> String {
    format!("{}{}.", SNAPSHOT_META, vat_id)
}

/// Key of snapshot heap bytes
pub fn snapshot_data(vat_id: &VatId, position: u64) -> String {
    format!("{}{}.{}", SNAPSHOT_DATA, vat_id, pos(position))
}

/// Prefix of a vat's snapshot heap bytes
pub fn snapshot_data_prefix(vat_id: &VatId) -> String {
    format!("{}{}.", SNAPSHOT_DATA, vat_id)
}

/// Key of a vat's active snapshot pointer
pub fn snapshot_active(vat_id: &VatId) -> String {
    format!("{}{}", SNAPSHOT_ACTIVE, vat_id)
}

/// Key of a bundle record
pub fn bundle_meta(bundle_id: &BundleId) -> String {
    format!("{}{}", BUNDLE_META, bundle_id)
}

/// Key of bundle bytes
pub fn bundle_data(bundle_id: &BundleId) -> String {
    format!("{}{}", BUNDLE_DATA, bundle_id)
}

/// Key of a diagnostic artifact
pub fn diagnostic(vat_id: &VatId, name: &DiagnosticName) -> String {
    format!("{}{}.{}", DIAGNOSTIC, vat_id, name)
}

/// Prefix of a vat's diagnostic artifacts
pub fn diagnostics_prefix(vat_id: &VatId) -> String {
    format!("{}{}.", DIAGNOSTIC, vat_id)
}

/// Extract the vat segment of a key under `prefix`
pub fn vat_of(prefix: &str, key: &str) -> Option<VatId> {
    let rest = key.strip_prefix(prefix)?;
    let segment = rest.split('.').next()?;
    VatId::new(segment).ok()
}

/// Extract the trailing segment of a key (position or name)
pub fn last_segment(key: &str) -> Option<&str> {
    key.rsplit('.').next()
}
