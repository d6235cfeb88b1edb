//! Export and import for vatstore
//!
//! An export is a consistent, mode-filtered copy of the artifact store:
//!
//! | Step | Type | Notes |
//! |------|------|-------|
//! | classify + describe | [`ExportSession`] | pinned read view, canonical manifest |
//! | pack | [`ArchiveWriter`] | `.vatexport.tar.zst`, deterministic bytes |
//! | unpack | [`ArchiveReader`] | version and hash checks |
//! | restore | [`ImportSession`] | empty target, single commit |
//!
//! Sessions can also be driven directly, payload by payload, without ever
//! building an archive.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod archive;
pub mod error;
pub mod exporter;
pub mod importer;
pub mod manifest;

pub use archive::{
    import_archive, import_contents, paths, ArchiveContents, ArchiveReader, ArchiveWriter,
    ExportInfo, DEFAULT_ARCHIVE_LEVEL, EXPORT_EXTENSION,
};
pub use error::{ExportError, ExportResult};
pub use exporter::ExportSession;
pub use importer::{ImportSession, ImportSummary};
pub use manifest::{
    ArtifactEntry, ExportManifest, SnapshotMeta, SpanMeta, VatManifest, EXPORT_FORMAT_VERSION,
    HASH_ALGORITHM,
};
