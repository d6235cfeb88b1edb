//! Artifact stores for vatstore
//!
//! This crate implements the per-vat artifacts a kernel persists and how
//! long it keeps them:
//! - Transcript store: append-only spans with rolling content hashes
//! - Snapshot store: content-addressed heap checkpoints, optionally zstd
//! - Bundle store: content-addressed code packages with owners sets
//! - Diagnostics: debug-only per-vat blobs
//! - Classifier: which artifacts each [`ArtifactMode`] includes
//! - Retention: compaction and explicit pruning driven by the classifier
//! - [`ArtifactStore`] / [`Crank`]: the facade that batches one crank's
//!   writes into a single host transaction
//!
//! [`ArtifactMode`]: vatstore_core::ArtifactMode

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod artifact;
pub mod bundle;
pub mod classify;
pub mod diagnostic;
pub mod inventory;
pub mod keys;
pub mod records;
pub mod retention;
pub mod snapshot;
pub mod store;
pub mod transcript;

pub use artifact::{ArtifactKind, ArtifactName};
pub use bundle::BundleStore;
pub use classify::{classify, classify_str, vat_artifacts, Artifact};
pub use diagnostic::DiagnosticStore;
pub use inventory::{list_vats, Inventory, VatInventory};
pub use records::{BundleRecord, DiagnosticInfo, SnapshotRecord, SpanRecord};
pub use retention::CompactionReport;
pub use snapshot::SnapshotStore;
pub use store::{ArtifactReader, ArtifactStore, Crank};
pub use transcript::{hash_span_bytes, SpanState, TranscriptStore};
