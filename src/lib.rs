//! # vatstore
//!
//! Durable artifact storage for replayable vat execution.
//!
//! A kernel runs each vat as a sequence of cranks. vatstore keeps what it
//! needs to restart, replay or audit those vats:
//!
//! - transcripts: every delivery, in hash-chained spans
//! - heap snapshots: content-addressed checkpoints that bound replay
//! - bundles: content-addressed code, retained by the vats that run it
//! - diagnostics: debug-only per-vat blobs
//!
//! ## Quick Start
//!
//! ```ignore
//! use vatstore::prelude::*;
//!
//! let store = VatStore::builder()
//!     .path("./kernel-store")
//!     .artifact_mode(ArtifactMode::Operational)
//!     .open()?;
//!
//! let v1 = VatId::new("v1")?;
//! let mut crank = store.begin_crank();
//! crank.init_vat(&v1)?;
//! crank.append_entry(&v1, 0, &TranscriptEntry::new(0, json!(["deliver", "start"])))?;
//! crank.save_snapshot(&v1, &heap, 1)?;
//! crank.commit()?;
//!
//! // Copy what a fresh kernel needs to resume
//! store.export_to_file(ArtifactMode::Operational, Path::new("v1.vatexport.tar.zst"))?;
//! ```
//!
//! ## Artifact Modes
//!
//! | Mode | Keeps |
//! |------|-------|
//! | `operational` | active snapshot, transcript since it, retained bundles |
//! | `replay` | also history back to the oldest snapshot of the incarnation |
//! | `archival` | all transcripts, snapshots and bundles |
//! | `debug` | everything, including diagnostics |

#![warn(missing_docs)]

mod database;
mod error;

pub mod prelude;

pub use database::{VatStore, VatStoreBuilder};
pub use error::{Error, Result};

pub use vatstore_artifacts as artifacts;
pub use vatstore_core as core;
pub use vatstore_export as export;
pub use vatstore_storage as storage;
