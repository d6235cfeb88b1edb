//! Convenient imports for vatstore.
//!
//! ```ignore
//! use vatstore::prelude::*;
//!
//! let store = VatStore::ephemeral()?;
//! let mut crank = store.begin_crank();
//! crank.init_vat(&VatId::new("v1")?)?;
//! crank.commit()?;
//! ```

// Main entry point
pub use crate::database::{VatStore, VatStoreBuilder};

// Error handling
pub use crate::error::{Error, Result};

// Core types
pub use vatstore_core::{
    ArtifactMode, BundleId, ContentHash, DiagnosticName, StoreConfig, SyscallRecord,
    TranscriptEntry, VatId,
};

// Artifact layer
pub use vatstore_artifacts::{ArtifactName, ArtifactReader, CompactionReport, Crank};

// Export/import
pub use vatstore_export::{ExportInfo, ExportManifest, ExportSession, ImportSummary};

// Re-export serde_json for building transcript entries
pub use serde_json::json;
