//! Core types for vatstore
//!
//! This crate defines the vocabulary shared by every layer of the store:
//! - Identifiers: [`VatId`], [`BundleId`], [`DiagnosticName`]
//! - Content hashing: [`ContentHash`], [`SpanHasher`]
//! - Artifact modes: [`ArtifactMode`]
//! - Transcript entries: [`TranscriptEntry`], [`SyscallRecord`]
//! - Configuration: [`StoreConfig`], [`DurabilityMode`]
//! - Errors: [`Error`], [`Result`]

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod entry;
pub mod error;
pub mod hash;
pub mod mode;
pub mod types;

pub use config::{DurabilityMode, StoreConfig, DEFAULT_COMPRESSION_LEVEL};
pub use entry::{SyscallRecord, TranscriptEntry};
pub use error::{Error, Result};
pub use hash::{ContentHash, SpanHasher};
pub use mode::ArtifactMode;
pub use types::{BundleId, DiagnosticName, VatId, BUNDLE_ID_PREFIX, MAX_IDENTIFIER_LEN};
