//! Error types for the artifact store
//!
//! One error type is shared by every store so a crank can propagate any
//! failure with `?` and abort its host transaction.
//!
//! ## Taxonomy
//!
//! | Variant | Meaning | Caller reaction |
//! |---------|---------|-----------------|
//! | `NotFound` | artifact or vat absent | fall back (e.g. replay from span 0) |
//! | `NoActiveSpan`, `OutOfOrder`, `PositionMismatch` | sequencing violated | abort the crank |
//! | `HashMismatch` | corrupt or tampered import data | reject the import |
//! | `InconsistentImport` | import is well-formed but incoherent | reject the import |
//! | `InvalidMode` | unknown mode string | fix the caller |

use crate::mode::ArtifactMode;
use crate::types::VatId;
use thiserror::Error;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, Error>;

/// All artifact store errors
#[derive(Debug, Error)]
pub enum Error {
    /// Referenced artifact, record or vat does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The vat has no open transcript span
    #[error("vat {vat_id} has no active transcript span")]
    NoActiveSpan {
        /// Vat that was addressed
        vat_id: VatId,
    },

    /// An entry was appended at the wrong position
    #[error("out-of-order append to vat {vat_id}: expected position {expected}, got {actual}")]
    OutOfOrder {
        /// Vat that was addressed
        vat_id: VatId,
        /// Next position of the open span
        expected: u64,
        /// Position supplied by the caller
        actual: u64,
    },

    /// A rollover or snapshot did not land on the transcript end
    #[error("position mismatch for vat {vat_id}: expected {expected}, got {actual}")]
    PositionMismatch {
        /// Vat that was addressed
        vat_id: VatId,
        /// Position the store expected
        expected: u64,
        /// Position supplied by the caller
        actual: u64,
    },

    /// Bytes do not hash to the advertised content hash
    #[error("hash mismatch for {artifact}: expected {expected}, got {actual}")]
    HashMismatch {
        /// Offending artifact name
        artifact: String,
        /// Hash from the manifest or record
        expected: String,
        /// Hash of the bytes actually supplied
        actual: String,
    },

    /// Imported state fails structural validation
    #[error("inconsistent import of {subject}: {reason}")]
    InconsistentImport {
        /// Vat, bundle or artifact the check failed for
        subject: String,
        /// What was wrong
        reason: String,
    },

    /// Mode string outside `operational | replay | archival | debug`
    #[error("invalid artifact mode {0:?}")]
    InvalidMode(String),

    /// Pruning refused because the retention mode still needs the artifact
    #[error("{artifact} is still required under {mode} retention")]
    StillRequired {
        /// Artifact that was to be pruned
        artifact: String,
        /// Retention mode in force
        mode: ArtifactMode,
    },

    /// Operation not allowed in the current state
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Identifier fails validation
    #[error("invalid identifier {value:?}: {reason}")]
    InvalidIdentifier {
        /// Rejected value
        value: String,
        /// Why it was rejected
        reason: String,
    },

    /// Commit attempted on a transaction whose base state is stale
    #[error("transaction conflict: began at version {base_version}, store is at {current_version}")]
    TransactionConflict {
        /// Store version the transaction read from
        base_version: u64,
        /// Store version at commit time
        current_version: u64,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Compression or decompression error
    #[error("compression error: {0}")]
    Compression(String),

    /// Persistent data failed integrity checks
    #[error("corruption: {0}")]
    Corruption(String),

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a NotFound error
    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    /// Create an InvalidIdentifier error
    pub fn invalid_identifier(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidIdentifier {
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create an InconsistentImport error
    pub fn inconsistent(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InconsistentImport {
            subject: subject.into(),
            reason: reason.into(),
        }
    }

    /// Create a HashMismatch error
    pub fn hash_mismatch(
        artifact: impl Into<String>,
        expected: impl ToString,
        actual: impl ToString,
    ) -> Self {
        Error::HashMismatch {
            artifact: artifact.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Check if this is a not-found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Check if this error reports a violated sequencing invariant
    ///
    /// These are always caller bugs; the enclosing crank must abort.
    pub fn is_sequencing(&self) -> bool {
        matches!(
            self,
            Error::NoActiveSpan { .. } | Error::OutOfOrder { .. } | Error::PositionMismatch { .. }
        )
    }

    /// Check if this error rejects an import wholesale
    pub fn rejects_import(&self) -> bool {
        matches!(
            self,
            Error::HashMismatch { .. } | Error::InconsistentImport { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
