//! Unified error types for vatstore.
//!
//! Store and export errors are folded into one flat enum grouped by what
//! the caller can do about them.

use thiserror::Error;
use vatstore_export::ExportError;

/// All vatstore errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Artifact, vat or record not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Transcript append or rollover at the wrong position, or no open span
    #[error("sequencing error: {0}")]
    Sequencing(String),

    /// Content failed verification (hash mismatch, inconsistent import, corruption)
    #[error("integrity error: {0}")]
    Integrity(String),

    /// Pruning refused because the retention mode still needs the artifact
    #[error("{0}")]
    StillRequired(String),

    /// Malformed identifier or artifact mode
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Operation not valid in the current state
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Another crank committed first
    #[error("conflict: {0}")]
    Conflict(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or compression error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Export archive could not be read or written
    #[error("archive error: {0}")]
    Archive(String),

    /// Bad configuration
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for vatstore operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this error is retryable.
    ///
    /// A conflicting crank may succeed when re-run against fresh state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    /// Check if this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Check if this is a sequencing error.
    pub fn is_sequencing(&self) -> bool {
        matches!(self, Error::Sequencing(_))
    }

    /// Check if content failed verification.
    pub fn is_integrity(&self) -> bool {
        matches!(self, Error::Integrity(_))
    }
}

impl From<vatstore_core::Error> for Error {
    fn from(e: vatstore_core::Error) -> Self {
        use vatstore_core::Error as CoreError;
        let msg = e.to_string();
        match e {
            CoreError::NotFound(what) => Error::NotFound(what),
            CoreError::NoActiveSpan { .. }
            | CoreError::OutOfOrder { .. }
            | CoreError::PositionMismatch { .. } => Error::Sequencing(msg),
            CoreError::HashMismatch { .. }
            | CoreError::InconsistentImport { .. }
            | CoreError::Corruption(_) => Error::Integrity(msg),
            CoreError::StillRequired { .. } => Error::StillRequired(msg),
            CoreError::InvalidMode(_) | CoreError::InvalidIdentifier { .. } => {
                Error::InvalidInput(msg)
            }
            CoreError::InvalidOperation(op) => Error::InvalidOperation(op),
            CoreError::TransactionConflict { .. } => Error::Conflict(msg),
            CoreError::Io(io_err) => Error::Io(io_err),
            CoreError::Serialization(_) | CoreError::Compression(_) => Error::Serialization(msg),
            CoreError::Config(detail) => Error::Config(detail),
        }
    }
}

impl From<ExportError> for Error {
    fn from(e: ExportError) -> Self {
        match e {
            ExportError::Core(core) => core.into(),
            ExportError::Io(io_err) => Error::Io(io_err),
            ExportError::Json(json) => Error::Serialization(json.to_string()),
            ExportError::Compression(msg) => Error::Serialization(msg),
            ExportError::Archive(msg) => Error::Archive(msg),
            e @ (ExportError::MissingFile(_) | ExportError::UnsupportedVersion { .. }) => {
                Error::Integrity(e.to_string())
            }
        }
    }
}
