//! Export and import error types

use thiserror::Error;

/// Errors from exporting, archiving and importing
#[derive(Debug, Error)]
pub enum ExportError {
    /// Store-level failure (missing artifact, hash mismatch, inconsistent import, ...)
    #[error(transparent)]
    Core(#[from] vatstore_core::Error),

    /// Tar archive could not be written or read
    #[error("archive error: {0}")]
    Archive(String),

    /// zstd stream could not be encoded or decoded
    #[error("compression error: {0}")]
    Compression(String),

    /// Archive lacks a file the manifest requires
    #[error("missing file in archive: {0}")]
    MissingFile(String),

    /// Manifest names a format this build cannot read
    #[error("unsupported export format version {version}")]
    UnsupportedVersion {
        /// Version found in the manifest
        version: u32,
    },

    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Manifest JSON could not be encoded or decoded
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for export operations
pub type ExportResult<T> = Result<T, ExportError>;

impl ExportError {
    /// Create an Archive error
    pub fn archive(msg: impl Into<String>) -> Self {
        ExportError::Archive(msg.into())
    }

    /// Create a Compression error
    pub fn compression(msg: impl Into<String>) -> Self {
        ExportError::Compression(msg.into())
    }

    /// Create a MissingFile error
    pub fn missing_file(name: impl Into<String>) -> Self {
        ExportError::MissingFile(name.into())
    }

    /// Check if the import was rejected for integrity reasons
    pub fn rejects_import(&self) -> bool {
        match self {
            ExportError::Core(e) => e.rejects_import(),
            ExportError::MissingFile(_) | ExportError::UnsupportedVersion { .. } => true,
            _ => false,
        }
    }

    /// The store-level error, if this wraps one
    pub fn as_core(&self) -> Option<&vatstore_core::Error> {
        match self {
            ExportError::Core(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ExportError::missing_file("vatexport/MANIFEST.json");
        assert!(err.to_string().contains("MANIFEST.json"));
        assert!(err.rejects_import());

        let err = ExportError::UnsupportedVersion { version: 9 };
        assert_eq!(err.to_string(), "unsupported export format version 9");
    }

    #[test]
    fn test_core_errors_pass_through() {
        let err: ExportError = vatstore_core::Error::inconsistent("v7", "gap at 12").into();
        assert!(err.rejects_import());
        assert!(err.as_core().is_some());
        assert_eq!(err.to_string(), "inconsistent import of v7: gap at 12");

        let err: ExportError = vatstore_core::Error::not_found("snapshot.v7.10").into();
        assert!(!err.rejects_import());
    }
}
