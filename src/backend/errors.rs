//! Backend Error Types
//!
//! Structured failures raised by a storage backend.
//! The adapter decides per variant whether to purge, substitute a placeholder or fall back.

use std::fmt;

/// Attribute queried from a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataKind {
    Visibility,
    MimeType,
    LastModified,
    FileSize,
    Checksum,
}

impl fmt::Display for MetadataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MetadataKind::Visibility => "visibility",
            MetadataKind::MimeType => "mime type",
            MetadataKind::LastModified => "last modified",
            MetadataKind::FileSize => "file size",
            MetadataKind::Checksum => "checksum",
        };
        f.write_str(name)
    }
}

/// Backend error types
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("I/O failure: {0}")]
    Io(String),

    #[error("Unable to retrieve {kind} for {path}: {reason}")]
    UnableToRetrieveMetadata {
        path: String,
        kind: MetadataKind,
        reason: String,
    },

    #[error("Unable to set visibility for {path}: {reason}")]
    UnableToSetVisibility { path: String, reason: String },

    #[error("Unable to move {from} to {to}: {reason}")]
    UnableToMoveFile {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Unable to copy {from} to {to}: {reason}")]
    UnableToCopyFile {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Checksum algorithm not supported: {0}")]
    ChecksumAlgorithmUnsupported(String),
}

impl BackendError {
    /// Whether the backend confirmed the object does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound(_))
    }

    /// Whether this is a metadata query the backend could not answer
    pub fn is_unretrievable_metadata(&self) -> bool {
        matches!(self, BackendError::UnableToRetrieveMetadata { .. })
    }

    /// Whether retrying the same call could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, BackendError::Io(_))
    }

    pub fn unretrievable(path: &str, kind: MetadataKind, reason: impl Into<String>) -> Self {
        BackendError::UnableToRetrieveMetadata {
            path: path.to_string(),
            kind,
            reason: reason.into(),
        }
    }

    /// Map an I/O error from a local or transport layer
    pub fn from_io(path: &str, err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => BackendError::NotFound(path.to_string()),
            std::io::ErrorKind::PermissionDenied => {
                BackendError::PermissionDenied(path.to_string())
            }
            std::io::ErrorKind::Unsupported => BackendError::Unsupported(err.to_string()),
            _ => BackendError::Io(format!("{}: {}", path, err)),
        }
    }
}
