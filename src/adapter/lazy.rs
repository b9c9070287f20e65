//! Lazily loaded attributes
//!
//! Each lazily loaded field knows whether a cached record already answers it and
//! what to substitute when the backend cannot.

use std::fmt;

use crate::attributes::{unix_now, FileAttributes, Visibility};
use crate::backend::MetadataKind;

/// Attribute a caller can ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeKind {
    Visibility,
    MimeType,
    LastModified,
    FileSize,
    /// Default-algorithm checksum
    Checksum,
}

impl AttributeKind {
    pub(crate) fn metadata_kind(&self) -> MetadataKind {
        match self {
            AttributeKind::Visibility => MetadataKind::Visibility,
            AttributeKind::MimeType => MetadataKind::MimeType,
            AttributeKind::LastModified => MetadataKind::LastModified,
            AttributeKind::FileSize => MetadataKind::FileSize,
            AttributeKind::Checksum => MetadataKind::Checksum,
        }
    }
}

impl fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.metadata_kind())
    }
}

/// Record field loaded from the backend on first use
///
/// Checksums are cached per algorithm and have their own path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecordField {
    Visibility,
    MimeType,
    LastModified,
    FileSize,
}

impl RecordField {
    /// Whether `record` already carries this field
    pub(crate) fn is_known(&self, record: &FileAttributes) -> bool {
        match self {
            RecordField::Visibility => record.visibility().is_some(),
            RecordField::MimeType => record.mime_type().is_some(),
            RecordField::LastModified => record.last_modified().is_some(),
            RecordField::FileSize => record.file_size().is_some(),
        }
    }

    /// Stand-in value when the backend cannot report this field
    pub(crate) fn placeholder(&self, path: &str) -> FileAttributes {
        let record = FileAttributes::new(path);
        match self {
            RecordField::Visibility => record.with_visibility(Visibility::Absent),
            RecordField::MimeType => record.with_mime_type(""),
            RecordField::LastModified => record.with_last_modified(unix_now()),
            RecordField::FileSize => record.with_file_size(0),
        }
    }
}

impl fmt::Display for RecordField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            RecordField::Visibility => MetadataKind::Visibility,
            RecordField::MimeType => MetadataKind::MimeType,
            RecordField::LastModified => MetadataKind::LastModified,
            RecordField::FileSize => MetadataKind::FileSize,
        };
        write!(f, "{}", kind)
    }
}

/// Value of a single attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    Visibility(Visibility),
    MimeType(String),
    /// Seconds since the Unix epoch
    LastModified(u64),
    FileSize(u64),
    Checksum(String),
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Visibility(v) => write!(f, "{}", v),
            AttributeValue::MimeType(m) => f.write_str(m),
            AttributeValue::LastModified(t) => write!(f, "{}", t),
            AttributeValue::FileSize(s) => write!(f, "{}", s),
            AttributeValue::Checksum(c) => f.write_str(c),
        }
    }
}
