//! File attribute records
//!
//! Immutable snapshots of what is known about a stored object, plus the merge
//! used to fold partial updates into a previously cached record.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Extra metadata key recording a confirmed file existence fact
pub const FILE_EXISTS: &str = "fileExists";

/// Extra metadata key recording a confirmed directory existence fact
pub const DIRECTORY_EXISTS: &str = "directoryExists";

/// Extra metadata key holding the computed public URL
pub const PUBLIC_URL: &str = "publicUrl";

/// Extra metadata key holding the backend's opaque content tag
pub const ETAG: &str = "etag";

/// Extra metadata key for the backend's default checksum
pub const CHECKSUM: &str = "checksum";

/// Object visibility as reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
    /// The backend could not report a visibility
    Absent,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
            Visibility::Absent => "",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Known facts about a single storage path
///
/// Values are never mutated once built. The `with_*` methods consume the
/// record and return a new one; cached records are updated through
/// [`merge`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAttributes {
    path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    visibility: Option<Visibility>,
    /// Seconds since the Unix epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_modified: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    extra_metadata: BTreeMap<String, Value>,
}

impl FileAttributes {
    /// Create an empty record for a path
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            file_size: None,
            visibility: None,
            last_modified: None,
            mime_type: None,
            extra_metadata: BTreeMap::new(),
        }
    }

    pub fn with_file_size(mut self, size: u64) -> Self {
        self.file_size = Some(size);
        self
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = Some(visibility);
        self
    }

    pub fn with_last_modified(mut self, timestamp: u64) -> Self {
        self.last_modified = Some(timestamp);
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra_metadata.insert(key.into(), value.into());
        self
    }

    /// Same facts, recorded under another path
    pub fn relocated(&self, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..self.clone()
        }
    }

    /// Drop extra metadata entries rejected by `keep`
    pub fn retain_extra<F>(mut self, mut keep: F) -> Self
    where
        F: FnMut(&str, &Value) -> bool,
    {
        self.extra_metadata.retain(|k, v| keep(k, v));
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn file_size(&self) -> Option<u64> {
        self.file_size
    }

    pub fn visibility(&self) -> Option<Visibility> {
        self.visibility
    }

    pub fn last_modified(&self) -> Option<u64> {
        self.last_modified
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    pub fn extra_metadata(&self) -> &BTreeMap<String, Value> {
        &self.extra_metadata
    }

    pub fn extra(&self, key: &str) -> Option<&Value> {
        self.extra_metadata.get(key)
    }

    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra(key).and_then(Value::as_str)
    }

    /// Cached file existence fact, if one was recorded
    pub fn file_exists(&self) -> Option<bool> {
        self.extra(FILE_EXISTS).and_then(Value::as_bool)
    }

    /// Cached directory existence fact, if one was recorded
    pub fn directory_exists(&self) -> Option<bool> {
        self.extra(DIRECTORY_EXISTS).and_then(Value::as_bool)
    }

    /// Combine with a partial update, see [`merge`]
    pub fn merged_with(&self, extension: &FileAttributes) -> FileAttributes {
        merge(self, extension)
    }
}

/// Fold `extension` into `base`
///
/// Scalar fields set in `extension` win, unset ones keep the base value.
/// Extra metadata merges key by key with `extension` overriding. The path
/// always comes from `base`.
pub fn merge(base: &FileAttributes, extension: &FileAttributes) -> FileAttributes {
    let mut extra_metadata = base.extra_metadata.clone();
    extra_metadata.extend(
        extension
            .extra_metadata
            .iter()
            .map(|(k, v)| (k.clone(), v.clone())),
    );

    FileAttributes {
        path: base.path.clone(),
        file_size: extension.file_size.or(base.file_size),
        visibility: extension.visibility.or(base.visibility),
        last_modified: extension.last_modified.or(base.last_modified),
        mime_type: extension
            .mime_type
            .clone()
            .or_else(|| base.mime_type.clone()),
        extra_metadata,
    }
}

/// Current time in seconds since the Unix epoch
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
