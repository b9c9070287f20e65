//! In-memory backend
//!
//! Keeps objects in process memory. Every call is counted per operation and
//! a failure can be queued for the next call of an operation, which makes it
//! the reference backend for exercising the caching adapter.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use sha1::{Digest, Sha1};
use tokio::io::AsyncReadExt;
use tracing::{debug, trace};

use super::errors::{BackendError, MetadataKind};
use super::types::{ChecksumAlgorithm, ContentStream, StorageEntry, WriteOptions};
use super::Backend;
use crate::attributes::{unix_now, FileAttributes, Visibility, ETAG};

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone)]
struct StoredObject {
    contents: Vec<u8>,
    visibility: Visibility,
    mime_type: String,
    last_modified: u64,
}

impl StoredObject {
    fn new(contents: Vec<u8>, options: &WriteOptions) -> Self {
        Self {
            contents,
            visibility: options.visibility.unwrap_or(Visibility::Private),
            mime_type: options
                .mime_type
                .clone()
                .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string()),
            last_modified: unix_now(),
        }
    }

    fn sha1(&self) -> String {
        let mut hasher = Sha1::new();
        hasher.update(&self.contents);
        format!("{:x}", hasher.finalize())
    }
}

/// Object store held entirely in memory
#[derive(Default)]
pub struct MemoryBackend {
    /// Objects by normalized path
    objects: RwLock<BTreeMap<String, StoredObject>>,
    /// Explicitly created directories
    directories: RwLock<BTreeSet<String>>,
    /// Base URL for public links (None = not a public binding)
    public_base_url: Option<String>,
    /// Call counts by operation name
    calls: Mutex<HashMap<&'static str, usize>>,
    /// Failures queued for the next call of an operation
    failures: Mutex<HashMap<&'static str, BackendError>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a public binding serving links under `base_url`
    pub fn with_public_url(base_url: impl Into<String>) -> Self {
        Self {
            public_base_url: Some(base_url.into()),
            ..Self::default()
        }
    }

    /// Number of calls made to an operation (e.g. `"read"`, `"file_exists"`)
    pub fn calls(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(operation)
            .copied()
            .unwrap_or(0)
    }

    /// Total number of calls across all operations
    pub fn total_calls(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .sum()
    }

    /// Make the next call of `operation` fail with `error`
    pub fn fail_next(&self, operation: &'static str, error: BackendError) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(operation, error);
    }

    /// Stored bytes for a path, bypassing call accounting
    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        self.objects_read()
            .get(&normalize(path))
            .map(|o| o.contents.clone())
    }

    /// Remove an object out of band, as another writer would
    pub fn remove(&self, path: &str) -> bool {
        self.objects_write().remove(&normalize(path)).is_some()
    }

    fn enter(&self, operation: &'static str, path: &str) -> Result<(), BackendError> {
        *self
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(operation)
            .or_insert(0) += 1;
        trace!(operation = operation, path = path, "Memory backend call");

        match self
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(operation)
        {
            Some(err) => {
                debug!(operation = operation, path = path, error = %err, "Injected backend failure");
                Err(err)
            }
            None => Ok(()),
        }
    }

    fn objects_read(&self) -> RwLockReadGuard<'_, BTreeMap<String, StoredObject>> {
        self.objects.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn objects_write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, StoredObject>> {
        self.objects.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn directories_read(&self) -> RwLockReadGuard<'_, BTreeSet<String>> {
        self.directories.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn directories_write(&self) -> RwLockWriteGuard<'_, BTreeSet<String>> {
        self.directories.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn object(&self, path: &str) -> Option<StoredObject> {
        self.objects_read().get(&normalize(path)).cloned()
    }

    fn metadata(&self, path: &str, kind: MetadataKind) -> Result<StoredObject, BackendError> {
        self.object(path)
            .ok_or_else(|| BackendError::unretrievable(path, kind, "object does not exist"))
    }

    fn store(&self, path: &str, object: StoredObject) {
        debug!(path = path, size = object.contents.len(), "Stored object in memory backend");
        self.objects_write().insert(normalize(path), object);
    }
}

/// Normalize a path for consistent lookup
fn normalize(path: &str) -> String {
    path.trim_matches('/').to_string()
}

/// Listing prefix for a directory ("" for the root)
fn dir_prefix(path: &str) -> String {
    let dir = normalize(path);
    if dir.is_empty() {
        dir
    } else {
        format!("{}/", dir)
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn file_exists(&self, path: &str) -> Result<bool, BackendError> {
        self.enter("file_exists", path)?;
        Ok(self.objects_read().contains_key(&normalize(path)))
    }

    async fn directory_exists(&self, path: &str) -> Result<bool, BackendError> {
        self.enter("directory_exists", path)?;
        let dir = normalize(path);
        if dir.is_empty() || self.directories_read().contains(&dir) {
            return Ok(true);
        }
        let prefix = dir_prefix(&dir);
        Ok(self.objects_read().keys().any(|k| k.starts_with(&prefix)))
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, BackendError> {
        self.enter("read", path)?;
        self.object(path)
            .map(|o| o.contents)
            .ok_or_else(|| BackendError::NotFound(path.to_string()))
    }

    async fn read_stream(&self, path: &str) -> Result<ContentStream, BackendError> {
        self.enter("read_stream", path)?;
        self.object(path)
            .map(|o| ContentStream::from_bytes(o.contents))
            .ok_or_else(|| BackendError::NotFound(path.to_string()))
    }

    async fn write(
        &self,
        path: &str,
        contents: &[u8],
        options: &WriteOptions,
    ) -> Result<(), BackendError> {
        self.enter("write", path)?;
        self.store(path, StoredObject::new(contents.to_vec(), options));
        Ok(())
    }

    async fn write_stream(
        &self,
        path: &str,
        contents: &mut ContentStream,
        options: &WriteOptions,
    ) -> Result<(), BackendError> {
        self.enter("write_stream", path)?;
        let mut data = Vec::new();
        contents
            .read_to_end(&mut data)
            .await
            .map_err(|e| BackendError::from_io(path, &e))?;
        self.store(path, StoredObject::new(data, options));
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), BackendError> {
        self.enter("delete", path)?;
        self.objects_write().remove(&normalize(path));
        Ok(())
    }

    async fn delete_directory(&self, path: &str) -> Result<(), BackendError> {
        self.enter("delete_directory", path)?;
        let dir = normalize(path);
        let prefix = dir_prefix(&dir);
        self.objects_write().retain(|k, _| !k.starts_with(&prefix));
        self.directories_write()
            .retain(|d| d != &dir && !d.starts_with(&prefix));
        Ok(())
    }

    async fn create_directory(
        &self,
        path: &str,
        _options: &WriteOptions,
    ) -> Result<(), BackendError> {
        self.enter("create_directory", path)?;
        self.directories_write().insert(normalize(path));
        Ok(())
    }

    async fn list_contents(
        &self,
        path: &str,
        recursive: bool,
    ) -> Result<Vec<StorageEntry>, BackendError> {
        self.enter("list_contents", path)?;
        let prefix = dir_prefix(path);

        let mut files = Vec::new();
        let mut dirs = BTreeSet::new();

        for key in self.objects_read().keys() {
            let Some(rest) = key.strip_prefix(&prefix) else {
                continue;
            };
            let components: Vec<&str> = rest.split('/').collect();
            if components.len() == 1 {
                files.push(key.clone());
                continue;
            }
            if recursive {
                files.push(key.clone());
                for depth in 1..components.len() {
                    dirs.insert(format!("{}{}", prefix, components[..depth].join("/")));
                }
            } else {
                dirs.insert(format!("{}{}", prefix, components[0]));
            }
        }

        for dir in self.directories_read().iter() {
            if let Some(rest) = dir.strip_prefix(&prefix) {
                if !rest.is_empty() && (recursive || !rest.contains('/')) {
                    dirs.insert(dir.clone());
                }
            }
        }

        let mut entries: Vec<StorageEntry> =
            dirs.into_iter().map(StorageEntry::directory).collect();
        entries.extend(files.into_iter().map(StorageEntry::file));
        Ok(entries)
    }

    async fn move_file(
        &self,
        from: &str,
        to: &str,
        options: &WriteOptions,
    ) -> Result<(), BackendError> {
        self.enter("move_file", from)?;
        let mut objects = self.objects_write();
        let Some(mut object) = objects.remove(&normalize(from)) else {
            return Err(BackendError::UnableToMoveFile {
                from: from.to_string(),
                to: to.to_string(),
                reason: "source does not exist".to_string(),
            });
        };
        if let Some(visibility) = options.visibility {
            object.visibility = visibility;
        }
        objects.insert(normalize(to), object);
        Ok(())
    }

    async fn copy_file(
        &self,
        from: &str,
        to: &str,
        options: &WriteOptions,
    ) -> Result<(), BackendError> {
        self.enter("copy_file", from)?;
        let mut objects = self.objects_write();
        let Some(source) = objects.get(&normalize(from)) else {
            return Err(BackendError::UnableToCopyFile {
                from: from.to_string(),
                to: to.to_string(),
                reason: "source does not exist".to_string(),
            });
        };
        let mut copy = source.clone();
        copy.last_modified = unix_now();
        if let Some(visibility) = options.visibility {
            copy.visibility = visibility;
        }
        objects.insert(normalize(to), copy);
        Ok(())
    }

    async fn visibility(&self, path: &str) -> Result<FileAttributes, BackendError> {
        self.enter("visibility", path)?;
        let object = self.metadata(path, MetadataKind::Visibility)?;
        Ok(FileAttributes::new(path).with_visibility(object.visibility))
    }

    async fn set_visibility(
        &self,
        path: &str,
        visibility: Visibility,
    ) -> Result<(), BackendError> {
        self.enter("set_visibility", path)?;
        match self.objects_write().get_mut(&normalize(path)) {
            Some(object) => {
                object.visibility = visibility;
                Ok(())
            }
            None => Err(BackendError::UnableToSetVisibility {
                path: path.to_string(),
                reason: "object does not exist".to_string(),
            }),
        }
    }

    async fn mime_type(&self, path: &str) -> Result<FileAttributes, BackendError> {
        self.enter("mime_type", path)?;
        let object = self.metadata(path, MetadataKind::MimeType)?;
        Ok(FileAttributes::new(path).with_mime_type(object.mime_type))
    }

    async fn last_modified(&self, path: &str) -> Result<FileAttributes, BackendError> {
        self.enter("last_modified", path)?;
        let object = self.metadata(path, MetadataKind::LastModified)?;
        Ok(FileAttributes::new(path).with_last_modified(object.last_modified))
    }

    async fn file_size(&self, path: &str) -> Result<FileAttributes, BackendError> {
        self.enter("file_size", path)?;
        let object = self.metadata(path, MetadataKind::FileSize)?;
        Ok(FileAttributes::new(path)
            .with_file_size(object.contents.len() as u64)
            .with_extra(ETAG, object.sha1()))
    }

    async fn checksum(
        &self,
        path: &str,
        algorithm: Option<ChecksumAlgorithm>,
    ) -> Result<String, BackendError> {
        self.enter("checksum", path)?;
        let object = self.metadata(path, MetadataKind::Checksum)?;
        match algorithm {
            None | Some(ChecksumAlgorithm::Sha1) => Ok(object.sha1()),
            Some(other) => Err(BackendError::ChecksumAlgorithmUnsupported(
                other.name().to_string(),
            )),
        }
    }

    async fn public_url(&self, path: &str) -> Result<String, BackendError> {
        self.enter("public_url", path)?;
        match &self.public_base_url {
            Some(base) => Ok(format!("{}/{}", base.trim_end_matches('/'), normalize(path))),
            None => Err(BackendError::Unsupported(format!("public URL for {}", path))),
        }
    }
}
