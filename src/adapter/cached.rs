//! Cache-Fronted Adapter
//!
//! Wraps a [`Backend`] with a metadata store and a content stager. Reads are
//! answered from the caches when possible; every mutation purges or rewrites
//! the cached facts of the paths it touches so that a later read never sees
//! state the backend has already moved past.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tempfile::TempPath;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, trace, warn};

use super::checksum::{checksum_from_etag, checksum_key, digest_stream};
use super::config::{AdapterConfig, StreamPolicy};
use super::lazy::{AttributeKind, AttributeValue, RecordField};
use crate::attributes::{
    merge, unix_now, FileAttributes, Visibility, DIRECTORY_EXISTS, ETAG, FILE_EXISTS, PUBLIC_URL,
};
use crate::backend::{
    Backend, BackendError, ChecksumAlgorithm, ContentStream, StorageEntry, WriteOptions,
};
use crate::cache::{CacheKeys, CacheStore, ContentStager};
use crate::error::{CacheError, Result};

/// Algorithm used when the backend has no native default checksum
const FALLBACK_CHECKSUM_ALGORITHM: ChecksumAlgorithm = ChecksumAlgorithm::Sha256;

/// Backend wrapper keeping attribute records and staged content coherent
pub struct CachedAdapter<B> {
    backend: B,
    store: Arc<dyn CacheStore>,
    stager: Arc<ContentStager>,
    keys: CacheKeys,
    config: AdapterConfig,
}

impl<B: Backend> CachedAdapter<B> {
    /// Bind a backend to a metadata store and stager
    ///
    /// Store and stager may be shared with other adapters as long as each
    /// adapter uses its own namespace.
    pub fn new(
        backend: B,
        store: Arc<dyn CacheStore>,
        stager: Arc<ContentStager>,
        config: AdapterConfig,
    ) -> Self {
        info!(
            namespace = %config.namespace,
            stream_policy = ?config.stream_policy,
            staging_dir = %stager.staging_dir().display(),
            "Cache-fronted adapter ready"
        );

        Self {
            backend,
            store,
            keys: CacheKeys::new(config.namespace.clone()),
            stager,
            config,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Stager shared with pipelines that pre-warm content
    pub fn stager(&self) -> &Arc<ContentStager> {
        &self.stager
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// Fingerprint under which content for `path` is staged
    pub fn content_key(&self, path: &str) -> String {
        self.keys.content_key(path)
    }

    // ---- existence ----

    /// Whether a file exists at `path`
    ///
    /// A cached directory fact for the same path answers false.
    pub async fn file_exists(&self, path: &str) -> Result<bool> {
        if let Some(record) = self.cached(path)? {
            if let Some(exists) = record.file_exists() {
                trace!(path = path, exists = exists, "File existence from cache");
                return Ok(exists);
            }
            if record.directory_exists() == Some(true) {
                trace!(path = path, "Path is a cached directory");
                return Ok(false);
            }
        }

        let exists = self
            .timed("file_exists", path, self.backend.file_exists(path))
            .await?;

        if exists {
            self.update(
                path,
                FileAttributes::new(path)
                    .with_extra(FILE_EXISTS, true)
                    .with_extra(DIRECTORY_EXISTS, false),
            )?;
        } else {
            // Nothing else known about a missing file survives
            self.save(FileAttributes::new(path).with_extra(FILE_EXISTS, false))?;
        }

        Ok(exists)
    }

    /// Whether a directory exists at `path`
    ///
    /// A cached file fact for the same path answers false.
    pub async fn directory_exists(&self, path: &str) -> Result<bool> {
        if let Some(record) = self.cached(path)? {
            if let Some(exists) = record.directory_exists() {
                trace!(path = path, exists = exists, "Directory existence from cache");
                return Ok(exists);
            }
            if record.file_exists() == Some(true) {
                trace!(path = path, "Path is a cached file");
                return Ok(false);
            }
        }

        let exists = self
            .timed("directory_exists", path, self.backend.directory_exists(path))
            .await?;

        if exists {
            self.save(
                FileAttributes::new(path)
                    .with_extra(DIRECTORY_EXISTS, true)
                    .with_extra(FILE_EXISTS, false),
            )?;
        } else {
            self.update(path, FileAttributes::new(path).with_extra(DIRECTORY_EXISTS, false))?;
        }

        Ok(exists)
    }

    // ---- content ----

    /// Read the whole object
    ///
    /// A valid staged copy is authoritative and skips the backend.
    pub async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let content_key = self.keys.content_key(path);

        if let Some((mut file, size)) = self.open_staged(&content_key).await {
            let mut data = Vec::new();
            match file.read_to_end(&mut data).await {
                Ok(_) => {
                    trace!(path = path, size = size, "Serving staged content");
                    self.remember_content(path, Some(data.len() as u64))?;
                    return Ok(data);
                }
                Err(e) => {
                    warn!(path = path, error = %e, "Staged copy unreadable, using backend");
                    self.stager.invalidate(&content_key);
                }
            }
        }

        let data = match self.timed("read", path, self.backend.read(path)).await {
            Ok(data) => data,
            Err(e) => return Err(self.purge_after_failure(path, e)),
        };

        self.remember_content(path, Some(data.len() as u64))?;
        if let Err(e) = self.stager.warm_from_bytes(&content_key, &data).await {
            warn!(path = path, error = %e, "Failed to stage read content");
        }

        Ok(data)
    }

    /// Open the object as a stream
    ///
    /// On a staging miss the configured [`StreamPolicy`] decides whether the
    /// object is fetched and staged or streamed straight from the backend.
    pub async fn read_stream(&self, path: &str) -> Result<ContentStream> {
        let content_key = self.keys.content_key(path);

        if let Some((file, size)) = self.open_staged(&content_key).await {
            trace!(path = path, size = size, "Streaming staged content");
            self.remember_content(path, Some(size))?;
            return Ok(ContentStream::seekable(file));
        }

        match self.config.stream_policy {
            StreamPolicy::StageLocally => {
                let data = match self.timed("read", path, self.backend.read(path)).await {
                    Ok(data) => data,
                    Err(e) => return Err(self.purge_after_failure(path, e)),
                };
                self.remember_content(path, Some(data.len() as u64))?;

                match self.stager.warm_from_bytes(&content_key, &data).await {
                    Ok(local) => match tokio::fs::File::open(&local).await {
                        Ok(file) => return Ok(ContentStream::seekable(file)),
                        Err(e) => warn!(path = path, error = %e, "Failed to open staged copy"),
                    },
                    Err(e) => warn!(path = path, error = %e, "Failed to stage streamed content"),
                }

                Ok(ContentStream::from_bytes(data))
            }
            StreamPolicy::Passthrough => {
                let stream = match self
                    .timed("read_stream", path, self.backend.read_stream(path))
                    .await
                {
                    Ok(stream) => stream,
                    Err(e) => return Err(self.purge_after_failure(path, e)),
                };
                self.remember_content(path, None)?;
                Ok(stream)
            }
        }
    }

    /// Write a whole object
    ///
    /// The content is staged first; after the backend accepts it every cached
    /// attribute of the path is dropped.
    pub async fn write(&self, path: &str, contents: &[u8], options: &WriteOptions) -> Result<()> {
        let content_key = self.keys.content_key(path);

        self.stager.invalidate(&content_key);
        if let Err(e) = self.stager.warm_from_bytes(&content_key, contents).await {
            warn!(path = path, error = %e, "Failed to stage written content");
        }

        match self
            .timed("write", path, self.backend.write(path, contents, options))
            .await
        {
            Ok(()) => self.forget_attributes(path),
            Err(e) => Err(self.purge_after_failure(path, e)),
        }
    }

    /// Write an object from a stream
    ///
    /// Seekable streams are staged and rewound before being forwarded;
    /// forward-only streams go straight to the backend.
    pub async fn write_stream(
        &self,
        path: &str,
        contents: &mut ContentStream,
        options: &WriteOptions,
    ) -> Result<()> {
        let content_key = self.keys.content_key(path);

        self.stager.invalidate(&content_key);
        if let Err(e) = self.stager.warm_from_stream(&content_key, contents).await {
            warn!(path = path, error = %e, "Failed to stage written stream");
            self.stager.invalidate(&content_key);
            // The stream must start from the beginning for the backend
            contents.rewind().await?;
        }

        match self
            .timed("write_stream", path, self.backend.write_stream(path, contents, options))
            .await
        {
            Ok(()) => self.forget_attributes(path),
            Err(e) => Err(self.purge_after_failure(path, e)),
        }
    }

    // ---- mutations ----

    /// Delete an object
    ///
    /// Cached facts are purged whether or not the backend succeeded.
    pub async fn delete(&self, path: &str) -> Result<()> {
        let result = self.timed("delete", path, self.backend.delete(path)).await;
        self.settle(path, result, self.purge(path))
    }

    /// Delete a directory and everything below it
    ///
    /// Children are enumerated and purged before the backend delete. If the
    /// listing fails the delete is skipped, but the directory itself is
    /// purged either way.
    pub async fn delete_directory(&self, path: &str) -> Result<()> {
        let deleted = match self
            .timed("list_contents", path, self.backend.list_contents(path, true))
            .await
        {
            Ok(entries) => self.delete_listed_directory(path, &entries).await,
            Err(e) => {
                warn!(path = path, error = %e, "Could not enumerate directory, skipping delete");
                Err(CacheError::Backend(e))
            }
        };

        let purged = self.purge(path);
        match deleted {
            Err(e) => {
                if let Err(store) = purged {
                    warn!(path = path, error = %store, "Failed to purge directory after error");
                }
                Err(e)
            }
            Ok(()) => purged,
        }
    }

    async fn delete_listed_directory(&self, path: &str, entries: &[StorageEntry]) -> Result<()> {
        for entry in entries {
            self.purge(&entry.path)?;
        }
        debug!(path = path, children = entries.len(), "Purged directory contents");

        self.timed("delete_directory", path, self.backend.delete_directory(path))
            .await?;
        Ok(())
    }

    pub async fn create_directory(&self, path: &str, options: &WriteOptions) -> Result<()> {
        let result = self
            .timed("create_directory", path, self.backend.create_directory(path, options))
            .await;
        self.settle(path, result, self.purge(path))
    }

    /// Move an object
    ///
    /// Both paths are purged before the backend call starts.
    pub async fn move_file(&self, from: &str, to: &str, options: &WriteOptions) -> Result<()> {
        self.purge(from)?;
        self.purge(to)?;

        self.timed("move_file", from, self.backend.move_file(from, to, options))
            .await?;
        Ok(())
    }

    /// Copy an object
    ///
    /// Both paths are purged before the backend call. On success the
    /// destination inherits the source's staged content and known attributes
    /// with a fresh modification time.
    pub async fn copy_file(&self, from: &str, to: &str, options: &WriteOptions) -> Result<()> {
        let source_record = self.cached(from)?;
        // Purging the source deletes its staged file
        let source_content = match self.stager.hold(&self.keys.content_key(from)).await {
            Ok(held) => held,
            Err(e) => {
                warn!(path = from, error = %e, "Failed to hold staged source content");
                None
            }
        };

        self.purge(from)?;
        self.purge(to)?;

        self.timed("copy_file", from, self.backend.copy_file(from, to, options))
            .await?;

        if let Some(local) = source_content {
            self.stage_copy(to, local).await;
        }

        let destination = source_record
            .map(|record| {
                record
                    .relocated(to)
                    .retain_extra(|key, _| key != PUBLIC_URL)
            })
            .unwrap_or_else(|| FileAttributes::new(to));

        let mut stamp = FileAttributes::new(to)
            .with_last_modified(unix_now())
            .with_extra(FILE_EXISTS, true)
            .with_extra(DIRECTORY_EXISTS, false);
        if let Some(visibility) = options.visibility {
            stamp = stamp.with_visibility(visibility);
        }

        self.save(merge(&destination, &stamp))?;
        debug!(from = from, to = to, "Pre-populated copy destination");
        Ok(())
    }

    async fn stage_copy(&self, to: &str, held: TempPath) {
        if let Err(e) = self.stager.adopt(&self.keys.content_key(to), held).await {
            warn!(path = to, error = %e, "Failed to stage copied content");
        }
    }

    /// Change visibility
    ///
    /// Success merges the new value into the cached record; failure purges it.
    pub async fn set_visibility(&self, path: &str, visibility: Visibility) -> Result<()> {
        if let Err(e) = self
            .timed("set_visibility", path, self.backend.set_visibility(path, visibility))
            .await
        {
            return Err(self.purge_after_failure(path, e));
        }

        self.update(path, FileAttributes::new(path).with_visibility(visibility))?;
        Ok(())
    }

    /// Directory listing, never cached
    pub async fn list_contents(&self, path: &str, recursive: bool) -> Result<Vec<StorageEntry>> {
        Ok(self
            .timed("list_contents", path, self.backend.list_contents(path, recursive))
            .await?)
    }

    // ---- attributes ----

    /// Fetch one attribute, loading it from the backend only if not cached
    pub async fn attribute(&self, path: &str, kind: AttributeKind) -> Result<AttributeValue> {
        let value = match kind {
            AttributeKind::Visibility => AttributeValue::Visibility(self.visibility(path).await?),
            AttributeKind::MimeType => AttributeValue::MimeType(self.mime_type(path).await?),
            AttributeKind::LastModified => {
                AttributeValue::LastModified(self.last_modified(path).await?)
            }
            AttributeKind::FileSize => AttributeValue::FileSize(self.file_size(path).await?),
            AttributeKind::Checksum => AttributeValue::Checksum(self.checksum(path, None).await?),
        };
        Ok(value)
    }

    pub async fn visibility(&self, path: &str) -> Result<Visibility> {
        let record = self.lazy_attribute(path, RecordField::Visibility).await?;
        Ok(record.visibility().unwrap_or(Visibility::Absent))
    }

    pub async fn mime_type(&self, path: &str) -> Result<String> {
        let record = self.lazy_attribute(path, RecordField::MimeType).await?;
        Ok(record.mime_type().unwrap_or_default().to_string())
    }

    /// Seconds since the Unix epoch
    pub async fn last_modified(&self, path: &str) -> Result<u64> {
        let record = self.lazy_attribute(path, RecordField::LastModified).await?;
        Ok(record.last_modified().unwrap_or_else(unix_now))
    }

    /// Object size in bytes
    ///
    /// A staged copy answers without a backend call.
    pub async fn file_size(&self, path: &str) -> Result<u64> {
        let record = self.lazy_attribute(path, RecordField::FileSize).await?;
        Ok(record.file_size().unwrap_or(0))
    }

    /// Cached record carrying `kind`, loading it on a miss
    ///
    /// Placeholders for attributes the backend cannot report are returned
    /// but not stored, so the next query asks the backend again.
    async fn lazy_attribute(&self, path: &str, kind: RecordField) -> Result<FileAttributes> {
        let cached = self.cached(path)?;
        if let Some(record) = cached.as_ref().filter(|r| kind.is_known(r)) {
            trace!(path = path, attribute = %kind, "Attribute from cache");
            return Ok(record.clone());
        }

        if kind == RecordField::FileSize {
            if let Some(size) = self.staged_size(path).await {
                trace!(path = path, size = size, "File size from staged copy");
                return self.save_merged(path, cached, &FileAttributes::new(path).with_file_size(size));
            }
        }

        let base = cached.unwrap_or_else(|| FileAttributes::new(path));
        match self.load_attribute(path, kind).await {
            Ok(loaded) => {
                let merged = merge(&base, &loaded);
                self.save(merged.clone())?;
                Ok(merged)
            }
            Err(e) if e.is_unretrievable_metadata() => {
                debug!(path = path, attribute = %kind, error = %e, "Using attribute placeholder");
                Ok(merge(&base, &kind.placeholder(path)))
            }
            Err(e) if e.is_not_found() => Err(self.purge_after_failure(path, e)),
            Err(e) => Err(e.into()),
        }
    }

    async fn load_attribute(
        &self,
        path: &str,
        kind: RecordField,
    ) -> std::result::Result<FileAttributes, BackendError> {
        match kind {
            RecordField::Visibility => {
                self.timed("visibility", path, self.backend.visibility(path)).await
            }
            RecordField::MimeType => {
                self.timed("mime_type", path, self.backend.mime_type(path)).await
            }
            RecordField::LastModified => {
                self.timed("last_modified", path, self.backend.last_modified(path))
                    .await
            }
            RecordField::FileSize => {
                self.timed("file_size", path, self.backend.file_size(path)).await
            }
        }
    }

    /// Content checksum, cached per algorithm
    ///
    /// `None` asks for the backend's native tag and accepts a cached entity
    /// tag unless it is a multipart composite. Algorithms the backend cannot
    /// provide are computed from the content. Any other backend failure
    /// yields an empty string and caches nothing.
    pub async fn checksum(&self, path: &str, algorithm: Option<ChecksumAlgorithm>) -> Result<String> {
        let key = checksum_key(algorithm);
        let cached = self.cached(path)?;

        if let Some(record) = &cached {
            if algorithm.is_none() {
                if let Some(tag) = record.extra_str(ETAG).and_then(checksum_from_etag) {
                    trace!(path = path, "Checksum from entity tag");
                    return Ok(tag);
                }
            }
            if let Some(checksum) = record.extra_str(&key) {
                trace!(path = path, key = %key, "Checksum from cache");
                return Ok(checksum.to_string());
            }
        }

        let checksum = match self
            .timed("checksum", path, self.backend.checksum(path, algorithm))
            .await
        {
            Ok(checksum) => checksum,
            Err(BackendError::ChecksumAlgorithmUnsupported(name)) => {
                let algorithm = algorithm.unwrap_or(FALLBACK_CHECKSUM_ALGORITHM);
                debug!(path = path, unsupported = %name, algorithm = %algorithm, "Computing checksum from content");
                match self.compute_checksum(path, algorithm).await {
                    Ok(checksum) => checksum,
                    Err(e) => {
                        warn!(path = path, error = %e, "Failed to compute checksum");
                        if e.is_not_found() {
                            self.purge(path)?;
                        }
                        return Ok(String::new());
                    }
                }
            }
            Err(e) => {
                debug!(path = path, error = %e, "Checksum unavailable");
                if e.is_not_found() {
                    self.purge(path)?;
                }
                return Ok(String::new());
            }
        };

        self.save_merged(
            path,
            cached,
            &FileAttributes::new(path).with_extra(key, checksum.clone()),
        )?;
        Ok(checksum)
    }

    async fn compute_checksum(&self, path: &str, algorithm: ChecksumAlgorithm) -> Result<String> {
        if let Some((mut file, _)) = self.open_staged(&self.keys.content_key(path)).await {
            return Ok(digest_stream(algorithm, &mut file).await?);
        }

        let mut stream = self
            .timed("read_stream", path, self.backend.read_stream(path))
            .await?;
        digest_stream(algorithm, &mut stream)
            .await
            .map_err(|e| CacheError::Backend(BackendError::from_io(path, &e)))
    }

    /// Public URL, cached once computed
    pub async fn public_url(&self, path: &str) -> Result<String> {
        let cached = self.cached(path)?;
        if let Some(url) = cached
            .as_ref()
            .and_then(|r| r.extra_str(PUBLIC_URL))
            .filter(|url| !url.is_empty())
        {
            return Ok(url.to_string());
        }

        let url = self
            .timed("public_url", path, self.backend.public_url(path))
            .await?;
        self.save_merged(
            path,
            cached,
            &FileAttributes::new(path).with_extra(PUBLIC_URL, url.clone()),
        )?;
        Ok(url)
    }

    /// Drop every record of this adapter's namespace
    ///
    /// Meant for deployment-time invalidation. Does nothing when flushing is
    /// disabled in the configuration.
    pub fn flush(&self) -> Result<()> {
        if !self.config.flush_enabled {
            debug!(namespace = %self.config.namespace, "Flush disabled, keeping metadata");
            return Ok(());
        }

        self.store.clear_prefix(self.keys.metadata_prefix())?;
        info!(namespace = %self.config.namespace, "Flushed metadata cache");
        Ok(())
    }

    // ---- cache plumbing ----

    fn cached(&self, path: &str) -> Result<Option<FileAttributes>> {
        Ok(self.store.get(&self.keys.metadata_key(path))?)
    }

    fn save(&self, record: FileAttributes) -> Result<()> {
        let key = self.keys.metadata_key(record.path());
        trace!(path = record.path(), "Caching attributes");
        self.store.set(&key, record, self.config.metadata_ttl())?;
        Ok(())
    }

    /// Merge `extension` into `base` (or an empty record) and store it
    fn save_merged(
        &self,
        path: &str,
        base: Option<FileAttributes>,
        extension: &FileAttributes,
    ) -> Result<FileAttributes> {
        let base = base.unwrap_or_else(|| FileAttributes::new(path));
        let merged = merge(&base, extension);
        self.save(merged.clone())?;
        Ok(merged)
    }

    fn update(&self, path: &str, extension: FileAttributes) -> Result<FileAttributes> {
        let base = self.cached(path)?;
        self.save_merged(path, base, &extension)
    }

    /// Record that content of `size` bytes was just seen at `path`
    fn remember_content(&self, path: &str, size: Option<u64>) -> Result<()> {
        let cached = self.cached(path)?;
        if let Some(record) = &cached {
            let size_known = size.is_none() || record.file_size() == size;
            if record.file_exists() == Some(true) && size_known {
                return Ok(());
            }
        }

        let mut extension = FileAttributes::new(path)
            .with_extra(FILE_EXISTS, true)
            .with_extra(DIRECTORY_EXISTS, false);
        if let Some(size) = size {
            extension = extension.with_file_size(size);
        }
        self.save_merged(path, cached, &extension)?;
        Ok(())
    }

    /// Drop the attribute record but keep staged content
    fn forget_attributes(&self, path: &str) -> Result<()> {
        self.store.delete(&self.keys.metadata_key(path))?;
        debug!(path = path, "Invalidated cached attributes");
        Ok(())
    }

    /// Remove every cached fact about `path`
    fn purge(&self, path: &str) -> Result<()> {
        self.store.delete(&self.keys.metadata_key(path))?;
        self.stager.invalidate(&self.keys.content_key(path));
        debug!(path = path, "Purged cached facts");
        Ok(())
    }

    /// Purge after a failed backend call; the backend error wins
    fn purge_after_failure(&self, path: &str, err: BackendError) -> CacheError {
        if let Err(store) = self.purge(path) {
            warn!(path = path, error = %store, "Failed to purge after backend error");
        }
        err.into()
    }

    /// Combine a backend outcome with the purge that followed it
    fn settle<T>(
        &self,
        path: &str,
        result: std::result::Result<T, BackendError>,
        purged: Result<()>,
    ) -> Result<T> {
        match result {
            Ok(value) => purged.map(|()| value),
            Err(e) => {
                if let Err(store) = purged {
                    warn!(path = path, error = %store, "Failed to purge after backend error");
                }
                Err(e.into())
            }
        }
    }

    async fn open_staged(&self, content_key: &str) -> Option<(tokio::fs::File, u64)> {
        let local = self.stager.lookup(content_key).await?;
        let opened = async {
            let file = tokio::fs::File::open(&local).await?;
            let size = file.metadata().await?.len();
            Ok::<_, std::io::Error>((file, size))
        }
        .await;

        match opened {
            Ok(staged) => Some(staged),
            Err(e) => {
                warn!(local = %local.display(), error = %e, "Failed to open staged copy");
                self.stager.invalidate(content_key);
                None
            }
        }
    }

    async fn staged_size(&self, path: &str) -> Option<u64> {
        let local = self.stager.lookup(&self.keys.content_key(path)).await?;
        tokio::fs::metadata(&local).await.ok().map(|m| m.len())
    }

    /// Await a backend call, logging how long it took
    async fn timed<T, F>(
        &self,
        operation: &'static str,
        path: &str,
        call: F,
    ) -> std::result::Result<T, BackendError>
    where
        F: Future<Output = std::result::Result<T, BackendError>>,
    {
        let started = Instant::now();
        let result = call.await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        if self.config.log_backend_calls {
            info!(
                operation = operation,
                path = path,
                elapsed_ms = elapsed_ms,
                ok = result.is_ok(),
                "Backend call"
            );
        } else {
            trace!(
                operation = operation,
                path = path,
                elapsed_ms = elapsed_ms,
                ok = result.is_ok(),
                "Backend call"
            );
        }

        result
    }
}
