//! Local Content Staging
//!
//! Keeps local copies of object content keyed by fingerprint so reads can skip
//! the backend. A staged copy is only served while the file on disk still has
//! the modification time and length recorded when it was staged.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use moka::notification::RemovalCause;
use moka::sync::Cache;
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, trace, warn};

use crate::backend::ContentStream;

/// Default maximum staging size: 1 GB
const DEFAULT_MAX_STAGING_SIZE: u64 = 1024 * 1024 * 1024;

/// Prefix of every file the stager allocates
const STAGED_FILE_PREFIX: &str = "staged-";

/// Association between a fingerprint and a local file
#[derive(Debug, Clone)]
struct StagedContent {
    /// Path to the staged file on disk
    local_path: PathBuf,
    /// Modification time observed right after staging
    modified: SystemTime,
    /// Size of the staged file in bytes
    size: u64,
}

impl StagedContent {
    fn from_metadata(local_path: PathBuf, metadata: &fs::Metadata) -> io::Result<Self> {
        Ok(Self {
            local_path,
            modified: metadata.modified()?,
            size: metadata.len(),
        })
    }

    /// Whether the file on disk is still the one we staged
    fn is_current(&self, metadata: &fs::Metadata) -> bool {
        metadata.is_file()
            && metadata.len() == self.size
            && metadata.modified().ok() == Some(self.modified)
    }

    /// Eviction weight in KiB (at least 1)
    fn weight(&self) -> u32 {
        u32::try_from(self.size / 1024 + 1).unwrap_or(u32::MAX)
    }
}

/// Local staging area for object content
pub struct ContentStager {
    /// Directory holding staged files
    staging_dir: PathBuf,
    /// Fingerprint -> staged file, weighed by size for LRU eviction
    entries: Cache<String, StagedContent>,
}

impl ContentStager {
    /// Create a stager in the platform cache directory
    pub fn new() -> io::Result<Self> {
        let staging_dir = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("cloudmount")
            .join("staging");

        Self::with_config(staging_dir, DEFAULT_MAX_STAGING_SIZE)
    }

    /// Create a stager with custom configuration
    ///
    /// # Arguments
    /// * `staging_dir` - Directory to store staged files
    /// * `max_size` - Maximum total staged size in bytes
    pub fn with_config(staging_dir: PathBuf, max_size: u64) -> io::Result<Self> {
        fs::create_dir_all(&staging_dir)?;

        let entries = Cache::builder()
            .max_capacity((max_size / 1024).max(1))
            .weigher(|_key: &String, entry: &StagedContent| entry.weight())
            .eviction_listener(
                |key: Arc<String>, entry: StagedContent, cause: RemovalCause| {
                    // Every staged file is owned by exactly one entry
                    match fs::remove_file(&entry.local_path) {
                        Ok(()) => debug!(
                            key = %key,
                            size = entry.size,
                            cause = ?cause,
                            "Removed staged file"
                        ),
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                        Err(e) => warn!(
                            path = %entry.local_path.display(),
                            error = %e,
                            "Failed to remove staged file"
                        ),
                    }
                },
            )
            .name("staged_content")
            .build();

        let stager = Self {
            staging_dir,
            entries,
        };
        stager.cleanup();

        info!(
            staging_dir = %stager.staging_dir.display(),
            max_size_mb = max_size / (1024 * 1024),
            "Content stager initialized"
        );

        Ok(stager)
    }

    /// Stage a copy of a local file
    ///
    /// No-op if a valid copy is already staged under `key`.
    pub async fn warm_from_path(&self, key: &str, source: &Path) -> io::Result<PathBuf> {
        if let Some(existing) = self.lookup(key).await {
            return Ok(existing);
        }

        let (file, local_path) = self.allocate()?;
        drop(file);
        if let Err(e) = tokio::fs::copy(source, &local_path).await {
            discard(&local_path).await;
            return Err(e);
        }

        let metadata = tokio::fs::metadata(&local_path).await?;
        self.record(key, StagedContent::from_metadata(local_path, &metadata)?)
    }

    /// Stage a byte buffer
    ///
    /// No-op if a valid copy is already staged under `key`.
    pub async fn warm_from_bytes(&self, key: &str, data: &[u8]) -> io::Result<PathBuf> {
        if let Some(existing) = self.lookup(key).await {
            return Ok(existing);
        }

        let (file, local_path) = self.allocate()?;
        let mut file = tokio::fs::File::from_std(file);
        let written = async {
            file.write_all(data).await?;
            file.flush().await?;
            file.metadata().await
        }
        .await;

        match written {
            Ok(metadata) => self.record(key, StagedContent::from_metadata(local_path, &metadata)?),
            Err(e) => {
                discard(&local_path).await;
                Err(e)
            }
        }
    }

    /// Stage a stream, leaving it rewound for the caller
    ///
    /// Forward-only streams cannot be replayed, so they are skipped and
    /// `Ok(None)` is returned.
    pub async fn warm_from_stream(
        &self,
        key: &str,
        stream: &mut ContentStream,
    ) -> io::Result<Option<PathBuf>> {
        if let Some(existing) = self.lookup(key).await {
            return Ok(Some(existing));
        }

        if !stream.is_seekable() {
            debug!(key = key, "Skipping staging of forward-only stream");
            return Ok(None);
        }

        let (file, local_path) = self.allocate()?;
        let mut file = tokio::fs::File::from_std(file);
        let written = async {
            stream.rewind().await?;
            tokio::io::copy(&mut *stream, &mut file).await?;
            file.flush().await?;
            stream.rewind().await?;
            file.metadata().await
        }
        .await;

        match written {
            Ok(metadata) => self
                .record(key, StagedContent::from_metadata(local_path, &metadata)?)
                .map(Some),
            Err(e) => {
                discard(&local_path).await;
                Err(e)
            }
        }
    }

    /// Take a private copy of the staged content for `key`
    ///
    /// The copy survives invalidation of `key` and is deleted when the
    /// returned path is dropped, unless it is handed to [`Self::adopt`].
    pub async fn hold(&self, key: &str) -> io::Result<Option<TempPath>> {
        let Some(source) = self.lookup(key).await else {
            return Ok(None);
        };

        let held = tempfile::Builder::new()
            .prefix(STAGED_FILE_PREFIX)
            .tempfile_in(&self.staging_dir)?
            .into_temp_path();
        tokio::fs::copy(&source, &held).await?;
        Ok(Some(held))
    }

    /// Stage a held copy under `key` without copying it again
    pub async fn adopt(&self, key: &str, held: TempPath) -> io::Result<PathBuf> {
        let local_path = held.keep().map_err(|e| e.error)?;
        match tokio::fs::metadata(&local_path).await {
            Ok(metadata) => self.record(key, StagedContent::from_metadata(local_path, &metadata)?),
            Err(e) => {
                discard(&local_path).await;
                Err(e)
            }
        }
    }

    /// Local path of a still-valid staged copy
    pub async fn lookup(&self, key: &str) -> Option<PathBuf> {
        let entry = self.entries.get(key)?;

        match tokio::fs::metadata(&entry.local_path).await {
            Ok(metadata) if entry.is_current(&metadata) => {
                trace!(key = key, "Staged content HIT");
                Some(entry.local_path)
            }
            Ok(_) => {
                debug!(
                    key = key,
                    path = %entry.local_path.display(),
                    "Staged file changed on disk, ignoring"
                );
                self.entries.invalidate(key);
                None
            }
            Err(_) => {
                debug!(key = key, "Staged file is gone, ignoring");
                self.entries.invalidate(key);
                None
            }
        }
    }

    /// Forget the staged copy for a fingerprint
    pub fn invalidate(&self, key: &str) {
        self.entries.invalidate(key);
        debug!(key = key, "Invalidated staged content");
    }

    /// Forget every staged copy
    pub fn clear(&self) {
        // Entry by entry, so each staged file is removed before returning
        for (key, _) in self.entries.iter() {
            self.entries.invalidate(key.as_str());
        }
        debug!("Cleared staged content");
    }

    /// Remove staged files no entry refers to, left by an earlier process
    fn cleanup(&self) {
        let Ok(read_dir) = fs::read_dir(&self.staging_dir) else {
            return;
        };
        for entry in read_dir.flatten() {
            let path = entry.path();
            let is_staged = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(STAGED_FILE_PREFIX));
            if is_staged && path.is_file() {
                debug!(path = %path.display(), "Removing stale staged file");
                if let Err(e) = fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %e, "Failed to remove stale staged file");
                }
            }
        }
    }

    /// Get the staging directory path
    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Allocate a fresh, uniquely named file in the staging directory
    fn allocate(&self) -> io::Result<(fs::File, PathBuf)> {
        tempfile::Builder::new()
            .prefix(STAGED_FILE_PREFIX)
            .tempfile_in(&self.staging_dir)?
            .keep()
            .map_err(|e| e.error)
    }

    fn record(&self, key: &str, staged: StagedContent) -> io::Result<PathBuf> {
        let local_path = staged.local_path.clone();
        debug!(
            key = key,
            local = %local_path.display(),
            size = staged.size,
            "Staged content"
        );
        self.entries.insert(key.to_string(), staged);
        Ok(local_path)
    }
}

/// Best-effort removal of a partially written staged file
async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        trace!(path = %path.display(), error = %e, "Could not remove partial staged file");
    }
}
