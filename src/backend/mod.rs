//! Storage backend contract
//!
//! The capabilities the caching adapter needs from a remote object store.
//! Public, protected and CDN-fronted bindings are separate implementations
//! chosen by the caller; the cache never inspects which one it wraps.

pub mod errors;
pub mod memory;
pub mod types;

pub use errors::{BackendError, MetadataKind};
pub use memory::MemoryBackend;
pub use types::*;

use async_trait::async_trait;

use crate::attributes::{FileAttributes, Visibility};

/// Object storage operations consumed by [`crate::CachedAdapter`]
///
/// Metadata calls return a [`FileAttributes`] carrying at least the requested
/// field; backends may fill in anything else they learned on the way.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn file_exists(&self, path: &str) -> Result<bool, BackendError>;

    async fn directory_exists(&self, path: &str) -> Result<bool, BackendError>;

    async fn read(&self, path: &str) -> Result<Vec<u8>, BackendError>;

    async fn read_stream(&self, path: &str) -> Result<ContentStream, BackendError>;

    async fn write(
        &self,
        path: &str,
        contents: &[u8],
        options: &WriteOptions,
    ) -> Result<(), BackendError>;

    async fn write_stream(
        &self,
        path: &str,
        contents: &mut ContentStream,
        options: &WriteOptions,
    ) -> Result<(), BackendError>;

    async fn delete(&self, path: &str) -> Result<(), BackendError>;

    async fn delete_directory(&self, path: &str) -> Result<(), BackendError>;

    async fn create_directory(&self, path: &str, options: &WriteOptions)
        -> Result<(), BackendError>;

    async fn list_contents(
        &self,
        path: &str,
        recursive: bool,
    ) -> Result<Vec<StorageEntry>, BackendError>;

    async fn move_file(
        &self,
        from: &str,
        to: &str,
        options: &WriteOptions,
    ) -> Result<(), BackendError>;

    async fn copy_file(
        &self,
        from: &str,
        to: &str,
        options: &WriteOptions,
    ) -> Result<(), BackendError>;

    async fn visibility(&self, path: &str) -> Result<FileAttributes, BackendError>;

    async fn set_visibility(&self, path: &str, visibility: Visibility)
        -> Result<(), BackendError>;

    async fn mime_type(&self, path: &str) -> Result<FileAttributes, BackendError>;

    async fn last_modified(&self, path: &str) -> Result<FileAttributes, BackendError>;

    async fn file_size(&self, path: &str) -> Result<FileAttributes, BackendError>;

    /// Native integrity tag; `None` asks for the backend's default algorithm
    async fn checksum(
        &self,
        path: &str,
        algorithm: Option<ChecksumAlgorithm>,
    ) -> Result<String, BackendError>;

    /// Only public-facing bindings can produce URLs
    async fn public_url(&self, path: &str) -> Result<String, BackendError> {
        Err(BackendError::Unsupported(format!("public URL for {}", path)))
    }
}
