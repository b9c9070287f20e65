//! Caching layer in front of remote object storage
//!
//! [`CachedAdapter`] wraps any [`Backend`] with two caches:
//!
//! - a [`CacheStore`] holding one [`FileAttributes`] record per path, including
//!   confirmed existence and absence facts
//! - a [`ContentStager`] keeping local copies of object content
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use cloudmount_cache::{AdapterConfig, CachedAdapter, ContentStager, MemoryBackend, MemoryStore};
//!
//! # async fn demo() -> cloudmount_cache::Result<()> {
//! let adapter = CachedAdapter::new(
//!     MemoryBackend::new(),
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(ContentStager::new()?),
//!     AdapterConfig::default(),
//! );
//!
//! adapter.write("hello.txt", b"hello world", &Default::default()).await?;
//! assert_eq!(adapter.read("hello.txt").await?, b"hello world");
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod attributes;
pub mod backend;
pub mod cache;
pub mod error;

pub use adapter::{AdapterConfig, AttributeKind, AttributeValue, CachedAdapter, StreamPolicy};
pub use attributes::{merge, FileAttributes, Visibility};
pub use backend::{
    Backend, BackendError, ChecksumAlgorithm, ContentStream, MemoryBackend, StorageEntry,
    WriteOptions,
};
pub use cache::{CacheKeys, CacheStore, ContentStager, MemoryStore, StoreError};
pub use error::{CacheError, Result};
