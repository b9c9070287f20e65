//! Caching layer
//!
//! Attribute records live in a [`CacheStore`] under keys derived by
//! [`CacheKeys`]; object content is staged on local disk by [`ContentStager`].

pub mod keys;
pub mod metadata;
pub mod staging;

pub use keys::{fingerprint, CacheKeys};
pub use metadata::{CacheStore, MemoryStore, StoreError};
pub use staging::ContentStager;
