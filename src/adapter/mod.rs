//! Cache-fronted storage adapter

pub mod cached;
pub mod checksum;
pub mod config;
pub mod lazy;

pub use cached::CachedAdapter;
pub use config::{AdapterConfig, StreamPolicy};
pub use lazy::{AttributeKind, AttributeValue};
