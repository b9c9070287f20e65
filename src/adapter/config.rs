//! Adapter configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default cache-key namespace
pub const DEFAULT_NAMESPACE: &str = "s3-adapter";

/// How streamed reads are served on a staging miss
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StreamPolicy {
    /// Fetch the whole object, stage it, then stream the staged copy
    #[default]
    StageLocally,
    /// Hand out the backend's native stream without staging
    Passthrough,
}

/// Settings for one cache-fronted backend binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AdapterConfig {
    /// Prefix separating this binding's keys from others sharing a store
    pub namespace: String,
    pub stream_policy: StreamPolicy,
    /// Whether `flush()` clears anything
    pub flush_enabled: bool,
    /// Log every backend call with its elapsed time at info level
    pub log_backend_calls: bool,
    /// Lifetime of written records (None = until evicted)
    pub metadata_ttl_secs: Option<u64>,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            stream_policy: StreamPolicy::default(),
            flush_enabled: true,
            log_backend_calls: false,
            metadata_ttl_secs: None,
        }
    }
}

impl AdapterConfig {
    /// Default settings under another namespace
    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    pub fn metadata_ttl(&self) -> Option<Duration> {
        self.metadata_ttl_secs.map(Duration::from_secs)
    }
}
