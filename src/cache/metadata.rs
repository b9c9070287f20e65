//! Metadata Cache Store
//!
//! Persistence boundary for file attribute records. The adapter derives the
//! keys and shapes the values; stores only keep them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use moka::sync::Cache;
use moka::Expiry;
use tracing::{debug, trace};

use crate::attributes::FileAttributes;

/// Default maximum number of cached records
const DEFAULT_MAX_ENTRIES: u64 = 100_000;

/// Cache store failures
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Cache store unavailable: {0}")]
    Unavailable(String),
}

/// Key/value store for attribute records
///
/// Implementations may be in-process or networked. Errors are surfaced to the
/// adapter's caller, never swallowed.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<FileAttributes>, StoreError>;

    fn set(&self, key: &str, value: FileAttributes, ttl: Option<Duration>)
        -> Result<(), StoreError>;

    fn delete(&self, key: &str) -> Result<(), StoreError>;

    fn clear(&self) -> Result<(), StoreError>;

    /// Remove every key starting with `prefix`
    ///
    /// Stores that cannot enumerate keys clear everything.
    fn clear_prefix(&self, prefix: &str) -> Result<(), StoreError> {
        let _ = prefix;
        self.clear()
    }
}

/// Cached record with its requested lifetime
#[derive(Clone, Debug)]
struct StoredEntry {
    attributes: FileAttributes,
    ttl: Option<Duration>,
}

/// Per-entry expiration driven by the TTL passed to `set`
struct EntryExpiry;

impl Expiry<String, StoredEntry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoredEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.ttl
    }
}

/// In-process metadata store backed by Moka
pub struct MemoryStore {
    /// Records by opaque key
    entries: Cache<String, StoredEntry>,
    /// Cache hit counter
    hits: AtomicU64,
    /// Cache miss counter
    misses: AtomicU64,
}

impl MemoryStore {
    /// Create a store with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_ENTRIES)
    }

    /// Create a store holding at most `max_entries` records
    pub fn with_capacity(max_entries: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(EntryExpiry)
            .support_invalidation_closures()
            .name("file_attributes_cache")
            .build();

        Self {
            entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Get cache statistics
    ///
    /// Returns (hits, misses, hit_rate)
    pub fn stats(&self) -> (u64, u64, f64) {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        (hits, misses, hit_rate)
    }

    /// Log current cache metrics
    pub fn log_metrics(&self) {
        let (hits, misses, hit_rate) = self.stats();

        debug!(
            hits = hits,
            misses = misses,
            hit_rate = format!("{:.1}%", hit_rate),
            entries = self.entries.entry_count(),
            "Metadata store metrics"
        );
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<FileAttributes>, StoreError> {
        match self.entries.get(key) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!(key = key, "Store HIT");
                Ok(Some(entry.attributes))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                trace!(key = key, "Store MISS");
                Ok(None)
            }
        }
    }

    fn set(
        &self,
        key: &str,
        value: FileAttributes,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        self.entries.insert(
            key.to_string(),
            StoredEntry {
                attributes: value,
                ttl,
            },
        );
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.invalidate(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.entries.invalidate_all();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        debug!("Cleared metadata store");
        Ok(())
    }

    fn clear_prefix(&self, prefix: &str) -> Result<(), StoreError> {
        let prefix = prefix.to_string();
        self.entries
            .invalidate_entries_if(move |key, _| key.starts_with(&prefix))
            .map_err(|e| StoreError::Unavailable(format!("{:?}", e)))?;
        debug!("Cleared metadata store namespace");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &str) -> FileAttributes {
        FileAttributes::new(path).with_file_size(1024)
    }

    #[test]
    fn test_cache_hit_miss() {
        let store = MemoryStore::new();

        // Initially miss
        assert!(store.get("k1").unwrap().is_none());
        let (_, _, hit_rate) = store.stats();
        assert_eq!(hit_rate, 0.0);

        // Insert and hit
        store.set("k1", record("a.txt"), None).unwrap();
        assert_eq!(store.get("k1").unwrap(), Some(record("a.txt")));

        let (hits, misses, hit_rate) = store.stats();
        assert_eq!(hits, 1);
        assert_eq!(misses, 1);
        assert!(hit_rate > 49.0 && hit_rate < 51.0); // ~50%
    }

    #[test]
    fn test_delete() {
        let store = MemoryStore::new();
        store.set("k1", record("a.txt"), None).unwrap();
        store.delete("k1").unwrap();
        assert!(store.get("k1").unwrap().is_none());
    }

    #[test]
    fn test_clear() {
        let store = MemoryStore::new();
        store.set("k1", record("a.txt"), None).unwrap();
        store.set("k2", record("b.txt"), None).unwrap();

        store.clear().unwrap();

        assert!(store.get("k1").unwrap().is_none());
        assert!(store.get("k2").unwrap().is_none());
    }

    #[test]
    fn test_clear_prefix_keeps_other_namespaces() {
        let store = MemoryStore::new();
        store.set("public:k1", record("a.txt"), None).unwrap();
        store.set("protected:k1", record("a.txt"), None).unwrap();

        store.clear_prefix("public:").unwrap();

        assert!(store.get("public:k1").unwrap().is_none());
        assert!(store.get("protected:k1").unwrap().is_some());
    }

    #[test]
    fn test_ttl_expires_entry() {
        let store = MemoryStore::new();
        store
            .set("k1", record("a.txt"), Some(Duration::from_millis(50)))
            .unwrap();
        store.set("k2", record("b.txt"), None).unwrap();
        assert!(store.get("k1").unwrap().is_some());

        std::thread::sleep(Duration::from_millis(120));

        assert!(store.get("k1").unwrap().is_none());
        assert!(store.get("k2").unwrap().is_some());
    }
}
