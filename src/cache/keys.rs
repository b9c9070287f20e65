//! Cache key derivation
//!
//! Every key the adapter writes is a SHA-256 fingerprint of the binding's
//! namespace and the storage path, so bindings sharing one store never collide.

use sha2::{Digest, Sha256};

/// Digest of `input` within `namespace`
///
/// The namespace is length-prefixed so that no (namespace, input) pair can
/// produce the same byte stream as another.
pub fn fingerprint(namespace: &str, input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update((namespace.len() as u64).to_le_bytes());
    hasher.update(namespace.as_bytes());
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Key derivation for one backend binding
#[derive(Debug, Clone)]
pub struct CacheKeys {
    namespace: String,
    content_namespace: String,
    /// Fixed-length digest of the namespace, so no prefix is a prefix of another
    metadata_prefix: String,
}

impl CacheKeys {
    pub fn new(namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        let content_namespace = format!("{}/content", namespace);
        let metadata_prefix = format!("{}:", fingerprint(&namespace, ""));
        Self {
            namespace,
            content_namespace,
            metadata_prefix,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Prefix shared by every metadata key of this binding
    pub fn metadata_prefix(&self) -> &str {
        &self.metadata_prefix
    }

    /// Metadata store key for a path
    pub fn metadata_key(&self, path: &str) -> String {
        format!(
            "{}{}",
            self.metadata_prefix,
            fingerprint(&self.namespace, path)
        )
    }

    /// Content stager fingerprint for a path
    pub fn content_key(&self, path: &str) -> String {
        fingerprint(&self.content_namespace, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_deterministic() {
        let keys = CacheKeys::new("s3-adapter");
        assert_eq!(keys.metadata_key("a.txt"), keys.metadata_key("a.txt"));
        assert_ne!(keys.metadata_key("a.txt"), keys.metadata_key("b.txt"));
        assert_eq!(keys.content_key("a.txt").len(), 64);
    }

    #[test]
    fn test_namespaces_do_not_collide() {
        let public = CacheKeys::new("public");
        let protected = CacheKeys::new("protected");
        assert_ne!(public.metadata_key("a.txt"), protected.metadata_key("a.txt"));
        assert_ne!(public.content_key("a.txt"), protected.content_key("a.txt"));
        assert!(public.metadata_key("a.txt").starts_with(public.metadata_prefix()));
    }

    #[test]
    fn test_content_and_metadata_keys_differ() {
        let keys = CacheKeys::new("s3-adapter");
        assert!(!keys.metadata_key("a.txt").ends_with(&keys.content_key("a.txt")));
    }

    #[test]
    fn test_boundary_shift_does_not_collide() {
        assert_ne!(fingerprint("ab", "c"), fingerprint("a", "bc"));
    }

    #[test]
    fn test_nested_namespace_prefixes_are_disjoint() {
        let outer = CacheKeys::new("a");
        let inner = CacheKeys::new("a:b");
        assert!(!inner.metadata_key("a.txt").starts_with(outer.metadata_prefix()));
        assert!(!outer.metadata_key("a.txt").starts_with(inner.metadata_prefix()));
    }
}
