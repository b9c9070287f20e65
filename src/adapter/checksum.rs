//! Checksum helpers
//!
//! Cache key naming for checksums and the streaming digest used when the
//! backend has no native tag for the requested algorithm.

use std::io;

use sha1::Sha1;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::attributes::CHECKSUM;
use crate::backend::ChecksumAlgorithm;

/// Read size when hashing a stream
const CHUNK_SIZE: usize = 64 * 1024;

/// Extra metadata key a checksum is cached under
pub fn checksum_key(algorithm: Option<ChecksumAlgorithm>) -> String {
    match algorithm {
        None => CHECKSUM.to_string(),
        Some(algorithm) => format!("{}_{}", CHECKSUM, algorithm.name()),
    }
}

/// Checksum carried by an entity tag
///
/// Composite multipart tags (`"<digest>-<parts>"`) do not hash the content
/// and yield None.
pub fn checksum_from_etag(etag: &str) -> Option<String> {
    let tag = etag.trim_matches(|c| c == '"' || c == ' ');
    if tag.is_empty() || tag.contains('-') {
        None
    } else {
        Some(tag.to_string())
    }
}

enum StreamingDigest {
    Sha1(Sha1),
    Sha256(Sha256),
}

impl StreamingDigest {
    fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Sha1 => StreamingDigest::Sha1(Sha1::new()),
            ChecksumAlgorithm::Sha256 => StreamingDigest::Sha256(Sha256::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            StreamingDigest::Sha1(hasher) => hasher.update(data),
            StreamingDigest::Sha256(hasher) => hasher.update(data),
        }
    }

    fn finish(self) -> String {
        match self {
            StreamingDigest::Sha1(hasher) => format!("{:x}", hasher.finalize()),
            StreamingDigest::Sha256(hasher) => format!("{:x}", hasher.finalize()),
        }
    }
}

/// Hex digest of everything left in `reader`
pub async fn digest_stream<R>(algorithm: ChecksumAlgorithm, reader: &mut R) -> io::Result<String>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut digest = StreamingDigest::new(algorithm);
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        let read = reader.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        digest.update(&buf[..read]);
    }

    Ok(digest.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_key() {
        assert_eq!(checksum_key(None), "checksum");
        assert_eq!(checksum_key(Some(ChecksumAlgorithm::Sha1)), "checksum_sha1");
        assert_eq!(checksum_key(Some(ChecksumAlgorithm::Sha256)), "checksum_sha256");
    }

    #[test]
    fn test_checksum_from_etag() {
        assert_eq!(
            checksum_from_etag("\"5d41402abc4b2a76b9719d911017c592\"").as_deref(),
            Some("5d41402abc4b2a76b9719d911017c592")
        );
        assert_eq!(checksum_from_etag("\"9b2cf535f27731c974343645a3985328-3\""), None);
        assert_eq!(checksum_from_etag("\"\""), None);
    }

    #[tokio::test]
    async fn test_digest_known_values() {
        let sha1 = digest_stream(ChecksumAlgorithm::Sha1, &mut &b"abc"[..]).await.unwrap();
        assert_eq!(sha1, "a9993e364706816aba3e25717850c26c9cd0d89d");

        let sha256 = digest_stream(ChecksumAlgorithm::Sha256, &mut &b"abc"[..]).await.unwrap();
        assert_eq!(
            sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_digest_spanning_chunks() {
        let data = vec![7u8; CHUNK_SIZE * 3 + 17];
        let streamed = digest_stream(ChecksumAlgorithm::Sha256, &mut &data[..])
            .await
            .unwrap();
        assert_eq!(streamed, format!("{:x}", Sha256::digest(&data)));
    }
}
