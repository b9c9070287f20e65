//! Backend request and response types
//!
//! Content streams, per-call options and directory listing entries shared by
//! every backend implementation.

use std::fmt;
use std::io::{self, SeekFrom};
use std::pin::Pin;
use std::task::{Context, Poll};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncSeek, AsyncSeekExt, ReadBuf};

use crate::attributes::Visibility;

/// A readable source that can also be rewound
pub trait SeekableRead: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T: AsyncRead + AsyncSeek + Send + Unpin> SeekableRead for T {}

/// Object content handed to or returned from a backend
pub enum ContentStream {
    /// Rewindable content (local files, in-memory buffers)
    Seekable(Box<dyn SeekableRead>),
    /// Forward-only content (sockets, pipes)
    Sequential(Box<dyn AsyncRead + Send + Unpin>),
}

impl ContentStream {
    pub fn seekable<R: SeekableRead + 'static>(reader: R) -> Self {
        ContentStream::Seekable(Box::new(reader))
    }

    pub fn sequential<R: AsyncRead + Send + Unpin + 'static>(reader: R) -> Self {
        ContentStream::Sequential(Box::new(reader))
    }

    /// In-memory content
    pub fn from_bytes(data: Vec<u8>) -> Self {
        ContentStream::seekable(io::Cursor::new(data))
    }

    pub fn is_seekable(&self) -> bool {
        matches!(self, ContentStream::Seekable(_))
    }

    /// Seek back to the start; forward-only streams report `Unsupported`
    pub async fn rewind(&mut self) -> io::Result<()> {
        match self {
            ContentStream::Seekable(reader) => {
                reader.seek(SeekFrom::Start(0)).await?;
                Ok(())
            }
            ContentStream::Sequential(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "stream cannot be rewound",
            )),
        }
    }
}

impl AsyncRead for ContentStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ContentStream::Seekable(reader) => Pin::new(reader).poll_read(cx, buf),
            ContentStream::Sequential(reader) => Pin::new(reader).poll_read(cx, buf),
        }
    }
}

impl fmt::Debug for ContentStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentStream::Seekable(_) => f.write_str("ContentStream::Seekable"),
            ContentStream::Sequential(_) => f.write_str("ContentStream::Sequential"),
        }
    }
}

/// Options for write, copy, move and directory creation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteOptions {
    /// Visibility to apply to the written object
    #[serde(default)]
    pub visibility: Option<Visibility>,
    /// Content type (MIME type) to store with the object
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// Digest algorithms understood by the checksum operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    Sha1,
    Sha256,
}

impl ChecksumAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Sha1 => "sha1",
            ChecksumAlgorithm::Sha256 => "sha256",
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Entry returned by a directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEntry {
    /// Full path within the bucket
    pub path: String,
    /// Whether this entry is a directory
    pub is_directory: bool,
}

impl StorageEntry {
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            is_directory: false,
        }
    }

    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            is_directory: true,
        }
    }

    /// Get the base name (last component of path)
    pub fn base_name(&self) -> &str {
        let name = self.path.trim_end_matches('/');
        name.rsplit('/').next().unwrap_or(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_seekable_stream_rewinds() {
        let mut stream = ContentStream::from_bytes(b"hello".to_vec());
        let mut first = String::new();
        stream.read_to_string(&mut first).await.unwrap();

        stream.rewind().await.unwrap();
        let mut second = String::new();
        stream.read_to_string(&mut second).await.unwrap();

        assert_eq!(first, "hello");
        assert_eq!(second, "hello");
    }

    #[tokio::test]
    async fn test_sequential_stream_cannot_rewind() {
        let mut stream = ContentStream::sequential(&b"hello"[..]);
        assert!(!stream.is_seekable());
        let err = stream.rewind().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }

    #[test]
    fn test_write_options_deserialize() {
        let json = r#"{"visibility":"public","mimeType":"image/png"}"#;
        let options: WriteOptions = serde_json::from_str(json).unwrap();
        assert_eq!(options.visibility, Some(Visibility::Public));
        assert_eq!(options.mime_type.as_deref(), Some("image/png"));

        let empty: WriteOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, WriteOptions::default());
    }

    #[test]
    fn test_base_name() {
        assert_eq!(StorageEntry::file("photos/alice.jpg").base_name(), "alice.jpg");
        assert_eq!(StorageEntry::directory("photos/cats/").base_name(), "cats");
        assert_eq!(StorageEntry::file("readme.txt").base_name(), "readme.txt");
    }
}
