//! Byte sources feeding the frame reassembler.
//!
//! A [`ByteSource`] hands out raw chunks in arrival order. Chunk boundaries
//! are arbitrary; an empty chunk means "nothing arrived before the read
//! timeout" and lets the consumer loop check for shutdown.

mod serial;

use std::collections::VecDeque;
use std::path::Path;

use async_trait::async_trait;

use crate::error::{Error, Result};

pub use serial::SerialSource;

/// A source of raw byte chunks.
#[async_trait]
pub trait ByteSource: Send {
    /// Name of this source (for logging).
    fn name(&self) -> &str;

    /// Read the next chunk.
    ///
    /// Returns an empty vector when no data arrived within the source's
    /// read timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SourceClosed`] once the source is exhausted, or
    /// [`Error::SourceRead`] for a failed read that may be retried.
    async fn read_chunk(&mut self) -> Result<Vec<u8>>;
}

/// A source that replays a fixed sequence of chunks, then closes.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSource {
    name: String,
    chunks: VecDeque<Vec<u8>>,
}

impl ScriptedSource {
    /// Create a source that yields `chunks` in order.
    pub fn new<I, C>(chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Vec<u8>>,
    {
        Self {
            name: "scripted".to_string(),
            chunks: chunks.into_iter().map(Into::into).collect(),
        }
    }

    /// Split `data` into chunks of at most `chunk_size` bytes.
    #[must_use]
    pub fn from_bytes(name: impl Into<String>, data: &[u8], chunk_size: usize) -> Self {
        Self {
            name: name.into(),
            chunks: data
                .chunks(chunk_size.max(1))
                .map(<[u8]>::to_vec)
                .collect(),
        }
    }

    /// Replay a recorded byte dump from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub async fn from_file(path: impl AsRef<Path>, chunk_size: usize) -> Result<Self> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await?;
        Ok(Self::from_bytes(path.display().to_string(), &data, chunk_size))
    }

    /// Number of chunks not yet read.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.chunks.len()
    }
}

#[async_trait]
impl ByteSource for ScriptedSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read_chunk(&mut self) -> Result<Vec<u8>> {
        self.chunks
            .pop_front()
            .ok_or_else(|| Error::source_closed(&self.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_source_yields_in_order_then_closes() {
        let mut source = ScriptedSource::new([b"one".to_vec(), Vec::new(), b"two".to_vec()]);
        assert_eq!(source.remaining(), 3);

        assert_eq!(source.read_chunk().await.unwrap(), b"one");
        assert!(source.read_chunk().await.unwrap().is_empty());
        assert_eq!(source.read_chunk().await.unwrap(), b"two");

        let err = source.read_chunk().await.unwrap_err();
        assert!(err.is_source_closed());
    }

    #[test]
    fn test_from_bytes_splits_into_chunks() {
        let source = ScriptedSource::from_bytes("dump", b"abcdefg", 3);
        assert_eq!(source.name(), "dump");
        assert_eq!(source.remaining(), 3);
    }

    #[test]
    fn test_from_bytes_zero_chunk_size() {
        let source = ScriptedSource::from_bytes("dump", b"abc", 0);
        assert_eq!(source.remaining(), 3);
    }

    #[tokio::test]
    async fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.bin");
        std::fs::write(&path, b"START_IMAGEabcEND_IMAGE").unwrap();

        let mut source = ScriptedSource::from_file(&path, 8).await.unwrap();
        assert_eq!(source.remaining(), 3);
        assert_eq!(source.read_chunk().await.unwrap(), b"START_IM");
    }

    #[tokio::test]
    async fn test_from_missing_file() {
        let result = ScriptedSource::from_file("/nonexistent/capture.bin", 8).await;
        assert!(result.is_err());
    }
}
