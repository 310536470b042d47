//! Storage capability traits and their bundled implementations.
//!
//! The materializer never touches `std::fs` directly: every byte it
//! persists goes through a [`DataWriter`], and anything it fetches comes
//! through a [`DataReader`]. Keys are paths relative to the implementation's
//! root, so swapping local disk for another backend is a constructor change,
//! not a pipeline change.
//!
//! Bundled implementations:
//! * [`FileBasedDataReader`] / [`FileBasedDataWriter`] — local filesystem,
//!   creating intermediate directories as needed.
//! * [`DummyDataWriter`] — accepts and discards everything; used for dry
//!   runs and tests.
//! * [`HttpReader`] — fetches keys relative to a base URL; the network
//!   extension point.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::error::DocmillError;

/// Retrieve bytes by relative key.
#[async_trait]
pub trait DataReader: Send + Sync {
    async fn read(&self, key: &str) -> Result<Vec<u8>, DocmillError>;
}

/// Persist bytes or text by relative key, creating intermediate path
/// segments as needed.
#[async_trait]
pub trait DataWriter: Send + Sync {
    async fn write(&self, key: &str, data: &[u8]) -> Result<(), DocmillError>;

    async fn write_string(&self, key: &str, text: &str) -> Result<(), DocmillError> {
        self.write(key, text.as_bytes()).await
    }
}

// ── Local filesystem ─────────────────────────────────────────────────────

/// Reads files relative to a root directory.
#[derive(Debug, Clone)]
pub struct FileBasedDataReader {
    root: PathBuf,
}

impl FileBasedDataReader {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl DataReader for FileBasedDataReader {
    async fn read(&self, key: &str) -> Result<Vec<u8>, DocmillError> {
        let path = self.root.join(key);
        tokio::fs::read(&path)
            .await
            .map_err(|e| DocmillError::ReadFailed {
                key: key.to_string(),
                detail: e.to_string(),
            })
    }
}

/// Writes files relative to a root directory, creating parents on demand.
#[derive(Debug, Clone)]
pub struct FileBasedDataWriter {
    root: PathBuf,
}

impl FileBasedDataWriter {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl DataWriter for FileBasedDataWriter {
    async fn write(&self, key: &str, data: &[u8]) -> Result<(), DocmillError> {
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DocmillError::WriteFailed {
                    key: key.to_string(),
                    detail: e.to_string(),
                })?;
        }
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| DocmillError::WriteFailed {
                key: key.to_string(),
                detail: e.to_string(),
            })?;
        debug!("wrote {} bytes to {}", data.len(), path.display());
        Ok(())
    }
}

// ── Discard ──────────────────────────────────────────────────────────────

/// Accepts every write and throws it away. Dry runs and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct DummyDataWriter;

#[async_trait]
impl DataWriter for DummyDataWriter {
    async fn write(&self, key: &str, data: &[u8]) -> Result<(), DocmillError> {
        debug!("discarding {} bytes for '{key}'", data.len());
        Ok(())
    }
}

// ── Network ──────────────────────────────────────────────────────────────

/// Fetches keys relative to a base URL over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpReader {
    client: reqwest::Client,
    base_url: String,
}

impl HttpReader {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl DataReader for HttpReader {
    async fn read(&self, key: &str) -> Result<Vec<u8>, DocmillError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), key);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| DocmillError::ReadFailed {
                key: key.to_string(),
                detail: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(DocmillError::ReadFailed {
                key: key.to_string(),
                detail: format!("HTTP {}", response.status()),
            });
        }
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| DocmillError::ReadFailed {
                key: key.to_string(),
                detail: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_writer_creates_intermediate_segments() {
        let dir = tempfile::tempdir().unwrap();
        let writer = FileBasedDataWriter::new(dir.path());
        writer.write("a/b/c.bin", b"payload").await.unwrap();
        let on_disk = std::fs::read(dir.path().join("a/b/c.bin")).unwrap();
        assert_eq!(on_disk, b"payload");
    }

    #[tokio::test]
    async fn file_reader_round_trips_writer_output() {
        let dir = tempfile::tempdir().unwrap();
        let writer = FileBasedDataWriter::new(dir.path());
        writer.write_string("doc.md", "# Title\n").await.unwrap();

        let reader = FileBasedDataReader::new(dir.path());
        let bytes = reader.read("doc.md").await.unwrap();
        assert_eq!(bytes, b"# Title\n");
    }

    #[tokio::test]
    async fn file_reader_reports_missing_key() {
        let dir = tempfile::tempdir().unwrap();
        let reader = FileBasedDataReader::new(dir.path());
        let err = reader.read("absent.md").await.unwrap_err();
        assert!(matches!(err, DocmillError::ReadFailed { .. }));
    }

    #[tokio::test]
    async fn dummy_writer_accepts_everything() {
        let writer = DummyDataWriter;
        writer.write("anything", &[0u8; 1024]).await.unwrap();
        writer.write_string("text", "discarded").await.unwrap();
    }
}
