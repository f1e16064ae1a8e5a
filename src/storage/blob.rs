//! Raw file storage.
//!
//! Conventional storage addresses bytes by a caller-chosen locator; the
//! content-addressed store derives the identifier from the bytes themselves.

use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use tokio_util::io::ReaderStream;
use tracing::debug;

/// Streamed file body.
pub type BlobStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Conventional (mutable-path) storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write `bytes` at `locator`, replacing any previous content.
    async fn put(&self, locator: &str, bytes: Bytes) -> Result<()>;

    /// Read the whole object at `locator`.
    async fn get(&self, locator: &str) -> Result<Bytes>;

    /// Open the object at `locator` as a stream.
    async fn open(&self, locator: &str) -> Result<BlobStream>;
}

/// Content-addressed storage.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store `bytes`, returning their content id.
    async fn add(&self, bytes: Bytes) -> Result<String>;

    /// Read the object with content id `cid`.
    async fn get(&self, cid: &str) -> Result<Bytes>;
}

fn resolve(root: &Path, locator: &str) -> Result<PathBuf> {
    let relative = Path::new(locator);
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));
    if locator.is_empty() || escapes {
        return Err(Error::Storage(format!("invalid locator: {locator:?}")));
    }
    Ok(root.join(relative))
}

fn read_error(locator: &str, e: &std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::NotFound {
        Error::NotFound(format!("blob {locator}"))
    } else {
        Error::Storage(format!("failed to read {locator}: {e}"))
    }
}

/// [`BlobStore`] rooted at a local directory.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Create a store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, locator: &str, bytes: Bytes) -> Result<()> {
        let path = resolve(&self.root, locator)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| Error::Storage(format!("failed to write {locator}: {e}")))?;
        debug!("Stored {} bytes at {locator}", bytes.len());
        Ok(())
    }

    async fn get(&self, locator: &str) -> Result<Bytes> {
        let path = resolve(&self.root, locator)?;
        tokio::fs::read(&path)
            .await
            .map(Bytes::from)
            .map_err(|e| read_error(locator, &e))
    }

    async fn open(&self, locator: &str) -> Result<BlobStream> {
        let path = resolve(&self.root, locator)?;
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| read_error(locator, &e))?;
        Ok(Box::pin(ReaderStream::new(file)))
    }
}

/// [`ContentStore`] keeping objects under their SHA-256 in a local directory.
#[derive(Debug, Clone)]
pub struct FsContentStore {
    root: PathBuf,
}

impl FsContentStore {
    /// Create a store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Content id of `bytes`.
    #[must_use]
    pub fn content_id(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }
}

#[async_trait]
impl ContentStore for FsContentStore {
    async fn add(&self, bytes: Bytes) -> Result<String> {
        let cid = Self::content_id(&bytes);
        let path = resolve(&self.root, &cid)?;
        // Identical content maps to an identical path; rewriting is harmless.
        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| Error::Storage(format!("failed to add {cid}: {e}")))?;
        debug!("Added {} bytes as {cid}", bytes.len());
        Ok(cid)
    }

    async fn get(&self, cid: &str) -> Result<Bytes> {
        let path = resolve(&self.root, cid)?;
        tokio::fs::read(&path)
            .await
            .map(Bytes::from)
            .map_err(|e| read_error(cid, &e))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn test_blob_put_get_and_stream() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());

        store
            .put("originals/a.jpg", Bytes::from_static(b"jpeg bytes"))
            .await
            .unwrap();
        assert_eq!(
            store.get("originals/a.jpg").await.unwrap(),
            Bytes::from_static(b"jpeg bytes")
        );

        let chunks: Vec<Bytes> = store.open("originals/a.jpg").await.unwrap().try_collect().await.unwrap();
        assert_eq!(chunks.concat(), b"jpeg bytes");
    }

    #[tokio::test]
    async fn test_missing_blob_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        assert!(matches!(
            store.get("nope").await.unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_locator_cannot_escape_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        for locator in ["../etc/passwd", "/etc/passwd", ""] {
            assert!(matches!(
                store.put(locator, Bytes::new()).await.unwrap_err(),
                Error::Storage(_)
            ));
        }
    }

    #[tokio::test]
    async fn test_content_store_derives_id_from_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsContentStore::new(dir.path());

        let cid = store.add(Bytes::from_static(b"png")).await.unwrap();
        assert_eq!(cid, FsContentStore::content_id(b"png"));
        assert_eq!(store.add(Bytes::from_static(b"png")).await.unwrap(), cid);
        assert_eq!(store.get(&cid).await.unwrap(), Bytes::from_static(b"png"));
    }
}
