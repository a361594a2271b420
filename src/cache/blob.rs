//! Physical storage behind the cache index
//!
//! Blobs are addressed by the SHA256 digest of their contents.

use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::fs;
use uuid::Uuid;

/// Abstract blob storage interface
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write a blob, returning its storage location
    async fn put(&self, digest: &str, bytes: &[u8]) -> io::Result<String>;

    /// Read a blob, `None` when absent
    async fn get(&self, digest: &str) -> io::Result<Option<Vec<u8>>>;

    /// Delete a blob; deleting an absent blob is not an error
    async fn delete(&self, digest: &str) -> io::Result<()>;

    /// Human-readable backend name for display
    fn backend_name(&self) -> &'static str;
}

/// Blob store on the local filesystem
///
/// Layout: `<root>/<digest[..2]>/<digest>`. Writes land in `<root>/tmp`
/// first and are renamed into place, so readers never see partial blobs.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Create a store rooted at `root`
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn blob_path(&self, digest: &str) -> PathBuf {
        let shard = &digest[..digest.len().min(2)];
        self.root.join(shard).join(digest)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, digest: &str, bytes: &[u8]) -> io::Result<String> {
        let path = self.blob_path(digest);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let tmp_dir = self.root.join("tmp");
        fs::create_dir_all(&tmp_dir).await?;
        let tmp = tmp_dir.join(format!("{}.{}", digest, Uuid::new_v4()));

        fs::write(&tmp, bytes).await?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }

        Ok(path.display().to_string())
    }

    async fn get(&self, digest: &str) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.blob_path(digest)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, digest: &str) -> io::Result<()> {
        match fs::remove_file(self.blob_path(digest)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }
}

/// Blob store held in process memory
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, digest: &str, bytes: &[u8]) -> io::Result<String> {
        self.blobs
            .lock()
            .map_err(|_| io::Error::other("memory blob store poisoned"))?
            .insert(digest.to_string(), bytes.to_vec());
        Ok(format!("memory://{}", digest))
    }

    async fn get(&self, digest: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self
            .blobs
            .lock()
            .map_err(|_| io::Error::other("memory blob store poisoned"))?
            .get(digest)
            .cloned())
    }

    async fn delete(&self, digest: &str) -> io::Result<()> {
        self.blobs
            .lock()
            .map_err(|_| io::Error::other("memory blob store poisoned"))?
            .remove(digest);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
