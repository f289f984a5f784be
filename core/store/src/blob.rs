//! Filename-addressed blob storage for larger payloads.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

use fieldline_common::{Error, Result};

/// Aggregate statistics over the blob directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobStats {
    /// Number of stored blobs.
    pub count: usize,
    /// Total blob size in bytes.
    pub total_bytes: u64,
}

/// Blob storage under `<root>/blobs/`, addressed by filename.
///
/// Holds payloads too large for the key/value collections, such as drawn
/// signature images. Independent of the key/value space: collections refer
/// to blobs by filename.
pub struct BlobStore {
    dir: PathBuf,
}

impl BlobStore {
    /// Open (or create) blob storage under the given data directory.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let dir = root.as_ref().join("blobs");
        fs::create_dir_all(&dir).await.map_err(Error::Io)?;
        Ok(Self { dir })
    }

    /// Resolve a blob name to its path.
    ///
    /// # Preconditions
    /// - `name` must be a bare filename without separators
    ///
    /// # Errors
    /// - Empty name or name containing path separators
    fn path_for(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() {
            return Err(Error::InvalidInput("Blob name cannot be empty".to_string()));
        }
        if name.contains('/') || name.contains('\\') || name == "." || name == ".." {
            return Err(Error::InvalidInput(format!(
                "Blob name cannot contain separators: {}",
                name
            )));
        }
        Ok(self.dir.join(name))
    }

    /// Store a blob, replacing any existing blob of the same name.
    pub async fn put(&self, name: &str, data: &[u8]) -> Result<()> {
        let path = self.path_for(name)?;
        fs::write(&path, data).await.map_err(Error::Io)
    }

    /// Read a blob's contents.
    ///
    /// # Errors
    /// - `NotFound` when no blob has this name
    pub async fn get(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.path_for(name)?;
        if !path.exists() {
            return Err(Error::NotFound(format!("Blob not found: {}", name)));
        }
        fs::read(&path).await.map_err(Error::Io)
    }

    /// Whether a blob with this name exists.
    pub async fn contains(&self, name: &str) -> Result<bool> {
        Ok(self.path_for(name)?.exists())
    }

    /// Delete a blob. Returns `false` when absent.
    pub async fn remove(&self, name: &str) -> Result<bool> {
        let path = self.path_for(name)?;
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path).await.map_err(Error::Io)?;
        Ok(true)
    }

    /// Count blobs and sum their sizes.
    pub async fn stats(&self) -> Result<BlobStats> {
        let mut count = 0;
        let mut total_bytes = 0;

        let mut entries = fs::read_dir(&self.dir).await.map_err(Error::Io)?;
        while let Some(entry) = entries.next_entry().await.map_err(Error::Io)? {
            let meta = entry.metadata().await.map_err(Error::Io)?;
            if meta.is_file() {
                count += 1;
                total_bytes += meta.len();
            }
        }

        Ok(BlobStats { count, total_bytes })
    }

    /// Delete every blob.
    pub async fn clear(&self) -> Result<()> {
        let mut entries = fs::read_dir(&self.dir).await.map_err(Error::Io)?;
        while let Some(entry) = entries.next_entry().await.map_err(Error::Io)? {
            let path = entry.path();
            if path.is_file() {
                fs::remove_file(&path).await.map_err(Error::Io)?;
            }
        }
        Ok(())
    }
}
