use std::path::{Path, PathBuf};

use crate::store::StoreError;

/// Metadata from a `cacache` index lookup.
#[derive(Debug, Clone, Copy)]
pub struct BlobMeta {
    pub byte_len: u64,
}

/// A thin typed wrapper over `cacache` for encoded images.
#[derive(Clone, Debug)]
pub struct BlobStore {
    dir: PathBuf,
}

impl BlobStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn metadata(
        &self,
        key: &str,
    ) -> Result<Option<BlobMeta>, StoreError> {
        let meta = cacache::metadata(&self.dir, key).await.map_err(|e| {
            StoreError::Internal(format!("cacache metadata failed: {e}"))
        })?;

        Ok(meta.map(|m| BlobMeta {
            byte_len: m.size as u64,
        }))
    }

    pub async fn read(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        cacache::read(&self.dir, key)
            .await
            .map_err(|e| map_read_error(key, e))
    }

    pub async fn write(
        &self,
        key: &str,
        bytes: &[u8],
    ) -> Result<(), StoreError> {
        cacache::write(&self.dir, key, bytes)
            .await
            .map(|_integrity| ())
            .map_err(|e| {
                StoreError::Internal(format!("cacache write failed: {e}"))
            })
    }

    pub async fn remove(&self, key: &str) -> Result<(), StoreError> {
        cacache::index::RemoveOpts::new()
            .remove_fully(true)
            .remove(&self.dir, key)
            .await
            .map_err(|e| {
                StoreError::Internal(format!("cacache remove failed: {e}"))
            })
    }

    /// Drop every blob and index bucket, leaving an empty directory.
    pub async fn clear(&self) -> Result<(), StoreError> {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(())
    }
}

/// Every index entry currently present, in no particular order.
pub fn list_sync(dir: &Path) -> Vec<cacache::Metadata> {
    let mut out = Vec::new();
    for entry in cacache::index::ls(dir) {
        match entry {
            Ok(m) => out.push(m),
            Err(e) => {
                tracing::warn!(
                    dir = %dir.display(),
                    "disk store index ls entry error: {e}"
                );
            }
        }
    }
    out
}

fn map_read_error(key: &str, e: cacache::Error) -> StoreError {
    match e {
        cacache::Error::EntryNotFound(_, _) => {
            StoreError::NotFound(key.to_owned())
        }
        cacache::Error::IntegrityError(err) => StoreError::Integrity {
            key: key.to_owned(),
            reason: err.to_string(),
        },
        cacache::Error::SizeMismatch(wanted, actual) => {
            StoreError::SizeMismatch {
                key: key.to_owned(),
                wanted,
                actual,
            }
        }
        cacache::Error::IoError(err, msg) => {
            // A blob that vanished underneath its index entry reads as a miss.
            if err.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound(key.to_owned())
            } else {
                StoreError::Internal(format!("cacache read I/O error: {msg}"))
            }
        }
        cacache::Error::SerdeError(_, msg) => {
            StoreError::Internal(format!("cacache read serde error: {msg}"))
        }
    }
}
