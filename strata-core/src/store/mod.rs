//! Persistent tier: per-format, capacity-bounded key→bytes stores.

mod disk;

pub use disk::{DiskStore, DiskStoreFactory, DiskStoreLimits, DiskStoreStats};

use std::{fmt, ops::ControlFlow, path::Path, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use strata_model::ByteSize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store entry not found: {0}")]
    NotFound(String),

    #[error("store entry failed integrity check: {key} ({reason})")]
    Integrity { key: String, reason: String },

    #[error(
        "store entry size mismatch: key={key}, wanted={wanted}, actual={actual}"
    )]
    SizeMismatch {
        key: String,
        wanted: usize,
        actual: usize,
    },

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store internal error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// One entry handed to an [`PersistentStore::enumerate_by_access_date`]
/// visitor.
#[derive(Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub key: String,
    pub bytes: Vec<u8>,
    pub accessed_at: DateTime<Utc>,
}

impl fmt::Debug for StoredEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredEntry")
            .field("key", &self.key)
            .field("bytes", &self.bytes.len())
            .field("accessed_at", &self.accessed_at)
            .finish()
    }
}

/// Produces the payload for a key on demand. Returns `None` when no payload
/// can be produced (for example when encoding failed).
pub type LazyBytes = Box<dyn FnOnce() -> Option<Vec<u8>> + Send>;

/// Visitor for [`PersistentStore::enumerate_by_access_date`].
pub type EntryVisitor<'a> =
    dyn FnMut(StoredEntry) -> ControlFlow<()> + Send + 'a;

/// Capacity-bounded key→bytes store, evicting least recently accessed entries
/// first.
///
/// One instance backs one registered format.
#[async_trait]
pub trait PersistentStore: Send + Sync + fmt::Debug {
    /// Bytes stored under `key`, or [`StoreError::NotFound`].
    async fn fetch(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Write through, evicting least recently accessed entries when the
    /// capacity would be exceeded.
    async fn store(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError>;

    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    async fn remove_all(&self) -> Result<(), StoreError>;

    /// Visit entries most recently accessed first until the visitor breaks.
    async fn enumerate_by_access_date(
        &self,
        visitor: &mut EntryVisitor<'_>,
    ) -> Result<(), StoreError>;

    /// Mark `key` as just accessed. `bytes` is only called when the store has
    /// no entry for `key` and needs the payload to create one.
    async fn update_access_date(
        &self,
        key: &str,
        bytes: LazyBytes,
    ) -> Result<(), StoreError>;

    /// Persist any buffered bookkeeping.
    async fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn capacity(&self) -> ByteSize;

    fn set_capacity(&self, capacity: ByteSize);

    /// Bytes currently held.
    fn size(&self) -> ByteSize;
}

/// Creates the persistent store of a format when it is registered.
pub trait StoreFactory: Send + Sync + fmt::Debug {
    /// Open (or create) a store rooted at `dir`.
    fn open(
        &self,
        dir: &Path,
        capacity: ByteSize,
    ) -> Result<Arc<dyn PersistentStore>, StoreError>;
}
