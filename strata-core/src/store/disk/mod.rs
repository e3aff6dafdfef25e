//! `cacache`-backed [`PersistentStore`].
//!
//! Layout under a format's directory:
//!
//! ```text
//! <dir>/blobs/               cacache index + content-addressed payloads
//! <dir>/access-index-v1.bin  last-access times, flushed periodically
//! ```

mod access_index;
mod blobs;
mod eviction;
mod stats;

pub use stats::DiskStoreStats;

use access_index::{AccessIndex, KeyDigest, write_snapshot_sync};
use blobs::{BlobStore, list_sync};
use eviction::{EntryInfo, plan_evictions};
use stats::DiskStoreCounters;

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, try_result::TryResult};
use strata_model::ByteSize;
use tokio::sync::Mutex;

use super::{
    EntryVisitor, LazyBytes, PersistentStore, StoreError, StoreFactory,
    StoredEntry,
};

#[derive(Debug)]
struct UsageBytes(AtomicU64);

impl UsageBytes {
    fn new(initial: u64) -> Self {
        Self(AtomicU64::new(initial))
    }

    fn load(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    fn store(&self, value: u64) {
        self.0.store(value, Ordering::Relaxed);
    }

    fn add_saturating(&self, add: u64) {
        let mut current = self.load();
        loop {
            let next = current.saturating_add(add);
            match self.0.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    fn sub_saturating(&self, sub: u64) {
        let mut current = self.load();
        loop {
            let next = current.saturating_sub(sub);
            match self.0.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }
}

/// Tuning for [`DiskStore`] bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskStoreLimits {
    /// Minimum time between two access-date updates of the same key.
    /// Zero records every access.
    pub touch_interval: Duration,
    /// How long access-date changes may stay unflushed. Ignored once usage
    /// passes 80% of capacity.
    pub access_index_flush_interval: Duration,
}

impl DiskStoreLimits {
    pub const fn defaults() -> Self {
        Self {
            touch_interval: Duration::ZERO,
            access_index_flush_interval: Duration::from_secs(30),
        }
    }
}

impl Default for DiskStoreLimits {
    fn default() -> Self {
        Self::defaults()
    }
}

#[derive(Debug)]
struct DiskStoreInner {
    dir: PathBuf,
    blobs: BlobStore,
    max_bytes: AtomicU64,
    touch_interval_ms: u64,
    access_index_flush_interval_ms: u64,
    last_touch: DashMap<String, Instant>,
    cleanup_lock: Mutex<()>,
    usage: UsageBytes,
    access_index: Mutex<AccessIndex>,
    access_index_flush_lock: Mutex<()>,
    stats: DiskStoreCounters,
}

/// Persistent store for one format, kept under a byte budget by evicting the
/// least recently accessed entries.
///
/// Cloning is cheap and clones share state.
#[derive(Debug, Clone)]
pub struct DiskStore {
    inner: Arc<DiskStoreInner>,
}

impl DiskStore {
    /// Open the store in `dir`, creating it if needed.
    ///
    /// Opening trims the store to `capacity` and reconciles the access index
    /// with the entries actually present.
    pub fn open(
        dir: impl Into<PathBuf>,
        capacity: ByteSize,
        limits: DiskStoreLimits,
    ) -> Result<Self, StoreError> {
        let dir = dir.into();
        let blob_dir = dir.join("blobs");
        std::fs::create_dir_all(&blob_dir)?;

        let now_ms = unix_ms_now();
        let mut access_index = AccessIndex::load_or_default(
            dir.join(AccessIndex::FILE_NAME),
            now_ms,
        );
        let usage = cleanup_sync(
            &blob_dir,
            capacity.as_bytes(),
            &mut access_index,
            now_ms,
        );

        tracing::debug!(
            dir = %dir.display(),
            capacity = %capacity,
            usage = %ByteSize::from_bytes(usage),
            "opened disk store"
        );

        Ok(Self {
            inner: Arc::new(DiskStoreInner {
                dir,
                blobs: BlobStore::new(blob_dir),
                max_bytes: AtomicU64::new(capacity.as_bytes()),
                touch_interval_ms: duration_ms(limits.touch_interval),
                access_index_flush_interval_ms: duration_ms(
                    limits.access_index_flush_interval,
                ),
                last_touch: DashMap::new(),
                cleanup_lock: Mutex::new(()),
                usage: UsageBytes::new(usage),
                access_index: Mutex::new(access_index),
                access_index_flush_lock: Mutex::new(()),
                stats: DiskStoreCounters::default(),
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    pub fn stats(&self) -> DiskStoreStats {
        self.inner.stats.snapshot()
    }

    /// Evict down to capacity now.
    pub async fn cleanup(&self) {
        self.inner.cleanup_once().await;
    }
}

impl DiskStoreInner {
    fn max_bytes(&self) -> u64 {
        self.max_bytes.load(Ordering::Relaxed)
    }

    async fn write(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let digest = KeyDigest::from_key(key);
        let now_ms = unix_ms_now();

        let old_size_bytes = match self.blobs.metadata(key).await {
            Ok(meta) => meta.map(|m| m.byte_len),
            Err(e) => {
                tracing::debug!(
                    key,
                    "disk store write preflight metadata failed: {e}"
                );
                None
            }
        };

        let mut removed_old = false;
        let mut needs_usage_refresh = false;
        if old_size_bytes.is_some() {
            if let Err(e) = self.blobs.remove(key).await {
                tracing::warn!(
                    key,
                    "disk store failed to remove stale entry before overwrite: {e}"
                );
                needs_usage_refresh = true;
            } else {
                removed_old = true;
            }
        }

        let written = self.blobs.write(key, bytes).await;
        match &written {
            Ok(()) => {
                if removed_old && let Some(old) = old_size_bytes {
                    self.usage.sub_saturating(old);
                }
                self.usage.add_saturating(bytes.len() as u64);
                self.stats.on_write(bytes.len() as u64);
                self.access_index.lock().await.insert_on_write(digest, now_ms);
                tracing::trace!(
                    key,
                    bytes = bytes.len(),
                    "disk store wrote entry"
                );
            }
            Err(e) => {
                tracing::warn!(key, "disk store write failed: {e}");
                if removed_old {
                    self.access_index.lock().await.remove(&digest);
                    needs_usage_refresh = true;
                }
            }
        }

        if needs_usage_refresh {
            self.refresh_usage().await;
        }

        if self.usage.load() > self.max_bytes() {
            self.cleanup_once().await;
        } else {
            self.maybe_flush_access_index(now_ms).await;
        }
        written
    }

    async fn cleanup_once(&self) {
        let _guard = self.cleanup_lock.lock().await;

        let start = Instant::now();
        let max_bytes = self.max_bytes();
        let now_ms = unix_ms_now();

        let entries = match self.list().await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(
                    dir = %self.dir.display(),
                    "disk store cleanup listing failed: {e}"
                );
                return;
            }
        };

        let mut present_digests: HashSet<KeyDigest> =
            HashSet::with_capacity(entries.len());
        let infos = {
            let guard = self.access_index.lock().await;
            entry_infos(entries, &guard, &mut present_digests)
        };

        let plan = plan_evictions(infos, max_bytes);
        if !plan.planned.is_empty() {
            tracing::debug!(
                dir = %self.dir.display(),
                planned = plan.planned.len(),
                target_bytes = plan.total_bytes_after,
                "disk store over capacity"
            );
        }
        let mut total_bytes = plan.total_bytes_before;
        let mut evicted: Vec<KeyDigest> =
            Vec::with_capacity(plan.planned.len());
        let mut evicted_bytes = 0u64;

        for entry in plan.planned {
            match self.blobs.remove(&entry.key).await {
                Ok(()) => {
                    total_bytes = total_bytes.saturating_sub(entry.size_bytes);
                    evicted_bytes =
                        evicted_bytes.saturating_add(entry.size_bytes);
                    self.last_touch.remove(&entry.key);
                    evicted.push(entry.digest);
                }
                Err(e) => {
                    tracing::warn!(
                        key = %entry.key,
                        "disk store eviction failed: {e}"
                    );
                }
            }
        }

        let maybe_snapshot = {
            let mut guard = self.access_index.lock().await;
            for digest in &evicted {
                guard.remove(digest);
            }
            let pruned = guard.prune_not_in_set(&present_digests);
            if pruned > 0 {
                tracing::debug!(
                    pruned,
                    "disk store access index pruned stale entries"
                );
            }
            guard.prepare_flush(now_ms)
        };
        if let Some((path, bytes)) = maybe_snapshot {
            let _ = self.flush_access_index_snapshot(path, bytes).await;
        }

        self.usage.store(total_bytes);
        let duration_ms = duration_ms(start.elapsed());
        self.stats
            .on_cleanup(evicted.len() as u64, evicted_bytes, duration_ms);

        if !evicted.is_empty() {
            tracing::info!(
                dir = %self.dir.display(),
                evicted = evicted.len(),
                scanned = present_digests.len(),
                duration_ms,
                "disk store cleanup evicted entries over capacity"
            );
        }
    }

    async fn list(&self) -> Result<Vec<cacache::Metadata>, StoreError> {
        let dir = self.blobs.dir().to_path_buf();
        tokio::task::spawn_blocking(move || list_sync(&dir))
            .await
            .map_err(|e| {
                StoreError::Internal(format!("index listing join failed: {e}"))
            })
    }

    async fn refresh_usage(&self) {
        match self.list().await {
            Ok(entries) => {
                let total = entries
                    .iter()
                    .fold(0u64, |acc, m| acc.saturating_add(m.size as u64));
                self.usage.store(total);
            }
            Err(e) => {
                tracing::warn!(
                    dir = %self.dir.display(),
                    "disk store usage probe failed: {e}"
                );
            }
        }
    }

    async fn maybe_touch(&self, key: &str) {
        let now = Instant::now();
        if self.touch_interval_ms > 0
            && let TryResult::Present(last) = self.last_touch.try_get(key)
            && now.duration_since(*last)
                < Duration::from_millis(self.touch_interval_ms)
        {
            self.stats.on_touch(false);
            return;
        }
        if self.touch_interval_ms > 0 {
            self.last_touch.insert(key.to_owned(), now);
        }
        self.stats.on_touch(true);

        let now_ms = unix_ms_now();
        self.access_index
            .lock()
            .await
            .touch(KeyDigest::from_key(key), now_ms);
        self.maybe_flush_access_index(now_ms).await;
    }

    async fn maybe_flush_access_index(&self, now_ms: u64) {
        let under_pressure =
            is_under_pressure(self.usage.load(), self.max_bytes());

        let maybe_snapshot = {
            let mut guard = self.access_index.lock().await;
            if guard.should_flush(
                now_ms,
                self.access_index_flush_interval_ms,
                under_pressure,
            ) {
                guard.prepare_flush(now_ms)
            } else {
                None
            }
        };

        if let Some((path, bytes)) = maybe_snapshot {
            let _ = self.flush_access_index_snapshot(path, bytes).await;
        }
    }

    async fn flush_access_index(&self) -> Result<(), StoreError> {
        let maybe_snapshot =
            self.access_index.lock().await.prepare_flush(unix_ms_now());
        match maybe_snapshot {
            Some((path, bytes)) => {
                self.flush_access_index_snapshot(path, bytes).await
            }
            None => Ok(()),
        }
    }

    async fn flush_access_index_snapshot(
        &self,
        path: PathBuf,
        bytes: Vec<u8>,
    ) -> Result<(), StoreError> {
        let _guard = self.access_index_flush_lock.lock().await;
        let path_for_write = path.clone();
        let result = tokio::task::spawn_blocking(move || {
            write_snapshot_sync(&path_for_write, &bytes)
        })
        .await
        .map_err(|e| {
            StoreError::Internal(format!("access index flush join failed: {e}"))
        })
        .and_then(|written| written.map_err(StoreError::from));

        match &result {
            Ok(()) => self.stats.on_index_flush(true),
            Err(e) => {
                self.stats.on_index_flush(false);
                tracing::warn!(
                    path = %path.display(),
                    "disk store access index flush failed: {e}"
                );
                self.access_index.lock().await.mark_dirty();
            }
        }
        result
    }
}

#[async_trait]
impl PersistentStore for DiskStore {
    async fn fetch(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let result = self.inner.blobs.read(key).await;
        self.inner.stats.on_read(result.is_ok());
        if result.is_ok() {
            self.inner.maybe_touch(key).await;
        }
        result
    }

    async fn store(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        if self.inner.max_bytes() == 0 {
            tracing::trace!(key, "disk store has no capacity, skipping write");
            return Ok(());
        }
        self.inner.write(key, &bytes).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let Some(meta) = self.inner.blobs.metadata(key).await? else {
            return Ok(());
        };
        self.inner.blobs.remove(key).await?;
        self.inner.usage.sub_saturating(meta.byte_len);
        self.inner.stats.on_remove();
        self.inner.last_touch.remove(key);
        self.inner
            .access_index
            .lock()
            .await
            .remove(&KeyDigest::from_key(key));
        tracing::trace!(key, "disk store removed entry");
        Ok(())
    }

    async fn remove_all(&self) -> Result<(), StoreError> {
        let guard = self.inner.cleanup_lock.lock().await;
        self.inner.blobs.clear().await?;
        self.inner.usage.store(0);
        self.inner.last_touch.clear();
        self.inner.access_index.lock().await.clear();
        drop(guard);

        tracing::debug!(dir = %self.inner.dir.display(), "disk store cleared");
        self.inner.flush_access_index().await
    }

    async fn enumerate_by_access_date(
        &self,
        visitor: &mut EntryVisitor<'_>,
    ) -> Result<(), StoreError> {
        let entries = self.inner.list().await?;
        let mut infos = {
            let guard = self.inner.access_index.lock().await;
            entry_infos(entries, &guard, &mut HashSet::new())
        };
        infos.sort_by(|a, b| b.last_access_ms.cmp(&a.last_access_ms));

        for info in infos {
            let bytes = match self.inner.blobs.read(&info.key).await {
                Ok(bytes) => bytes,
                // Evicted or removed since the listing.
                Err(StoreError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            let entry = StoredEntry {
                key: info.key,
                bytes,
                accessed_at: timestamp(info.last_access_ms),
            };
            if visitor(entry).is_break() {
                break;
            }
        }
        Ok(())
    }

    async fn update_access_date(
        &self,
        key: &str,
        bytes: LazyBytes,
    ) -> Result<(), StoreError> {
        if self.inner.blobs.metadata(key).await?.is_some() {
            self.inner.maybe_touch(key).await;
            return Ok(());
        }
        if self.inner.max_bytes() == 0 {
            return Ok(());
        }

        let payload = tokio::task::spawn_blocking(bytes).await.map_err(|e| {
            StoreError::Internal(format!("payload provider join failed: {e}"))
        })?;
        match payload {
            Some(payload) => self.inner.write(key, &payload).await,
            None => {
                tracing::debug!(
                    key,
                    "no payload for missing entry, access not recorded"
                );
                Ok(())
            }
        }
    }

    async fn flush(&self) -> Result<(), StoreError> {
        self.inner.flush_access_index().await
    }

    fn capacity(&self) -> ByteSize {
        ByteSize::from_bytes(self.inner.max_bytes())
    }

    fn set_capacity(&self, capacity: ByteSize) {
        let previous = self
            .inner
            .max_bytes
            .swap(capacity.as_bytes(), Ordering::SeqCst);

        if capacity.as_bytes() < previous
            && let Ok(handle) = tokio::runtime::Handle::try_current()
        {
            let inner = Arc::clone(&self.inner);
            handle.spawn(async move {
                inner.cleanup_once().await;
            });
        }
    }

    fn size(&self) -> ByteSize {
        ByteSize::from_bytes(self.inner.usage.load())
    }
}

/// Opens a [`DiskStore`] per registered format.
#[derive(Debug, Clone, Default)]
pub struct DiskStoreFactory {
    limits: DiskStoreLimits,
}

impl DiskStoreFactory {
    pub fn new(limits: DiskStoreLimits) -> Self {
        Self { limits }
    }
}

impl StoreFactory for DiskStoreFactory {
    fn open(
        &self,
        dir: &Path,
        capacity: ByteSize,
    ) -> Result<Arc<dyn PersistentStore>, StoreError> {
        let store = DiskStore::open(dir, capacity, self.limits.clone())?;
        Ok(Arc::new(store))
    }
}

fn entry_infos(
    entries: Vec<cacache::Metadata>,
    index: &AccessIndex,
    present: &mut HashSet<KeyDigest>,
) -> Vec<EntryInfo> {
    entries
        .into_iter()
        .map(|m| {
            let digest = KeyDigest::from_key(&m.key);
            present.insert(digest);
            let last_access_ms = index
                .last_access_ms(&digest)
                .unwrap_or_else(|| u128_to_u64(m.time));
            EntryInfo {
                key: m.key,
                digest,
                size_bytes: m.size as u64,
                last_access_ms,
            }
        })
        .collect()
}

/// Startup pass: trim to `max_bytes`, prune the index and return the usage.
fn cleanup_sync(
    blob_dir: &Path,
    max_bytes: u64,
    access_index: &mut AccessIndex,
    now_ms: u64,
) -> u64 {
    let mut present_digests = HashSet::new();
    let infos =
        entry_infos(list_sync(blob_dir), access_index, &mut present_digests);

    let plan = plan_evictions(infos, max_bytes);
    let mut total_bytes = plan.total_bytes_before;
    let remover = cacache::index::RemoveOpts::new().remove_fully(true);
    for e in plan.planned {
        if let Err(err) = remover.clone().remove_sync(blob_dir, &e.key) {
            tracing::warn!(
                key = %e.key,
                "disk store startup eviction failed: {err}"
            );
            continue;
        }
        total_bytes = total_bytes.saturating_sub(e.size_bytes);
        access_index.remove(&e.digest);
    }

    access_index.prune_not_in_set(&present_digests);
    if let Some((path, bytes)) = access_index.prepare_flush(now_ms)
        && let Err(err) = write_snapshot_sync(&path, &bytes)
    {
        tracing::warn!(
            path = %path.display(),
            "disk store startup access index persist failed: {err}"
        );
        access_index.mark_dirty();
    }

    total_bytes
}

fn unix_ms_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis()
        .min(u128::from(u64::MAX)) as u64
}

fn duration_ms(duration: Duration) -> u64 {
    duration.as_millis().min(u128::from(u64::MAX)) as u64
}

fn u128_to_u64(v: u128) -> u64 {
    v.min(u128::from(u64::MAX)) as u64
}

fn timestamp(ms: u64) -> DateTime<Utc> {
    i64::try_from(ms)
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or_default()
}

fn is_under_pressure(usage_bytes: u64, max_bytes: u64) -> bool {
    max_bytes > 0
        && usage_bytes.saturating_mul(100) >= max_bytes.saturating_mul(80)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ops::ControlFlow;
    use tempfile::tempdir;

    fn open_store(dir: impl Into<PathBuf>, capacity: ByteSize) -> DiskStore {
        DiskStore::open(dir, capacity, limits()).unwrap()
    }

    fn limits() -> DiskStoreLimits {
        DiskStoreLimits::defaults()
    }

    async fn keys_by_recency(store: &DiskStore) -> Vec<String> {
        let mut keys = Vec::new();
        store
            .enumerate_by_access_date(&mut |entry: StoredEntry| {
                keys.push(entry.key);
                ControlFlow::Continue(())
            })
            .await
            .unwrap();
        keys
    }

    #[tokio::test]
    async fn write_read_and_missing_key() {
        let dir = tempdir().unwrap();
        let store =
            open_store(dir.path().join("thumb"), ByteSize::from_kib(64));

        store.store("a", vec![7u8; 100]).await.unwrap();
        assert_eq!(store.fetch("a").await.unwrap(), vec![7u8; 100]);
        assert_eq!(store.size(), ByteSize::from_bytes(100));

        let err = store.fetch("missing").await.unwrap_err();
        assert!(err.is_not_found(), "unexpected {err:?}");

        let stats = store.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.bytes_written, 100);
    }

    #[tokio::test]
    async fn overwrite_replaces_usage() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path(), ByteSize::from_kib(64));

        store.store("a", vec![1u8; 300]).await.unwrap();
        store.store("a", vec![2u8; 200]).await.unwrap();

        assert_eq!(store.size(), ByteSize::from_bytes(200));
        assert_eq!(store.fetch("a").await.unwrap(), vec![2u8; 200]);
    }

    #[tokio::test]
    async fn over_capacity_evicts_least_recently_accessed() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path(), ByteSize::from_bytes(1000));

        store.store("a", vec![1u8; 400]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.store("b", vec![2u8; 400]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        // Reading "a" makes "b" the eviction victim.
        store.fetch("a").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.store("c", vec![3u8; 400]).await.unwrap();

        assert!(store.size().as_bytes() <= 1000);
        assert!(store.fetch("a").await.is_ok());
        assert!(store.fetch("b").await.unwrap_err().is_not_found());
        assert!(store.fetch("c").await.is_ok());
        let stats = store.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.bytes_evicted, 400);
    }

    #[tokio::test]
    async fn enumeration_is_most_recent_first_and_can_stop() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path(), ByteSize::from_kib(64));

        for key in ["a", "b", "c"] {
            store.store(key, key.as_bytes().to_vec()).await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        store.fetch("a").await.unwrap();

        assert_eq!(keys_by_recency(&store).await, ["a", "c", "b"]);

        let mut seen = 0;
        store
            .enumerate_by_access_date(&mut |_entry: StoredEntry| {
                seen += 1;
                ControlFlow::Break(())
            })
            .await
            .unwrap();
        assert_eq!(seen, 1);
    }

    #[tokio::test]
    async fn access_order_and_capacity_survive_reopen() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path(), ByteSize::from_kib(64));

        store.store("a", vec![1u8; 500]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.store("b", vec![2u8; 700]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.fetch("a").await.unwrap();
        store.flush().await.unwrap();
        drop(store);

        let reopened = open_store(dir.path(), ByteSize::from_bytes(600));

        assert!(reopened.size().as_bytes() <= 600);
        assert!(reopened.fetch("a").await.is_ok());
        assert!(reopened.fetch("b").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn lazy_bytes_only_requested_for_missing_entries() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path(), ByteSize::from_kib(64));
        store.store("present", vec![1u8; 10]).await.unwrap();

        store
            .update_access_date(
                "present",
                Box::new(|| -> Option<Vec<u8>> {
                    panic!("payload requested for a present entry")
                }),
            )
            .await
            .unwrap();

        store
            .update_access_date("absent", Box::new(|| Some(vec![9u8; 20])))
            .await
            .unwrap();
        assert_eq!(store.fetch("absent").await.unwrap(), vec![9u8; 20]);
    }

    #[tokio::test]
    async fn remove_and_remove_all() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path(), ByteSize::from_kib(64));
        store.store("a", vec![1u8; 10]).await.unwrap();
        store.store("b", vec![2u8; 20]).await.unwrap();

        store.remove("a").await.unwrap();
        store.remove("never-stored").await.unwrap();
        assert!(store.fetch("a").await.unwrap_err().is_not_found());
        assert_eq!(store.size(), ByteSize::from_bytes(20));

        store.remove_all().await.unwrap();
        assert!(store.fetch("b").await.unwrap_err().is_not_found());
        assert!(store.size().is_zero());
        assert!(keys_by_recency(&store).await.is_empty());

        store.store("c", vec![3u8; 5]).await.unwrap();
        assert!(store.fetch("c").await.is_ok());
    }

    #[tokio::test]
    async fn zero_capacity_never_writes() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path(), ByteSize::ZERO);

        store.store("a", vec![1u8; 10]).await.unwrap();
        assert!(store.fetch("a").await.unwrap_err().is_not_found());
        assert_eq!(store.stats().writes, 0);
    }

    #[tokio::test]
    async fn shrinking_capacity_evicts() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path(), ByteSize::from_kib(64));
        store.store("a", vec![1u8; 400]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.store("b", vec![2u8; 400]).await.unwrap();

        store.set_capacity(ByteSize::from_bytes(500));
        store.cleanup().await;

        assert_eq!(store.capacity(), ByteSize::from_bytes(500));
        assert!(store.fetch("a").await.unwrap_err().is_not_found());
        assert!(store.fetch("b").await.is_ok());
    }
}
