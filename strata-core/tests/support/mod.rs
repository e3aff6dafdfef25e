#![allow(dead_code)]

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use image::{Rgba, RgbaImage};
use parking_lot::Mutex;
use strata_core::{
    BoxError, ByteSize, CacheOptions, CachedImage, EntryVisitor, Fetcher,
    ImageCache, ImageCodec, LazyBytes, PersistentStore, RasterCodec,
    StorageEncoding, StoreError, StoreFactory, StoredEntry,
};
use tempfile::TempDir;
use tokio::sync::Notify;

/// Solid-colour RGBA image.
pub fn solid(width: u32, height: u32, value: u8) -> CachedImage {
    let pixel = Rgba([value, value, value, 255]);
    CachedImage::from_rgba(RgbaImage::from_pixel(width, height, pixel))
}

pub fn png_bytes(image: &CachedImage) -> Vec<u8> {
    RasterCodec::default()
        .encode(image, 1.0, StorageEncoding::Png)
        .expect("png encode")
}

pub fn first_pixel(image: &CachedImage) -> [u8; 4] {
    image.as_dynamic().to_rgba8().get_pixel(0, 0).0
}

/// Cache over [`strata_core::DiskStore`]s in a fresh temporary directory.
pub fn disk_cache(memory_capacity: usize) -> (ImageCache, TempDir) {
    let dir = TempDir::new().expect("tempdir");
    let cache = ImageCache::new(
        CacheOptions::new(dir.path()).with_memory_capacity(memory_capacity),
    )
    .expect("cache");
    (cache, dir)
}

/// Counts its calls; answers with a fixed image.
#[derive(Debug, Clone)]
pub struct CountingFetcher {
    key: String,
    image: CachedImage,
    calls: Arc<AtomicUsize>,
}

impl CountingFetcher {
    pub fn new(key: &str, image: CachedImage) -> Self {
        Self {
            key: key.to_owned(),
            image,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for CountingFetcher {
    fn key(&self) -> &str {
        &self.key
    }

    async fn fetch(&self) -> Result<Option<CachedImage>, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Some(self.image.clone()))
    }
}

/// Answers with a fixed image once [`GatedFetcher::release`] is called.
#[derive(Debug, Clone)]
pub struct GatedFetcher {
    key: String,
    image: CachedImage,
    gate: Arc<Notify>,
}

impl GatedFetcher {
    pub fn new(key: &str, image: CachedImage) -> Self {
        Self {
            key: key.to_owned(),
            image,
            gate: Arc::new(Notify::new()),
        }
    }

    pub fn release(&self) {
        self.gate.notify_one();
    }
}

#[async_trait]
impl Fetcher for GatedFetcher {
    fn key(&self) -> &str {
        &self.key
    }

    async fn fetch(&self) -> Result<Option<CachedImage>, BoxError> {
        self.gate.notified().await;
        Ok(Some(self.image.clone()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkDown(pub &'static str);

impl fmt::Display for NetworkDown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "network down: {}", self.0)
    }
}

impl std::error::Error for NetworkDown {}

/// Always fails with [`NetworkDown`].
#[derive(Debug)]
pub struct FailingFetcher {
    key: String,
}

impl FailingFetcher {
    pub fn new(key: &str) -> Self {
        Self { key: key.to_owned() }
    }
}

#[async_trait]
impl Fetcher for FailingFetcher {
    fn key(&self) -> &str {
        &self.key
    }

    async fn fetch(&self) -> Result<Option<CachedImage>, BoxError> {
        Err(Box::new(NetworkDown("connection reset")))
    }
}

#[derive(Debug, Default)]
struct FixtureState {
    entries: BTreeMap<String, (Vec<u8>, DateTime<Utc>)>,
    capacity: ByteSize,
}

/// In-memory [`PersistentStore`] with caller-controlled access dates.
///
/// Enumeration waits for [`FixtureStore::release`] when the store was created
/// gated.
#[derive(Debug, Clone)]
pub struct FixtureStore {
    state: Arc<Mutex<FixtureState>>,
    gate: Option<Arc<Notify>>,
    visited: Arc<AtomicUsize>,
    failing_purge: Arc<AtomicBool>,
}

impl FixtureStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FixtureState {
                entries: BTreeMap::new(),
                capacity: ByteSize::from_mib(10),
            })),
            gate: None,
            visited: Arc::new(AtomicUsize::new(0)),
            failing_purge: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Notify::new())),
            ..Self::new()
        }
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    /// Make every later `remove_all` fail.
    pub fn fail_purges(&self) {
        self.failing_purge.store(true, Ordering::SeqCst);
    }

    pub fn seed(
        &self,
        key: &str,
        image: &CachedImage,
        accessed_at: DateTime<Utc>,
    ) {
        self.state
            .lock()
            .entries
            .insert(key.to_owned(), (png_bytes(image), accessed_at));
    }

    pub fn seed_raw(
        &self,
        key: &str,
        bytes: Vec<u8>,
        accessed_at: DateTime<Utc>,
    ) {
        self.state
            .lock()
            .entries
            .insert(key.to_owned(), (bytes, accessed_at));
    }

    /// Seed `count` entries named `k0..` one minute apart, `k0` newest.
    pub fn seed_minutes_apart(&self, count: usize, newest: DateTime<Utc>) {
        for i in 0..count {
            let at = newest - TimeDelta::minutes(i as i64);
            self.seed(&format!("k{i}"), &solid(2, 2, i as u8), at);
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.state.lock().entries.keys().cloned().collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().entries.contains_key(key)
    }

    pub fn accessed_at(&self, key: &str) -> Option<DateTime<Utc>> {
        self.state.lock().entries.get(key).map(|(_, at)| *at)
    }

    pub fn visited(&self) -> usize {
        self.visited.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PersistentStore for FixtureStore {
    async fn fetch(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.state
            .lock()
            .entries
            .get(key)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| StoreError::NotFound(key.to_owned()))
    }

    async fn store(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        self.state
            .lock()
            .entries
            .insert(key.to_owned(), (bytes, Utc::now()));
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.state.lock().entries.remove(key);
        Ok(())
    }

    async fn remove_all(&self) -> Result<(), StoreError> {
        if self.failing_purge.load(Ordering::SeqCst) {
            return Err(StoreError::Internal("purge refused".to_owned()));
        }
        self.state.lock().entries.clear();
        Ok(())
    }

    async fn enumerate_by_access_date(
        &self,
        visitor: &mut EntryVisitor<'_>,
    ) -> Result<(), StoreError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        let mut entries: Vec<StoredEntry> = self
            .state
            .lock()
            .entries
            .iter()
            .map(|(key, (bytes, at))| StoredEntry {
                key: key.clone(),
                bytes: bytes.clone(),
                accessed_at: *at,
            })
            .collect();
        entries.sort_by(|a, b| b.accessed_at.cmp(&a.accessed_at));

        for entry in entries {
            self.visited.fetch_add(1, Ordering::SeqCst);
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
        let mut state = self.state.lock();
        if let Some((_, at)) = state.entries.get_mut(key) {
            *at = Utc::now();
            return Ok(());
        }
        if let Some(bytes) = bytes() {
            state.entries.insert(key.to_owned(), (bytes, Utc::now()));
        }
        Ok(())
    }

    fn capacity(&self) -> ByteSize {
        self.state.lock().capacity
    }

    fn set_capacity(&self, capacity: ByteSize) {
        self.state.lock().capacity = capacity;
    }

    fn size(&self) -> ByteSize {
        let total: usize =
            self.state.lock().entries.values().map(|(b, _)| b.len()).sum();
        ByteSize::from_usize(total)
    }
}

/// Hands out pre-built [`FixtureStore`]s by format directory name.
#[derive(Debug, Default)]
pub struct FixtureFactory {
    stores: Mutex<HashMap<String, FixtureStore>>,
    opened: Mutex<Vec<PathBuf>>,
}

impl FixtureFactory {
    pub fn with_store(self, format: &str, store: FixtureStore) -> Self {
        self.stores.lock().insert(format.to_owned(), store);
        self
    }

    /// Store for `format`, creating an empty one if none was provided.
    pub fn store(&self, format: &str) -> FixtureStore {
        self.stores
            .lock()
            .entry(format.to_owned())
            .or_insert_with(FixtureStore::new)
            .clone()
    }

    pub fn opened(&self) -> Vec<PathBuf> {
        self.opened.lock().clone()
    }
}

impl StoreFactory for FixtureFactory {
    fn open(
        &self,
        dir: &Path,
        capacity: ByteSize,
    ) -> Result<Arc<dyn PersistentStore>, StoreError> {
        self.opened.lock().push(dir.to_path_buf());
        let name = dir
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                StoreError::Internal(format!("bad store dir {}", dir.display()))
            })?;
        let store = self.store(name);
        store.set_capacity(capacity);
        Ok(Arc::new(store))
    }
}

/// Factory handing out `store` for `format`.
pub fn factory_with(format: &str, store: FixtureStore) -> Arc<FixtureFactory> {
    Arc::new(FixtureFactory::default().with_store(format, store))
}

/// Cache over a [`FixtureFactory`].
pub fn fixture_cache(
    factory: Arc<FixtureFactory>,
    memory_capacity: usize,
) -> ImageCache {
    ImageCache::new(
        CacheOptions::new("/fixture-root")
            .with_memory_capacity(memory_capacity)
            .with_store_factory(factory),
    )
    .expect("cache")
}
