//! The orchestrator: memory tier, format table and the fetch/store/remove
//! protocol tying them to persistent stores and fetchers.

mod fetch;
mod preload;
mod stats;

pub use fetch::Fetch;
pub use preload::{PreloadStop, PreloadSummary, RECENT_WINDOW};
pub use stats::CacheStats;

use fetch::Responder;
use stats::CacheCounters;

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::{Arc, Weak},
};

use dashmap::DashMap;
use directories::ProjectDirs;
use futures::future::join_all;
use once_cell::sync::OnceCell;
use tokio::{
    sync::{
        broadcast::{self, error::RecvError},
        oneshot,
    },
    task::JoinHandle,
};

use crate::{
    cached_image::CachedImage,
    codec::{ImageCodec, RasterCodec},
    delivery::{DeliveryError, DeliveryQueue},
    error::CacheError,
    fetcher::Fetcher,
    format::{Format, FormatHandle},
    memory::MemoryCache,
    runtime::Background,
    store::{DiskStoreFactory, StoreFactory},
};

static SHARED: OnceCell<ImageCache> = OnceCell::new();

/// System-wide memory pressure notification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LowMemory;

/// Construction parameters for an [`ImageCache`].
#[derive(Clone)]
pub struct CacheOptions {
    /// Parent directory of every format's persistent store.
    pub root: PathBuf,
    /// Item limit of the memory tier. Zero means unbounded.
    pub memory_capacity: usize,
    pub store_factory: Arc<dyn StoreFactory>,
    pub codec: Arc<dyn ImageCodec>,
    /// Delivery thread to use; a dedicated one is started when absent.
    pub delivery: Option<DeliveryQueue>,
    /// Worker threads for an owned runtime. Ignored when the cache borrows
    /// the ambient tokio runtime.
    pub worker_threads: Option<usize>,
    /// Start a dedicated runtime even inside tokio, so the cache outlives
    /// the runtime it was created on.
    pub own_runtime: bool,
}

impl CacheOptions {
    pub const DEFAULT_MEMORY_CAPACITY: usize = 256;

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            memory_capacity: Self::DEFAULT_MEMORY_CAPACITY,
            store_factory: Arc::new(DiskStoreFactory::default()),
            codec: Arc::new(RasterCodec::default()),
            delivery: None,
            worker_threads: None,
            own_runtime: false,
        }
    }

    /// Platform cache directory for Strata images, if one can be resolved.
    pub fn default_root() -> Option<PathBuf> {
        ProjectDirs::from("", "strata", "strata")
            .map(|dirs| dirs.cache_dir().join("images"))
    }

    pub fn with_memory_capacity(mut self, capacity: usize) -> Self {
        self.memory_capacity = capacity;
        self
    }

    pub fn with_store_factory(
        mut self,
        factory: Arc<dyn StoreFactory>,
    ) -> Self {
        self.store_factory = factory;
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn ImageCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_delivery_queue(mut self, queue: DeliveryQueue) -> Self {
        self.delivery = Some(queue);
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads);
        self
    }

    pub fn with_own_runtime(mut self) -> Self {
        self.own_runtime = true;
        self
    }
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self::new(Self::default_root().unwrap_or_else(|| {
            std::env::temp_dir().join("strata").join("images")
        }))
    }
}

impl fmt::Debug for CacheOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheOptions")
            .field("root", &self.root)
            .field("memory_capacity", &self.memory_capacity)
            .field("store_factory", &self.store_factory)
            .field("codec", &self.codec)
            .field("delivery", &self.delivery)
            .field("worker_threads", &self.worker_threads)
            .field("own_runtime", &self.own_runtime)
            .finish()
    }
}

/// A format installed by [`ImageCache::register_format`], with its preload
/// pass if the format asked for one.
#[derive(Debug)]
pub struct Registration {
    format: FormatHandle,
    preload: Option<JoinHandle<PreloadSummary>>,
}

impl Registration {
    pub fn format(&self) -> &FormatHandle {
        &self.format
    }

    pub fn into_format(self) -> FormatHandle {
        self.format
    }

    /// Wait for the preload pass. `None` when the format does not preload.
    pub async fn preloaded(self) -> Option<PreloadSummary> {
        let task = self.preload?;
        Some(task.await.unwrap_or_else(|e| {
            tracing::warn!(
                format = self.format.name(),
                "preload task failed: {e}"
            );
            PreloadSummary {
                format: self.format.name().to_owned(),
                loaded: 0,
                skipped: 0,
                stop: PreloadStop::Failed(e.to_string()),
            }
        }))
    }
}

pub(crate) struct CacheInner {
    root: PathBuf,
    memory: MemoryCache,
    formats: DashMap<String, FormatHandle>,
    store_factory: Arc<dyn StoreFactory>,
    codec: Arc<dyn ImageCodec>,
    delivery: DeliveryQueue,
    background: Background,
    stats: CacheCounters,
}

/// Two-tier image cache.
///
/// Requests probe the memory tier, then the format's persistent store, and
/// optionally fall back to a [`Fetcher`]. Produced images are transformed
/// per format and written back to both tiers.
///
/// Cloning is cheap; clones share one cache.
#[derive(Clone)]
pub struct ImageCache {
    inner: Arc<CacheInner>,
}

impl ImageCache {
    pub fn new(options: CacheOptions) -> Result<Self, CacheError> {
        let delivery = match options.delivery {
            Some(queue) => queue,
            None => DeliveryQueue::new("strata-delivery")?,
        };
        let background =
            Background::new(options.worker_threads, options.own_runtime)
                .map_err(CacheError::Startup)?;

        tracing::debug!(
            root = %options.root.display(),
            memory_capacity = options.memory_capacity,
            "image cache created"
        );

        Ok(Self {
            inner: Arc::new(CacheInner {
                root: options.root,
                memory: MemoryCache::new(options.memory_capacity),
                formats: DashMap::new(),
                store_factory: options.store_factory,
                codec: options.codec,
                delivery,
                background,
                stats: CacheCounters::default(),
            }),
        })
    }

    /// The process-wide cache, created with [`CacheOptions::default`] on
    /// first use unless [`ImageCache::init_shared`] ran before.
    ///
    /// It always runs on its own runtime, so it keeps working after the
    /// runtime that first touched it shuts down.
    pub fn shared() -> Result<&'static ImageCache, CacheError> {
        SHARED.get_or_try_init(|| {
            ImageCache::new(CacheOptions::default().with_own_runtime())
        })
    }

    /// Create the process-wide cache from `options`. Fails with
    /// [`CacheError::SharedAlreadyInitialized`] once it exists.
    pub fn init_shared(
        options: CacheOptions,
    ) -> Result<&'static ImageCache, CacheError> {
        let mut created = false;
        let cache = SHARED.get_or_try_init(|| {
            created = true;
            ImageCache::new(options.with_own_runtime())
        })?;
        if created {
            Ok(cache)
        } else {
            Err(CacheError::SharedAlreadyInitialized)
        }
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    pub fn delivery_queue(&self) -> &DeliveryQueue {
        &self.inner.delivery
    }

    /// Install `format`, replacing and purging any registration with the same
    /// name.
    ///
    /// The format's store is opened under `<root>/<name>`. If the format has a
    /// preload policy, a preload pass starts before this returns; see
    /// [`Registration::preloaded`].
    pub async fn register_format(
        &self,
        format: impl Into<Format>,
    ) -> Result<Registration, CacheError> {
        let format = format.into();
        format.spec().validate()?;

        let inner = Arc::clone(&self.inner);
        self.inner
            .background
            .spawn(async move { inner.register(format).await })
            .await
            .map_err(|_| CacheError::DeliveryInterrupted)?
    }

    pub fn format(&self, name: &str) -> Option<FormatHandle> {
        self.inner.formats.get(name).map(|entry| entry.value().clone())
    }

    /// Registered format names, sorted.
    pub fn format_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .formats
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Look up `key` in memory, then in the format's store.
    pub fn fetch(&self, key: &str, format: &str) -> Fetch {
        self.start_fetch(key.to_owned(), format, None)
    }

    /// Like [`ImageCache::fetch`], falling back to `fetcher` when both tiers
    /// miss or the store fails. The key is [`Fetcher::key`].
    pub fn fetch_or_produce<F>(&self, fetcher: F, format: &str) -> Fetch
    where
        F: Fetcher + 'static,
    {
        let fetcher: Arc<dyn Fetcher> = Arc::new(fetcher);
        self.start_fetch(fetcher.key().to_owned(), format, Some(fetcher))
    }

    /// Callback form of [`ImageCache::fetch`].
    ///
    /// On a memory hit `on_complete` runs before this returns and the result
    /// is `Ok(true)`; otherwise it later runs on the delivery thread.
    pub fn fetch_with<C>(
        &self,
        key: &str,
        format: &str,
        on_complete: C,
    ) -> Result<bool, CacheError>
    where
        C: FnOnce(Result<CachedImage, CacheError>) + Send + 'static,
    {
        let handle = self.inner.lookup(format)?;
        let respond = Box::new(on_complete);
        Ok(self.inner.start(handle, key.to_owned(), None, respond))
    }

    /// Callback form of [`ImageCache::fetch_or_produce`].
    pub fn fetch_or_produce_with<F, C>(
        &self,
        fetcher: F,
        format: &str,
        on_complete: C,
    ) -> Result<bool, CacheError>
    where
        F: Fetcher + 'static,
        C: FnOnce(Result<CachedImage, CacheError>) + Send + 'static,
    {
        let handle = self.inner.lookup(format)?;
        let fetcher: Arc<dyn Fetcher> = Arc::new(fetcher);
        let key = fetcher.key().to_owned();
        Ok(self
            .inner
            .start(handle, key, Some(fetcher), Box::new(on_complete)))
    }

    fn start_fetch(
        &self,
        key: String,
        format: &str,
        fetcher: Option<Arc<dyn Fetcher>>,
    ) -> Fetch {
        let handle = match self.inner.lookup(format) {
            Ok(handle) => handle,
            Err(e) => return Fetch::failed(e),
        };

        if let Some(image) = self.inner.probe_memory(&handle, &key) {
            return Fetch::hit(image);
        }

        let (fetch, respond) = Fetch::channel();
        let inner = Arc::clone(&self.inner);
        self.inner.background.spawn(async move {
            inner.resolve(handle, key, fetcher, respond).await
        });
        fetch
    }

    /// Write `image` through both tiers of `format`, or remove `key` from
    /// both when `image` is `None`.
    pub async fn set(
        &self,
        key: &str,
        format: &str,
        image: Option<CachedImage>,
    ) -> Result<(), CacheError> {
        let handle = self.inner.lookup(format)?;
        let key = key.to_owned();
        let inner = Arc::clone(&self.inner);
        self.inner
            .background
            .spawn(async move { inner.write_through(handle, key, image).await })
            .await
            .map_err(|_| CacheError::DeliveryInterrupted)?
    }

    /// Remove `key` from memory and from every format's store.
    pub async fn remove_key(&self, key: &str) -> Result<(), CacheError> {
        self.inner.memory.remove(key);

        let handles = self.inner.handles();
        let key = key.to_owned();
        self.on_background(async move {
            let removals = handles.iter().map(|handle| async {
                let result = handle.store().remove(&key).await;
                if let Err(e) = &result {
                    tracing::warn!(
                        format = handle.name(),
                        key = %key,
                        "store remove failed: {e}"
                    );
                }
                result
            });
            join_all(removals)
                .await
                .into_iter()
                .find_map(Result::err)
                .map_or(Ok(()), |e| Err(CacheError::Store(e)))
        })
        .await
    }

    /// Clear the memory items and the whole store of `format`.
    pub async fn remove_format(&self, format: &str) -> Result<(), CacheError> {
        let handle = self.inner.lookup(format)?;
        let inner = Arc::clone(&self.inner);
        self.on_background(async move { inner.purge(&handle).await }).await
    }

    /// [`ImageCache::remove_format`] for every registered format.
    pub async fn remove_all(&self) -> Result<(), CacheError> {
        let handles = self.inner.handles();
        let inner = Arc::clone(&self.inner);
        self.on_background(async move {
            let mut first_error = None;
            for handle in handles {
                if let Err(e) = inner.purge(&handle).await {
                    first_error.get_or_insert(e);
                }
            }
            first_error.map_or(Ok(()), Err)
        })
        .await
    }

    /// Drop every memory item. Persistent stores are untouched.
    pub fn handle_low_memory(&self) {
        self.inner.clear_memory();
    }

    /// React to every [`LowMemory`] signal on `signals` until the channel
    /// closes or the cache is dropped.
    pub fn watch_low_memory(
        &self,
        mut signals: broadcast::Receiver<LowMemory>,
    ) -> JoinHandle<()> {
        let weak: Weak<CacheInner> = Arc::downgrade(&self.inner);
        self.inner.background.spawn(async move {
            loop {
                match signals.recv().await {
                    Ok(LowMemory) | Err(RecvError::Lagged(_)) => {
                        let Some(inner) = weak.upgrade() else { break };
                        inner.clear_memory();
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    pub fn memory_capacity(&self) -> usize {
        self.inner.memory.capacity()
    }

    /// Change the memory tier's item limit; zero means unbounded.
    pub fn set_memory_capacity(&self, capacity: usize) {
        self.inner.memory.set_capacity(capacity);
    }

    pub fn memory_len(&self) -> usize {
        self.inner.memory.len()
    }

    /// Whether `key` is in memory under `format`, without touching recency.
    pub fn is_in_memory(&self, key: &str, format: &str) -> bool {
        self.inner.memory.format_of(key).as_deref() == Some(format)
    }

    pub fn set_persistent_capacity(
        &self,
        format: &str,
        capacity: strata_model::ByteSize,
    ) -> Result<(), CacheError> {
        self.inner.lookup(format)?.set_persistent_capacity(capacity);
        Ok(())
    }

    /// Wait for every store write issued so far, then flush store
    /// bookkeeping.
    pub async fn flush(&self) -> Result<(), CacheError> {
        let inner = Arc::clone(&self.inner);
        self.on_background(async move {
            inner.background.flush().await;
            let mut first_error = None;
            for handle in inner.handles() {
                if let Err(e) = handle.store().flush().await {
                    tracing::warn!(
                        format = handle.name(),
                        "store flush failed: {e}"
                    );
                    first_error.get_or_insert(CacheError::Store(e));
                }
            }
            first_error.map_or(Ok(()), Err)
        })
        .await
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            memory_items: self.inner.memory.len(),
            memory_capacity: self.inner.memory.capacity(),
            formats: self.inner.formats.len(),
            pending_writes: self.inner.background.pending_writes(),
            ..self.inner.stats.snapshot()
        }
    }

    async fn on_background<F, T>(&self, work: F) -> Result<T, CacheError>
    where
        F: Future<Output = Result<T, CacheError>> + Send + 'static,
        T: Send + 'static,
    {
        self.inner
            .background
            .spawn(work)
            .await
            .map_err(|_| CacheError::DeliveryInterrupted)?
    }
}

impl fmt::Debug for ImageCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageCache")
            .field("root", &self.inner.root)
            .field("formats", &self.format_names())
            .field("memory_items", &self.inner.memory.len())
            .field("delivery", &self.inner.delivery)
            .field("background", &self.inner.background)
            .finish()
    }
}

impl CacheInner {
    fn lookup(&self, format: &str) -> Result<FormatHandle, CacheError> {
        self.formats
            .get(format)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CacheError::UnknownFormat(format.to_owned()))
    }

    fn handles(&self) -> Vec<FormatHandle> {
        self.formats.iter().map(|entry| entry.value().clone()).collect()
    }

    fn is_registered(&self, handle: &FormatHandle) -> bool {
        self.formats
            .get(handle.name())
            .is_some_and(|current| current.same_registration(handle))
    }

    fn clear_memory(&self) {
        let cleared = self.memory.remove_all();
        tracing::info!(cleared, "low memory: cleared memory tier");
    }

    async fn register(
        self: Arc<Self>,
        format: Format,
    ) -> Result<Registration, CacheError> {
        let name = format.name().to_owned();

        if let Some((_, previous)) = self.formats.remove(&name) {
            tracing::info!(
                format = %name,
                "re-registering format, purging previous registration"
            );
            // Backfills for the old registration land before its store is
            // wiped.
            self.background.flush().await;
            if let Err(e) = self.purge(&previous).await {
                self.formats.entry(name).or_insert(previous);
                return Err(e);
            }
        }

        let dir = self.root.join(&name);
        let capacity = format.spec().persistent_capacity;
        let factory = Arc::clone(&self.store_factory);
        let store = self
            .background
            .spawn_blocking(move || factory.open(&dir, capacity))
            .await
            .map_err(|_| CacheError::DeliveryInterrupted)??;

        let handle = FormatHandle::new(format, store);
        self.formats.insert(name.clone(), handle.clone());
        tracing::debug!(
            format = %name,
            capacity = %capacity,
            preload = %handle.spec().preload_policy,
            "registered format"
        );

        let preload = match handle.spec().preload_policy {
            strata_model::PreloadPolicy::None => None,
            _ => Some(
                self.background
                    .spawn(preload::run(Arc::clone(&self), handle.clone())),
            ),
        };

        Ok(Registration {
            format: handle,
            preload,
        })
    }

    async fn purge(&self, handle: &FormatHandle) -> Result<(), CacheError> {
        let removed = self.memory.remove_format(handle.name());
        handle.store().remove_all().await?;
        tracing::info!(format = handle.name(), removed, "purged format");
        Ok(())
    }

    /// Memory probe of the fetch protocol. Counts the request either way.
    fn probe_memory(
        self: &Arc<Self>,
        handle: &FormatHandle,
        key: &str,
    ) -> Option<CachedImage> {
        handle.record_request();
        let image = self.memory.get_for_format(key, handle.name())?;
        self.stats.on_memory_hit();
        tracing::trace!(format = handle.name(), key, "memory hit");
        self.refresh_access_date(handle, key, image.clone());
        Some(image)
    }

    fn start(
        self: &Arc<Self>,
        handle: FormatHandle,
        key: String,
        fetcher: Option<Arc<dyn Fetcher>>,
        respond: Responder,
    ) -> bool {
        if let Some(image) = self.probe_memory(&handle, &key) {
            respond(Ok(image));
            return true;
        }

        let inner = Arc::clone(self);
        self.background.spawn(async move {
            inner.resolve(handle, key, fetcher, respond).await
        });
        false
    }

    /// Store probe plus optional producer fallback, ending in a delivery.
    async fn resolve(
        self: Arc<Self>,
        handle: FormatHandle,
        key: String,
        fetcher: Option<Arc<dyn Fetcher>>,
        respond: Responder,
    ) {
        match self.load_from_store(&handle, &key).await {
            Ok(image) => {
                self.stats.on_store_hit();
                tracing::debug!(
                    format = handle.name(),
                    key = %key,
                    "store hit"
                );
                self.refresh_access_date(&handle, &key, image.clone());
                self.deliver(&handle, &key, Ok(image), respond);
            }
            Err(err) => match fetcher {
                Some(fetcher) => {
                    tracing::debug!(
                        format = handle.name(),
                        key = %key,
                        "store miss, producing: {err}"
                    );
                    match self.produce(&handle, &key, fetcher).await {
                        Ok(image) => {
                            self.stats.on_produced();
                            // Queued before delivery so a flush issued on
                            // receipt covers it.
                            self.backfill(&handle, &key, image.clone());
                            self.deliver(&handle, &key, Ok(image), respond);
                        }
                        Err(e) => {
                            self.stats.on_failure();
                            self.deliver(&handle, &key, Err(e), respond);
                        }
                    }
                }
                None => {
                    if err.is_not_found() {
                        self.stats.on_miss();
                    } else {
                        self.stats.on_failure();
                    }
                    self.deliver(&handle, &key, Err(err), respond);
                }
            },
        }
    }

    async fn load_from_store(
        &self,
        handle: &FormatHandle,
        key: &str,
    ) -> Result<CachedImage, CacheError> {
        let bytes = handle.store().fetch(key).await.map_err(|e| {
            if e.is_not_found() {
                CacheError::ImageNotFound {
                    key: key.to_owned(),
                    format: handle.name().to_owned(),
                }
            } else {
                CacheError::Store(e)
            }
        })?;

        let codec = Arc::clone(&self.codec);
        let decoded = self
            .background
            .spawn_blocking(move || codec.decode(&bytes))
            .await
            .map_err(|_| CacheError::DeliveryInterrupted)?
            .map_err(|source| CacheError::CannotDecodeStoredData {
                key: key.to_owned(),
                format: handle.name().to_owned(),
                source,
            })?;

        let codec = Arc::clone(&self.codec);
        self.background
            .spawn_blocking(move || codec.materialize(decoded))
            .await
            .map_err(|_| CacheError::DeliveryInterrupted)
    }

    async fn produce(
        &self,
        handle: &FormatHandle,
        key: &str,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<CachedImage, CacheError> {
        let original = match fetcher.fetch().await {
            Ok(Some(image)) => image,
            Ok(None) => {
                return Err(CacheError::FetcherMustReturnImage {
                    key: key.to_owned(),
                });
            }
            Err(e) => {
                tracing::debug!(
                    format = handle.name(),
                    key,
                    "fetcher failed: {e}"
                );
                return Err(CacheError::Fetcher(e));
            }
        };

        let codec = Arc::clone(&self.codec);
        let transform_handle = handle.clone();
        let image = self
            .background
            .spawn_blocking(move || {
                transform_handle.format().transform(original, codec.as_ref())
            })
            .await
            .map_err(|_| CacheError::DeliveryInterrupted)?;

        tracing::debug!(
            format = handle.name(),
            key,
            dimensions = %image.dimensions(),
            "produced image"
        );
        Ok(image)
    }

    /// On the delivery thread: insert successes into memory, then respond.
    fn deliver(
        self: &Arc<Self>,
        handle: &FormatHandle,
        key: &str,
        result: Result<CachedImage, CacheError>,
        respond: Responder,
    ) {
        let inner = Arc::clone(self);
        let handle = handle.clone();
        let key = key.to_owned();
        let dispatched = self.delivery.dispatch(move || {
            if let Ok(image) = &result
                && inner.is_registered(&handle)
            {
                inner.memory.set(&key, image.clone(), handle.name());
            }
            respond(result);
        });
        if let Err(e) = dispatched {
            tracing::warn!("dropping delivery: {e}");
        }
    }

    /// Encode and write a produced image to the store, unless memory-only
    /// or no longer registered.
    fn backfill(
        self: &Arc<Self>,
        handle: &FormatHandle,
        key: &str,
        image: CachedImage,
    ) {
        if handle.is_memory_only() || !self.is_registered(handle) {
            return;
        }
        let codec = Arc::clone(&self.codec);
        let quality = handle.spec().compression_quality;
        let encoding = handle.spec().storage_encoding;
        let inner = Arc::clone(self);
        let handle = handle.clone();
        let key = key.to_owned();
        let encode = self
            .background
            .spawn_blocking(move || codec.encode(&image, quality, encoding));

        self.background.spawn_write(async move {
            let bytes = match encode.await {
                Ok(Ok(bytes)) => bytes,
                Ok(Err(e)) => {
                    tracing::warn!(
                        format = handle.name(),
                        key = %key,
                        "backfill encode failed: {e}"
                    );
                    return;
                }
                Err(e) => {
                    tracing::warn!(
                        format = handle.name(),
                        key = %key,
                        "backfill encode task failed: {e}"
                    );
                    return;
                }
            };
            // Re-registration flushes tracked writes before purging, so a
            // write that passes this check lands before the purge.
            if !inner.is_registered(&handle) {
                tracing::debug!(
                    format = handle.name(),
                    key = %key,
                    "dropping backfill for a replaced registration"
                );
                return;
            }
            if let Err(e) = handle.store().store(&key, bytes).await {
                tracing::warn!(
                    format = handle.name(),
                    key = %key,
                    "backfill store write failed: {e}"
                );
            }
        });
    }

    /// Tell the store `key` was just used, encoding lazily if it needs bytes.
    fn refresh_access_date(
        &self,
        handle: &FormatHandle,
        key: &str,
        image: CachedImage,
    ) {
        if handle.is_memory_only() {
            return;
        }
        let codec = Arc::clone(&self.codec);
        let spec = handle.spec().clone();
        let store = Arc::clone(handle.store());
        let key = key.to_owned();

        self.background.spawn_write(async move {
            let quality = spec.compression_quality;
            let encoding = spec.storage_encoding;
            let lazy_key = key.clone();
            let bytes = Box::new(move || {
                match codec.encode(&image, quality, encoding) {
                    Ok(bytes) => Some(bytes),
                    Err(e) => {
                        tracing::debug!(
                            key = %lazy_key,
                            "access refresh encode failed: {e}"
                        );
                        None
                    }
                }
            });
            if let Err(e) = store.update_access_date(&key, bytes).await {
                tracing::debug!(
                    format = %spec.name,
                    key = %key,
                    "access date refresh failed: {e}"
                );
            }
        });
    }

    async fn write_through(
        self: Arc<Self>,
        handle: FormatHandle,
        key: String,
        image: Option<CachedImage>,
    ) -> Result<(), CacheError> {
        let Some(image) = image else {
            self.memory.remove_for_format(&key, handle.name());
            handle.store().remove(&key).await?;
            tracing::debug!(
                format = handle.name(),
                key = %key,
                "removed by empty set"
            );
            return Ok(());
        };

        self.memory.set(&key, image.clone(), handle.name());
        if handle.is_memory_only() {
            return Ok(());
        }

        let codec = Arc::clone(&self.codec);
        let spec = handle.spec().clone();
        let bytes = self
            .background
            .spawn_blocking(move || {
                codec.encode(
                    &image,
                    spec.compression_quality,
                    spec.storage_encoding,
                )
            })
            .await
            .map_err(|_| CacheError::DeliveryInterrupted)??;
        handle.store().store(&key, bytes).await?;
        tracing::debug!(
            format = handle.name(),
            key = %key,
            "wrote through both tiers"
        );
        Ok(())
    }

    /// Run `job` on the delivery thread and await its result.
    async fn on_delivery<F, R>(&self, job: F) -> Result<R, DeliveryError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.delivery.dispatch(move || {
            let _ = tx.send(job());
        })?;
        rx.await.map_err(|_| DeliveryError::Interrupted)
    }
}
