//! # Strata Core
//!
//! Two-tier image cache engine: a bounded in-memory LRU of display-ready
//! images in front of per-format persistent stores, filled on demand by
//! [`Fetcher`]s.
//!
//! ## Overview
//!
//! - **Formats**: named size/scale/encoding recipes, each with its own store
//!   under `<root>/<format>`
//! - **Memory tier**: key-identified LRU shared by every format
//! - **Persistent tier**: [`DiskStore`] by default, LRU-evicted by byte budget
//! - **Delivery**: results are handed over on a single [`DeliveryQueue`] thread
//! - **Preload**: warm the memory tier from a format's store on registration
//!
//! ## Example
//!
//! ```no_run
//! use strata_core::{
//!     CacheOptions, Dimensions, Format, ImageCache, PathFetcher,
//! };
//!
//! async fn thumbnail(path: &str) -> Result<(), strata_core::CacheError> {
//!     let cache = ImageCache::new(CacheOptions::new("/tmp/strata"))?;
//!     cache
//!         .register_format(Format::named("thumb", Dimensions::new(200, 200)))
//!         .await?;
//!
//!     let image = cache
//!         .fetch_or_produce(PathFetcher::new(path), "thumb")
//!         .await?;
//!     println!("{}", image.dimensions());
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

/// Cache orchestrator, fetch handles and preloading
pub mod cache;

/// Shared, display-ready image handle
pub mod cached_image;

/// Decode, encode and resample seam
pub mod codec;

/// Dedicated delivery thread
pub mod delivery;

/// Error types
pub mod error;

/// Image producers
pub mod fetcher;

/// Formats and their registrations
pub mod format;

/// In-memory LRU tier
pub mod memory;

mod runtime;

/// Persistent store contract and the disk-backed implementation
pub mod store;

pub use cache::{
    CacheOptions, CacheStats, Fetch, ImageCache, LowMemory, PreloadStop,
    PreloadSummary, RECENT_WINDOW, Registration,
};
pub use cached_image::CachedImage;
pub use codec::{CodecError, ImageCodec, RasterCodec};
pub use delivery::{DeliveryError, DeliveryQueue};
pub use error::{BoxError, CacheError};
pub use fetcher::{FetchError, Fetcher, HttpFetcher, PathFetcher, StaticFetcher};
pub use format::{Format, FormatHandle, ImageHook};
pub use memory::MemoryCache;
pub use store::{
    DiskStore, DiskStoreFactory, DiskStoreLimits, DiskStoreStats, EntryVisitor,
    LazyBytes, PersistentStore, StoreError, StoreFactory, StoredEntry,
};

pub use strata_model::{
    ByteSize, Dimensions, FormatSpec, FormatSpecError, PreloadPolicy, ScaleMode,
    StorageEncoding,
};
