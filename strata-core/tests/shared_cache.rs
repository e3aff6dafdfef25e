mod support;

use strata_core::{
    CacheError, CacheOptions, Dimensions, FormatSpec, ImageCache, ScaleMode,
};
use support::{CountingFetcher, solid};
use tempfile::TempDir;
use tokio::runtime::{Builder, Runtime};

fn runtime() -> Runtime {
    Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .unwrap()
}

// One test per binary: the shared cache is process-wide.
#[test]
fn shared_cache_outlives_the_runtime_that_created_it() {
    let dir = TempDir::new().unwrap();

    let first = runtime();
    first.block_on(async {
        ImageCache::init_shared(CacheOptions::new(dir.path())).unwrap();
    });
    drop(first);

    let second = runtime();
    let image = second.block_on(async {
        let cache = ImageCache::shared().unwrap();
        cache
            .register_format(
                FormatSpec::new("thumb", Dimensions::square(4))
                    .with_scale_mode(ScaleMode::None),
            )
            .await
            .unwrap();
        let fetcher = CountingFetcher::new("k", solid(4, 4, 9));
        cache.fetch_or_produce(fetcher, "thumb").await.unwrap()
    });
    assert_eq!(image.dimensions(), Dimensions::square(4));

    let again = ImageCache::init_shared(CacheOptions::new(dir.path()));
    assert!(matches!(again, Err(CacheError::SharedAlreadyInitialized)));
    assert_eq!(ImageCache::shared().unwrap().root(), dir.path());
}
