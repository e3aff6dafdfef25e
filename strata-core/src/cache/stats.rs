use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of an [`ImageCache`](crate::ImageCache)'s counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Requests answered in-line by the memory tier.
    pub memory_hits: u64,
    /// Requests answered by a persistent store.
    pub store_hits: u64,
    /// Requests that ended in `ImageNotFound`.
    pub misses: u64,
    /// Images obtained from fetchers and transformed.
    pub produced: u64,
    /// Requests that ended in any other error.
    pub failures: u64,
    /// Entries inserted by preload passes.
    pub preloaded: u64,
    pub memory_items: usize,
    pub memory_capacity: usize,
    pub formats: usize,
    pub pending_writes: usize,
}

#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    memory_hits: AtomicU64,
    store_hits: AtomicU64,
    misses: AtomicU64,
    produced: AtomicU64,
    failures: AtomicU64,
    preloaded: AtomicU64,
}

impl CacheCounters {
    pub fn on_memory_hit(&self) {
        self.memory_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_store_hit(&self) {
        self.store_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_produced(&self) {
        self.produced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_preloaded(&self, count: u64) {
        self.preloaded.fetch_add(count, Ordering::Relaxed);
    }

    /// Counter values; the caller fills in the gauges.
    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            store_hits: self.store_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            produced: self.produced.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            preloaded: self.preloaded.load(Ordering::Relaxed),
            ..CacheStats::default()
        }
    }
}
