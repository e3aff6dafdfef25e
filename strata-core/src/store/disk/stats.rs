use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time counters of one [`DiskStore`](super::DiskStore).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskStoreStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub bytes_written: u64,
    pub removals: u64,
    /// Access dates recorded.
    pub touches: u64,
    /// Access dates skipped by the touch interval.
    pub touches_throttled: u64,
    pub index_flushes: u64,
    pub index_flush_failures: u64,
    pub cleanups: u64,
    pub evictions: u64,
    pub bytes_evicted: u64,
    pub last_cleanup_ms: u64,
}

#[derive(Debug, Default)]
pub(super) struct DiskStoreCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    bytes_written: AtomicU64,
    removals: AtomicU64,
    touches: AtomicU64,
    touches_throttled: AtomicU64,
    index_flushes: AtomicU64,
    index_flush_failures: AtomicU64,
    cleanups: AtomicU64,
    evictions: AtomicU64,
    bytes_evicted: AtomicU64,
    last_cleanup_ms: AtomicU64,
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

fn read(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

impl DiskStoreCounters {
    pub fn on_read(&self, hit: bool) {
        bump(if hit { &self.hits } else { &self.misses }, 1);
    }

    pub fn on_write(&self, bytes: u64) {
        bump(&self.writes, 1);
        bump(&self.bytes_written, bytes);
    }

    pub fn on_remove(&self) {
        bump(&self.removals, 1);
    }

    pub fn on_touch(&self, recorded: bool) {
        bump(
            if recorded {
                &self.touches
            } else {
                &self.touches_throttled
            },
            1,
        );
    }

    pub fn on_index_flush(&self, ok: bool) {
        bump(
            if ok {
                &self.index_flushes
            } else {
                &self.index_flush_failures
            },
            1,
        );
    }

    pub fn on_cleanup(&self, evicted: u64, bytes: u64, elapsed_ms: u64) {
        bump(&self.cleanups, 1);
        bump(&self.evictions, evicted);
        bump(&self.bytes_evicted, bytes);
        self.last_cleanup_ms.store(elapsed_ms, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiskStoreStats {
        DiskStoreStats {
            hits: read(&self.hits),
            misses: read(&self.misses),
            writes: read(&self.writes),
            bytes_written: read(&self.bytes_written),
            removals: read(&self.removals),
            touches: read(&self.touches),
            touches_throttled: read(&self.touches_throttled),
            index_flushes: read(&self.index_flushes),
            index_flush_failures: read(&self.index_flush_failures),
            cleanups: read(&self.cleanups),
            evictions: read(&self.evictions),
            bytes_evicted: read(&self.bytes_evicted),
            last_cleanup_ms: read(&self.last_cleanup_ms),
        }
    }
}
