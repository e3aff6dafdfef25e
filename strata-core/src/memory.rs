//! Bounded, recency-ordered memory tier.

use std::time::Instant;

use lru::LruCache;
use parking_lot::Mutex;

use crate::cached_image::CachedImage;

#[derive(Debug)]
struct MemoryEntry {
    image: CachedImage,
    format: String,
    last_access: Instant,
}

#[derive(Debug)]
struct MemoryState {
    /// Zero means unbounded.
    capacity: usize,
    items: LruCache<String, MemoryEntry>,
}

impl MemoryState {
    /// Drop least-recently-used items until one more insert fits.
    fn make_room(&mut self) -> usize {
        let mut evicted = 0usize;
        if self.capacity == 0 {
            return evicted;
        }
        while self.items.len() >= self.capacity {
            if self.items.pop_lru().is_none() {
                break;
            }
            evicted += 1;
        }
        evicted
    }
}

/// Key→image store ordered by recency, least-recently-used first.
///
/// Identity is the key alone: storing a key again replaces the previous item
/// whatever format it belonged to. Each call is a single critical section, so
/// the cache can be shared freely between the delivery thread, the blocking
/// pool and low-memory handlers.
#[derive(Debug)]
pub struct MemoryCache {
    state: Mutex<MemoryState>,
}

impl MemoryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                capacity,
                items: LruCache::unbounded(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    /// Change the item limit, evicting least-recently-used items right away
    /// when shrinking.
    pub fn set_capacity(&self, capacity: usize) {
        let mut state = self.state.lock();
        state.capacity = capacity;
        if capacity > 0 {
            while state.items.len() > capacity {
                state.items.pop_lru();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Membership test that leaves the recency order alone.
    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().items.contains(key)
    }

    /// Insert `image` as the most recently used item, replacing any item with
    /// the same key. The count never exceeds a non-zero capacity.
    pub fn set(&self, key: &str, image: CachedImage, format: &str) {
        let mut state = self.state.lock();
        state.items.pop(key);
        let evicted = state.make_room();
        state.items.put(
            key.to_owned(),
            MemoryEntry {
                image,
                format: format.to_owned(),
                last_access: Instant::now(),
            },
        );
        drop(state);

        if evicted > 0 {
            tracing::trace!(
                key,
                format,
                evicted,
                "memory tier evicted LRU items"
            );
        }
    }

    /// Look up `key` and promote it to most recently used. Misses leave the
    /// order untouched.
    pub fn get(&self, key: &str) -> Option<CachedImage> {
        let mut state = self.state.lock();
        let entry = state.items.get_mut(key)?;
        entry.last_access = Instant::now();
        Some(entry.image.clone())
    }

    /// Like [`MemoryCache::get`], but an item cached under another format is a
    /// miss and is not promoted.
    pub fn get_for_format(
        &self,
        key: &str,
        format: &str,
    ) -> Option<CachedImage> {
        let mut state = self.state.lock();
        match state.items.peek(key) {
            Some(entry) if entry.format == format => {}
            _ => return None,
        }
        let entry = state.items.get_mut(key)?;
        entry.last_access = Instant::now();
        Some(entry.image.clone())
    }

    /// Format `key` is currently cached under, without promoting it.
    pub fn format_of(&self, key: &str) -> Option<String> {
        self.state
            .lock()
            .items
            .peek(key)
            .map(|entry| entry.format.clone())
    }

    pub fn remove(&self, key: &str) {
        self.state.lock().items.pop(key);
    }

    /// Remove `key` only if it is currently stored under `format`.
    pub fn remove_for_format(&self, key: &str, format: &str) -> bool {
        let mut state = self.state.lock();
        match state.items.peek(key) {
            Some(entry) if entry.format == format => {
                state.items.pop(key);
                true
            }
            _ => false,
        }
    }

    /// Remove every item stored under `format`.
    pub fn remove_format(&self, format: &str) -> usize {
        let mut state = self.state.lock();
        let doomed: Vec<String> = state
            .items
            .iter()
            .filter(|(_, entry)| entry.format == format)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            state.items.pop(key);
        }
        doomed.len()
    }

    pub fn remove_all(&self) -> usize {
        let mut state = self.state.lock();
        let removed = state.items.len();
        state.items.clear();
        removed
    }

    /// Keys ordered most recently used first.
    pub fn keys(&self) -> Vec<String> {
        self.state
            .lock()
            .items
            .iter()
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// When `key` was last stored or read, if present.
    pub fn last_access(&self, key: &str) -> Option<Instant> {
        self.state
            .lock()
            .items
            .peek(key)
            .map(|entry| entry.last_access)
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryCache;
    use crate::cached_image::CachedImage;
    use image::{Rgba, RgbaImage};

    fn pixel(value: u8) -> CachedImage {
        CachedImage::from_rgba(RgbaImage::from_pixel(1, 1, Rgba([value; 4])))
    }

    fn value_of(image: &CachedImage) -> u8 {
        image.as_dynamic().as_bytes()[0]
    }

    #[test]
    fn count_never_exceeds_capacity_and_lru_is_evicted() {
        let cache = MemoryCache::new(3);
        for (i, key) in ["a", "b", "c", "d", "e"].iter().enumerate() {
            cache.set(key, pixel(i as u8), "thumb");
            assert!(cache.len() <= 3);
        }
        assert_eq!(cache.keys(), vec!["e", "d", "c"]);
    }

    #[test]
    fn hit_promotes_and_miss_does_not_reorder() {
        let cache = MemoryCache::new(3);
        cache.set("a", pixel(1), "thumb");
        cache.set("b", pixel(2), "thumb");
        cache.set("c", pixel(3), "thumb");

        assert!(cache.get("a").is_some());
        assert_eq!(cache.keys(), vec!["a", "c", "b"]);

        assert!(cache.get("zzz").is_none());
        assert_eq!(cache.keys(), vec!["a", "c", "b"]);

        // "b" is now the least recently used and goes first.
        cache.set("d", pixel(4), "thumb");
        assert!(!cache.contains("b"));
        assert_eq!(cache.keys(), vec!["d", "a", "c"]);
    }

    #[test]
    fn set_replaces_existing_key_without_evicting_others() {
        let cache = MemoryCache::new(2);
        cache.set("k", pixel(1), "thumb");
        cache.set("other", pixel(9), "thumb");
        let first_access = cache.last_access("k").unwrap();

        cache.set("k", pixel(2), "poster");

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.keys(), vec!["k", "other"]);
        assert_eq!(value_of(&cache.get("k").unwrap()), 2);
        assert!(cache.get_for_format("k", "poster").is_some());
        assert!(cache.last_access("k").unwrap() >= first_access);
    }

    #[test]
    fn format_mismatch_is_a_miss_without_promotion() {
        let cache = MemoryCache::new(0);
        cache.set("a", pixel(1), "thumb");
        cache.set("b", pixel(2), "thumb");

        assert!(cache.get_for_format("a", "poster").is_none());
        assert_eq!(cache.keys(), vec!["b", "a"]);

        assert!(cache.get_for_format("a", "thumb").is_some());
        assert_eq!(cache.keys(), vec!["a", "b"]);
    }

    #[test]
    fn zero_capacity_is_unbounded() {
        let cache = MemoryCache::new(0);
        for i in 0..500u32 {
            cache.set(&i.to_string(), pixel(0), "thumb");
        }
        assert_eq!(cache.len(), 500);
    }

    #[test]
    fn remove_format_leaves_other_formats_alone() {
        let cache = MemoryCache::new(0);
        cache.set("a", pixel(1), "thumb");
        cache.set("b", pixel(2), "poster");
        cache.set("c", pixel(3), "thumb");

        assert!(!cache.remove_for_format("b", "thumb"));
        assert_eq!(cache.remove_format("thumb"), 2);
        assert_eq!(cache.keys(), vec!["b"]);

        cache.remove("b");
        assert!(cache.is_empty());
    }

    #[test]
    fn shrinking_capacity_trims_lru_items() {
        let cache = MemoryCache::new(0);
        for key in ["a", "b", "c", "d"] {
            cache.set(key, pixel(0), "thumb");
        }
        cache.set_capacity(2);
        assert_eq!(cache.keys(), vec!["d", "c"]);
        assert_eq!(cache.remove_all(), 2);
    }
}
