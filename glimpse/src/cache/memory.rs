//! In-memory cache of decoded images with LRU eviction.
//!
//! # Tiers
//!
//! ```text
//!  get(key)
//!     │
//!     ▼
//!  ┌──────────────────────┐  capacity eviction   ┌──────────────────────┐
//!  │ strong tier          │ ───────────────────► │ survivable tier      │
//!  │ byte-bounded LRU     │                      │ count-bounded LRU    │
//!  │ owns ImageHandle     │ ◄─────────────────── │ holds Weak handles   │
//!  └──────────────────────┘  promote if alive    └──────────────────────┘
//! ```
//!
//! The strong tier owns one reference to each image. Entries evicted for
//! capacity are remembered weakly: if a displayer still holds the image when
//! it is requested again, it is promoted back without decoding.

use std::num::NonZeroUsize;
use std::sync::{Arc, Weak};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::bitmap::{DecodedImage, ImageHandle};
use crate::cache::stats::CacheStats;
use crate::cache::types::{EvictionListener, EvictionReason};
use crate::key::CacheKey;

/// Default number of weak handles remembered after eviction.
pub const DEFAULT_SURVIVABLE_ENTRIES: usize = 64;

struct Entry {
    image: ImageHandle,
    size: usize,
}

type Evicted = Vec<(CacheKey, ImageHandle, EvictionReason)>;

struct MemoryState {
    strong: LruCache<CacheKey, Entry>,
    survivors: Option<LruCache<CacheKey, Weak<DecodedImage>>>,
    size_bytes: usize,
    stats: CacheStats,
}

impl MemoryState {
    fn remember(&mut self, key: &CacheKey, image: &ImageHandle) {
        if let Some(survivors) = self.survivors.as_mut() {
            survivors.put(key.clone(), Arc::downgrade(image));
        }
    }

    /// Insert without checking the entry against the whole capacity.
    fn insert(&mut self, key: CacheKey, image: ImageHandle, size: usize, max: usize) -> Evicted {
        let mut evicted = Vec::new();

        if let Some(previous) = self.strong.pop(&key) {
            self.size_bytes = self.size_bytes.saturating_sub(previous.size);
            evicted.push((key.clone(), previous.image, EvictionReason::Replaced));
        }

        while self.size_bytes + size > max {
            let Some((old_key, old)) = self.strong.pop_lru() else {
                break;
            };
            self.size_bytes = self.size_bytes.saturating_sub(old.size);
            self.remember(&old_key, &old.image);
            evicted.push((old_key, old.image, EvictionReason::Capacity));
        }

        if let Some(survivors) = self.survivors.as_mut() {
            survivors.pop(&key);
        }
        self.strong.put(key, Entry { image, size });
        self.size_bytes += size;

        let capacity_evictions = evicted
            .iter()
            .filter(|(_, _, reason)| *reason == EvictionReason::Capacity)
            .count() as u64;
        self.stats.record_memory_eviction(capacity_evictions);
        self.stats
            .update_memory_size(self.size_bytes, self.strong.len());
        evicted
    }
}

/// Byte-bounded LRU cache of decoded images.
///
/// All operations are serialized by one mutex. Eviction hooks run after the
/// lock is released.
pub struct MemoryCache {
    state: Mutex<MemoryState>,
    max_size_bytes: usize,
    listener: Option<Arc<dyn EvictionListener>>,
}

impl MemoryCache {
    /// Create a memory cache holding at most `max_size_bytes` of pixels.
    ///
    /// The survivable tier starts with [`DEFAULT_SURVIVABLE_ENTRIES`].
    pub fn new(max_size_bytes: usize) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                strong: LruCache::unbounded(),
                survivors: NonZeroUsize::new(DEFAULT_SURVIVABLE_ENTRIES).map(LruCache::new),
                size_bytes: 0,
                stats: CacheStats::new(),
            }),
            max_size_bytes,
            listener: None,
        }
    }

    /// Set how many evicted entries are remembered weakly. Zero disables
    /// the survivable tier.
    pub fn with_survivable_entries(self, entries: usize) -> Self {
        self.state.lock().survivors = NonZeroUsize::new(entries).map(LruCache::new);
        self
    }

    /// Install a hook notified whenever an entry is evicted.
    pub fn with_eviction_listener(mut self, listener: Arc<dyn EvictionListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Look up an image, promoting it to most recently used.
    pub fn get(&self, key: &CacheKey) -> Option<ImageHandle> {
        let (image, evicted) = {
            let mut state = self.state.lock();

            if let Some(entry) = state.strong.get(key) {
                let image = Arc::clone(&entry.image);
                state.stats.record_memory_hit();
                return Some(image);
            }

            let survivor = state
                .survivors
                .as_mut()
                .and_then(|survivors| survivors.pop(key))
                .and_then(|weak| weak.upgrade());

            match survivor {
                Some(image) => {
                    let size = image.byte_size();
                    state.stats.record_survivor_hit();
                    trace!(key = %key, size, "Promoting survivable entry");
                    let evicted = if size <= self.max_size_bytes {
                        state.insert(key.clone(), Arc::clone(&image), size, self.max_size_bytes)
                    } else {
                        Vec::new()
                    };
                    (image, evicted)
                }
                None => {
                    state.stats.record_memory_miss();
                    return None;
                }
            }
        };

        self.notify(evicted);
        Some(image)
    }

    /// Insert an image, evicting least recently used entries until it fits.
    ///
    /// The entry's size is the image's pixel footprint. An image larger than
    /// the whole capacity is not cached; any previous entry for the key is
    /// still dropped so stale pixels are never served.
    pub fn put(&self, key: CacheKey, image: ImageHandle) {
        let size = image.byte_size();

        let evicted = {
            let mut state = self.state.lock();
            if size > self.max_size_bytes {
                debug!(
                    key = %key,
                    size,
                    max_size = self.max_size_bytes,
                    "Image larger than memory cache, not caching"
                );
                let mut evicted = Vec::new();
                if let Some(previous) = state.strong.pop(&key) {
                    state.size_bytes = state.size_bytes.saturating_sub(previous.size);
                    let count = state.strong.len();
                    let bytes = state.size_bytes;
                    state.stats.update_memory_size(bytes, count);
                    evicted.push((key, previous.image, EvictionReason::Replaced));
                }
                evicted
            } else {
                state.insert(key, image, size, self.max_size_bytes)
            }
        };

        self.notify(evicted);
    }

    /// Remove an entry without invoking the eviction hook.
    pub fn remove(&self, key: &CacheKey) -> Option<ImageHandle> {
        let mut state = self.state.lock();
        if let Some(survivors) = state.survivors.as_mut() {
            survivors.pop(key);
        }
        let entry = state.strong.pop(key)?;
        state.size_bytes = state.size_bytes.saturating_sub(entry.size);
        let (bytes, count) = (state.size_bytes, state.strong.len());
        state.stats.update_memory_size(bytes, count);
        Some(entry.image)
    }

    /// Remove the entry for `key` only if it still holds exactly `image`.
    ///
    /// Used to roll back an insert whose request was cancelled before the
    /// outcome could be delivered.
    pub fn remove_entry(&self, key: &CacheKey, image: &ImageHandle) -> bool {
        let mut state = self.state.lock();
        let matches = state
            .strong
            .peek(key)
            .is_some_and(|entry| Arc::ptr_eq(&entry.image, image));
        if !matches {
            return false;
        }
        if let Some(entry) = state.strong.pop(key) {
            state.size_bytes = state.size_bytes.saturating_sub(entry.size);
        }
        let (bytes, count) = (state.size_bytes, state.strong.len());
        state.stats.update_memory_size(bytes, count);
        true
    }

    /// Drop every entry, both tiers.
    pub fn clear(&self) {
        let evicted: Evicted = {
            let mut state = self.state.lock();
            let mut evicted = Vec::with_capacity(state.strong.len());
            while let Some((key, entry)) = state.strong.pop_lru() {
                evicted.push((key, entry.image, EvictionReason::Cleared));
            }
            if let Some(survivors) = state.survivors.as_mut() {
                survivors.clear();
            }
            state.size_bytes = 0;
            state.stats.update_memory_size(0, 0);
            evicted
        };

        if !evicted.is_empty() {
            debug!(entries = evicted.len(), "Memory cache cleared");
        }
        self.notify(evicted);
    }

    /// Evict least recently used entries until at most `target_bytes` remain.
    ///
    /// Returns the number of entries evicted.
    pub fn trim_to_size(&self, target_bytes: usize) -> usize {
        let evicted: Evicted = {
            let mut state = self.state.lock();
            let mut evicted = Vec::new();
            while state.size_bytes > target_bytes {
                let Some((key, entry)) = state.strong.pop_lru() else {
                    break;
                };
                state.size_bytes = state.size_bytes.saturating_sub(entry.size);
                state.remember(&key, &entry.image);
                evicted.push((key, entry.image, EvictionReason::Capacity));
            }
            let (bytes, count) = (state.size_bytes, state.strong.len());
            state.stats.record_memory_eviction(evicted.len() as u64);
            state.stats.update_memory_size(bytes, count);
            evicted
        };

        let count = evicted.len();
        self.notify(evicted);
        count
    }

    /// Returns true if the key is resident in the strong tier.
    ///
    /// Does not affect recency.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.state.lock().strong.contains(key)
    }

    pub fn entry_count(&self) -> usize {
        self.state.lock().strong.len()
    }

    /// Summed byte size of resident entries.
    pub fn size_bytes(&self) -> usize {
        self.state.lock().size_bytes
    }

    pub fn max_size_bytes(&self) -> usize {
        self.max_size_bytes
    }

    /// Number of weak handles currently remembered (live or not).
    pub fn survivor_count(&self) -> usize {
        self.state
            .lock()
            .survivors
            .as_ref()
            .map_or(0, LruCache::len)
    }

    pub fn stats(&self) -> CacheStats {
        self.state.lock().stats.clone()
    }

    fn notify(&self, evicted: Evicted) {
        let Some(listener) = &self.listener else {
            return;
        };
        for (key, image, reason) in &evicted {
            listener.on_evicted(key, image, *reason);
        }
    }
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("max_size_bytes", &self.max_size_bytes)
            .field("size_bytes", &self.size_bytes())
            .field("entries", &self.entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::{PixelBuffer, PixelFormat};

    fn create_test_key(id: u32) -> CacheKey {
        CacheKey::from_raw(format!("img:{}#0x0@alpha8", id))
    }

    /// Alpha8 image occupying exactly `bytes` bytes.
    fn image(bytes: u32) -> ImageHandle {
        DecodedImage::new(PixelBuffer::allocate(bytes, 1, PixelFormat::Alpha8)).into_handle()
    }

    #[derive(Default)]
    struct RecordingListener {
        events: Mutex<Vec<(CacheKey, EvictionReason)>>,
    }

    impl EvictionListener for RecordingListener {
        fn on_evicted(&self, key: &CacheKey, _image: &ImageHandle, reason: EvictionReason) {
            self.events.lock().push((key.clone(), reason));
        }
    }

    #[test]
    fn test_memory_cache_new() {
        let cache = MemoryCache::new(1_000_000);
        assert_eq!(cache.max_size_bytes(), 1_000_000);
        assert_eq!(cache.entry_count(), 0);
        assert_eq!(cache.size_bytes(), 0);
    }

    #[test]
    fn test_memory_cache_put_and_get() {
        let cache = MemoryCache::new(1_000_000);
        let key = create_test_key(1);
        let stored = image(100);

        cache.put(key.clone(), Arc::clone(&stored));

        let retrieved = cache.get(&key).unwrap();
        assert!(Arc::ptr_eq(&retrieved, &stored));
        assert_eq!(cache.entry_count(), 1);
        assert_eq!(cache.size_bytes(), 100);
    }

    #[test]
    fn test_memory_cache_miss() {
        let cache = MemoryCache::new(1_000_000);
        assert!(cache.get(&create_test_key(1)).is_none());
        assert!(cache.remove(&create_test_key(1)).is_none());
        assert_eq!(cache.stats().memory_misses, 1);
    }

    #[test]
    fn test_memory_cache_lru_eviction() {
        let cache = MemoryCache::new(2500);

        cache.put(create_test_key(1), image(1000));
        cache.put(create_test_key(2), image(1000));
        cache.put(create_test_key(3), image(1000));

        assert!(!cache.contains(&create_test_key(1)), "Oldest entry should be evicted");
        assert!(cache.contains(&create_test_key(2)));
        assert!(cache.contains(&create_test_key(3)));
        assert_eq!(cache.size_bytes(), 2000);
    }

    #[test]
    fn test_memory_cache_access_updates_lru() {
        let cache = MemoryCache::new(2500);

        cache.put(create_test_key(1), image(1000));
        cache.put(create_test_key(2), image(1000));
        cache.get(&create_test_key(1));
        cache.put(create_test_key(3), image(1000));

        assert!(cache.contains(&create_test_key(1)), "Accessed entry should remain");
        assert!(!cache.contains(&create_test_key(2)));
        assert!(cache.contains(&create_test_key(3)));
    }

    #[test]
    fn test_memory_cache_evicts_until_fit() {
        let cache = MemoryCache::new(3000);
        for id in 1..=3 {
            cache.put(create_test_key(id), image(1000));
        }

        cache.put(create_test_key(4), image(2500));

        assert_eq!(cache.entry_count(), 1);
        assert!(cache.contains(&create_test_key(4)));
        assert!(cache.size_bytes() <= cache.max_size_bytes());
        assert_eq!(cache.stats().memory_evictions, 3);
    }

    #[test]
    fn test_memory_cache_never_exceeds_capacity() {
        let cache = MemoryCache::new(5000);
        for id in 0..200u32 {
            cache.put(create_test_key(id % 17), image(100 + (id * 37) % 900));
            if id % 3 == 0 {
                cache.get(&create_test_key(id % 5));
            }
            assert!(cache.size_bytes() <= cache.max_size_bytes());
        }
    }

    #[test]
    fn test_memory_cache_oversize_entry_not_inserted() {
        let cache = MemoryCache::new(1000);
        cache.put(create_test_key(1), image(500));
        cache.put(create_test_key(2), image(1001));

        assert!(!cache.contains(&create_test_key(2)));
        assert!(cache.contains(&create_test_key(1)), "Nothing evicted for a rejected entry");
    }

    #[test]
    fn test_memory_cache_zero_size_counts_as_one() {
        let cache = MemoryCache::new(1000);
        let empty = DecodedImage::new(PixelBuffer::allocate(0, 0, PixelFormat::Alpha8)).into_handle();
        cache.put(create_test_key(1), empty);
        assert_eq!(cache.size_bytes(), 1);
    }

    #[test]
    fn test_memory_cache_replace_existing() {
        let listener = Arc::new(RecordingListener::default());
        let cache = MemoryCache::new(1_000_000).with_eviction_listener(listener.clone());
        let key = create_test_key(1);

        cache.put(key.clone(), image(100));
        cache.put(key.clone(), image(300));

        assert_eq!(cache.entry_count(), 1);
        assert_eq!(cache.size_bytes(), 300);
        assert_eq!(
            listener.events.lock().as_slice(),
            &[(key, EvictionReason::Replaced)]
        );
    }

    #[test]
    fn test_eviction_hook_reasons() {
        let listener = Arc::new(RecordingListener::default());
        let cache = MemoryCache::new(1500).with_eviction_listener(listener.clone());

        cache.put(create_test_key(1), image(1000));
        cache.put(create_test_key(2), image(1000));
        cache.remove(&create_test_key(2));
        cache.put(create_test_key(3), image(1000));
        cache.clear();

        let events = listener.events.lock().clone();
        assert_eq!(
            events,
            vec![
                (create_test_key(1), EvictionReason::Capacity),
                (create_test_key(3), EvictionReason::Cleared),
            ]
        );
    }

    #[test]
    fn test_eviction_hook_may_reenter_cache() {
        struct Reentrant(Mutex<Option<Weak<MemoryCache>>>);

        impl EvictionListener for Reentrant {
            fn on_evicted(&self, _key: &CacheKey, _image: &ImageHandle, _reason: EvictionReason) {
                if let Some(cache) = self.0.lock().as_ref().and_then(Weak::upgrade) {
                    let _ = cache.size_bytes();
                }
            }
        }

        let hook = Arc::new(Reentrant(Mutex::new(None)));
        let cache = Arc::new(MemoryCache::new(100).with_eviction_listener(hook.clone()));
        *hook.0.lock() = Some(Arc::downgrade(&cache));

        cache.put(create_test_key(1), image(100));
        cache.put(create_test_key(2), image(100));
        assert_eq!(cache.entry_count(), 1);
    }

    #[test]
    fn test_survivable_entry_is_promoted_while_displayed() {
        let cache = MemoryCache::new(1000);
        let displayed = image(1000);

        cache.put(create_test_key(1), Arc::clone(&displayed));
        cache.put(create_test_key(2), image(1000));
        assert!(!cache.contains(&create_test_key(1)));

        let promoted = cache.get(&create_test_key(1)).unwrap();
        assert!(Arc::ptr_eq(&promoted, &displayed));
        assert!(cache.contains(&create_test_key(1)));
        assert!(!cache.contains(&create_test_key(2)));
        assert_eq!(cache.stats().memory_survivor_hits, 1);
    }

    #[test]
    fn test_released_survivor_is_a_miss() {
        let cache = MemoryCache::new(1000);

        cache.put(create_test_key(1), image(1000));
        cache.put(create_test_key(2), image(1000));

        assert!(cache.get(&create_test_key(1)).is_none());
        assert_eq!(cache.survivor_count(), 0, "Dead weak handle dropped on lookup");
    }

    #[test]
    fn test_survivable_tier_disabled() {
        let cache = MemoryCache::new(1000).with_survivable_entries(0);
        let displayed = image(1000);

        cache.put(create_test_key(1), Arc::clone(&displayed));
        cache.put(create_test_key(2), image(1000));

        assert!(cache.get(&create_test_key(1)).is_none());
    }

    #[test]
    fn test_trim_to_size() {
        let cache = MemoryCache::new(10_000);
        for id in 1..=4 {
            cache.put(create_test_key(id), image(1000));
        }

        assert_eq!(cache.trim_to_size(2000), 2);
        assert_eq!(cache.size_bytes(), 2000);
        assert!(cache.contains(&create_test_key(4)));
        assert!(!cache.contains(&create_test_key(1)));
    }

    #[test]
    fn test_remove_entry_only_matching_image() {
        let cache = MemoryCache::new(10_000);
        let key = create_test_key(1);
        let first = image(100);
        let second = image(100);

        cache.put(key.clone(), Arc::clone(&second));

        assert!(!cache.remove_entry(&key, &first));
        assert!(cache.contains(&key));
        assert!(cache.remove_entry(&key, &second));
        assert!(!cache.contains(&key));
        assert_eq!(cache.size_bytes(), 0);
    }

    #[test]
    fn test_memory_cache_statistics() {
        let cache = MemoryCache::new(1_000_000);
        let key = create_test_key(1);
        cache.put(key.clone(), image(5000));

        cache.get(&key);
        cache.get(&key);
        cache.get(&create_test_key(2));

        let stats = cache.stats();
        assert_eq!(stats.memory_hits, 2);
        assert_eq!(stats.memory_misses, 1);
        assert_eq!(stats.memory_size_bytes, 5000);
        assert_eq!(stats.memory_entry_count, 1);
    }
}
