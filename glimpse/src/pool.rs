//! Reuse pool for decode-target buffers.
//!
//! Decoding large images allocates large buffers. Released images hand their
//! [`PixelBuffer`] back here, and the next decode of a similar size borrows
//! it instead of allocating.
//!
//! # Matching Strategy
//!
//! Buffers are bucketed by byte capacity. A request for `w × h × bpp` bytes
//! is served from the smallest bucket whose capacity is at least that large.
//! Any pooled buffer big enough for a request is eligible; picking the
//! smallest one keeps the larger buffers for larger decodes.
//!
//! # Accounting
//!
//! The pool holds at most `max_size_bytes` of idle capacity. Returning a
//! buffer evicts the least recently returned buffers until it fits.

use std::collections::{BTreeMap, VecDeque};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::bitmap::{PixelBuffer, PixelFormat};

/// Counters for pool effectiveness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// `get` calls served from the pool
    pub hits: u64,
    /// `get` calls that fell back to fresh allocation
    pub misses: u64,
    /// Buffers accepted by `put`
    pub puts: u64,
    /// Buffers dropped to stay within budget (or rejected as oversize)
    pub evictions: u64,
}

impl PoolStats {
    /// Fraction of `get` calls served from the pool (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct PoolState {
    /// capacity -> buffers of that capacity, oldest return first
    buckets: BTreeMap<usize, VecDeque<(u64, PixelBuffer)>>,
    /// return sequence -> capacity, for least-recently-returned eviction
    order: BTreeMap<u64, usize>,
    next_seq: u64,
    size_bytes: usize,
    stats: PoolStats,
}

impl PoolState {
    fn new() -> Self {
        Self {
            buckets: BTreeMap::new(),
            order: BTreeMap::new(),
            next_seq: 0,
            size_bytes: 0,
            stats: PoolStats::default(),
        }
    }

    fn len(&self) -> usize {
        self.order.len()
    }

    fn pop_oldest(&mut self) -> Option<PixelBuffer> {
        let (&seq, &capacity) = self.order.iter().next()?;
        self.order.remove(&seq);

        let bucket = self.buckets.get_mut(&capacity)?;
        let position = bucket.iter().position(|(s, _)| *s == seq)?;
        let (_, buffer) = bucket.remove(position)?;
        if bucket.is_empty() {
            self.buckets.remove(&capacity);
        }
        self.size_bytes = self.size_bytes.saturating_sub(capacity);
        Some(buffer)
    }

    fn take_fitting(&mut self, required: usize) -> Option<PixelBuffer> {
        let capacity = *self.buckets.range(required..).next()?.0;

        let bucket = self.buckets.get_mut(&capacity)?;
        let (seq, buffer) = bucket.pop_back()?;
        if bucket.is_empty() {
            self.buckets.remove(&capacity);
        }
        self.order.remove(&seq);
        self.size_bytes = self.size_bytes.saturating_sub(capacity);
        Some(buffer)
    }

    fn insert(&mut self, buffer: PixelBuffer) {
        let capacity = buffer.capacity();
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, capacity);
        self.buckets
            .entry(capacity)
            .or_default()
            .push_back((seq, buffer));
        self.size_bytes += capacity;
    }
}

/// Size-bucketed, byte-budgeted pool of [`PixelBuffer`]s.
///
/// Buffers move in and out by value, so a buffer is never visible to two
/// decodes at once.
pub struct BufferPool {
    state: Mutex<PoolState>,
    max_size_bytes: usize,
    enabled: bool,
}

impl BufferPool {
    /// Create a pool holding at most `max_size_bytes` of idle buffers.
    ///
    /// With `enabled = false` the pool never hands out buffers and drops
    /// everything returned to it, for decode paths that cannot safely write
    /// into a recycled allocation.
    pub fn new(max_size_bytes: usize, enabled: bool) -> Self {
        Self {
            state: Mutex::new(PoolState::new()),
            max_size_bytes,
            enabled,
        }
    }

    /// Borrow a buffer able to hold a `width × height` image in `format`.
    ///
    /// The returned buffer is already reconfigured to the requested shape.
    /// `None` means the caller allocates fresh.
    pub fn get(&self, width: u32, height: u32, format: PixelFormat) -> Option<PixelBuffer> {
        let mut state = self.state.lock();
        if !self.enabled {
            state.stats.misses += 1;
            return None;
        }

        let required = format.bytes_for(width, height);
        match state.take_fitting(required) {
            Some(mut buffer) => {
                state.stats.hits += 1;
                // take_fitting only returns buffers with capacity >= required
                buffer.reconfigure(width, height, format);
                trace!(
                    width,
                    height,
                    format = %format,
                    capacity = buffer.capacity(),
                    "Reusing pooled buffer"
                );
                Some(buffer)
            }
            None => {
                state.stats.misses += 1;
                None
            }
        }
    }

    /// Return a buffer to the pool.
    pub fn put(&self, buffer: PixelBuffer) {
        if !self.enabled {
            return;
        }

        let capacity = buffer.capacity();
        let mut state = self.state.lock();
        if capacity == 0 || capacity > self.max_size_bytes {
            state.stats.evictions += 1;
            trace!(capacity, "Dropping buffer that cannot be pooled");
            return;
        }

        let mut evicted = 0u64;
        while state.size_bytes + capacity > self.max_size_bytes {
            if state.pop_oldest().is_none() {
                break;
            }
            evicted += 1;
        }
        state.insert(buffer);
        state.stats.puts += 1;
        state.stats.evictions += evicted;

        if evicted > 0 {
            debug!(
                evicted,
                pool_bytes = state.size_bytes,
                "Buffer pool evicted oldest buffers"
            );
        }
    }

    /// Remove the least recently returned buffer.
    pub fn remove_last(&self) -> Option<PixelBuffer> {
        self.state.lock().pop_oldest()
    }

    /// Evict least recently returned buffers until at most `target_bytes`
    /// remain pooled.
    pub fn trim_to_size(&self, target_bytes: usize) -> usize {
        let mut state = self.state.lock();
        let mut evicted = 0;
        while state.size_bytes > target_bytes {
            if state.pop_oldest().is_none() {
                break;
            }
            evicted += 1;
        }
        state.stats.evictions += evicted as u64;
        evicted
    }

    /// Drop every pooled buffer.
    pub fn clear(&self) {
        self.trim_to_size(0);
    }

    /// Bytes of idle capacity currently pooled.
    pub fn size_bytes(&self) -> usize {
        self.state.lock().size_bytes
    }

    pub fn max_size_bytes(&self) -> usize {
        self.max_size_bytes
    }

    /// Number of pooled buffers.
    pub fn len(&self) -> usize {
        self.state.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn stats(&self) -> PoolStats {
        self.state.lock().stats
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("max_size_bytes", &self.max_size_bytes)
            .field("size_bytes", &self.size_bytes())
            .field("enabled", &self.enabled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(width: u32, height: u32) -> PixelBuffer {
        PixelBuffer::allocate(width, height, PixelFormat::Rgba8888)
    }

    #[test]
    fn test_empty_pool_misses() {
        let pool = BufferPool::new(1_000_000, true);
        assert!(pool.get(10, 10, PixelFormat::Rgba8888).is_none());
        assert_eq!(pool.stats().misses, 1);
    }

    #[test]
    fn test_returned_buffer_is_reused() {
        let pool = BufferPool::new(1_000_000, true);
        pool.put(buffer(10, 10));

        let reused = pool.get(10, 10, PixelFormat::Rgba8888).unwrap();
        assert_eq!(reused.capacity(), 400);
        assert!(pool.is_empty());
        assert_eq!(pool.size_bytes(), 0);
        assert_eq!(pool.stats().hits, 1);
    }

    #[test]
    fn test_smallest_sufficient_bucket_wins() {
        let pool = BufferPool::new(1_000_000, true);
        pool.put(buffer(20, 20)); // 1600
        pool.put(buffer(12, 10)); // 480
        pool.put(buffer(5, 5)); // 100

        let reused = pool.get(10, 10, PixelFormat::Rgba8888).unwrap(); // needs 400
        assert_eq!(reused.capacity(), 480);
        assert_eq!(reused.width(), 10);
        assert_eq!(reused.height(), 10);
    }

    #[test]
    fn test_never_returns_smaller_buffer() {
        let pool = BufferPool::new(1_000_000, true);
        pool.put(buffer(9, 10)); // 360, one row short

        assert!(pool.get(10, 10, PixelFormat::Rgba8888).is_none());
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_capacity_not_dimensions_decides_fit() {
        let pool = BufferPool::new(1_000_000, true);
        pool.put(buffer(10, 10)); // 400 bytes

        // 20x10 in RGB565 is also 400 bytes
        let reused = pool.get(20, 10, PixelFormat::Rgb565).unwrap();
        assert_eq!(reused.format(), PixelFormat::Rgb565);
        assert_eq!(reused.used_bytes(), 400);
    }

    #[test]
    fn test_much_larger_buffer_still_serves_small_request() {
        let pool = BufferPool::new(10_000_000, true);
        pool.put(buffer(100, 100)); // 40_000

        // needs 3_600
        let reused = pool.get(30, 30, PixelFormat::Rgba8888).unwrap();
        assert_eq!(reused.capacity(), 40_000);
        assert_eq!(reused.width(), 30);
        assert_eq!(reused.used_bytes(), 3_600);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_put_evicts_least_recently_returned() {
        let pool = BufferPool::new(1000, true);
        pool.put(buffer(10, 10)); // 400, oldest
        pool.put(buffer(5, 10)); // 200
        pool.put(buffer(10, 10)); // 400 -> 1000 total
        pool.put(buffer(5, 5)); // 100 -> evicts oldest 400

        assert_eq!(pool.size_bytes(), 700);
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.stats().evictions, 1);
    }

    #[test]
    fn test_buffer_larger_than_budget_is_dropped() {
        let pool = BufferPool::new(100, true);
        pool.put(buffer(10, 10));
        assert!(pool.is_empty());
        assert_eq!(pool.stats().evictions, 1);
    }

    #[test]
    fn test_remove_last_returns_oldest() {
        let pool = BufferPool::new(1_000_000, true);
        pool.put(buffer(1, 1));
        pool.put(buffer(2, 2));
        pool.put(buffer(3, 3));

        assert_eq!(pool.remove_last().unwrap().capacity(), 4);
        assert_eq!(pool.remove_last().unwrap().capacity(), 16);
        assert_eq!(pool.remove_last().unwrap().capacity(), 36);
        assert!(pool.remove_last().is_none());
    }

    #[test]
    fn test_trim_and_clear() {
        let pool = BufferPool::new(1_000_000, true);
        for side in 1..=4 {
            pool.put(buffer(side, side));
        }
        assert_eq!(pool.size_bytes(), 4 + 16 + 36 + 64);

        let evicted = pool.trim_to_size(100);
        assert_eq!(evicted, 2);
        assert_eq!(pool.size_bytes(), 100);

        pool.clear();
        assert!(pool.is_empty());
    }

    #[test]
    fn test_disabled_pool_never_reuses() {
        let pool = BufferPool::new(1_000_000, false);
        pool.put(buffer(10, 10));
        assert!(pool.is_empty());
        assert!(pool.get(10, 10, PixelFormat::Rgba8888).is_none());
        assert!(!pool.is_enabled());
    }

    #[test]
    fn test_hit_rate() {
        let pool = BufferPool::new(1_000_000, true);
        pool.put(buffer(10, 10));
        pool.get(10, 10, PixelFormat::Rgba8888);
        pool.get(10, 10, PixelFormat::Rgba8888);
        assert!((pool.stats().hit_rate() - 0.5).abs() < f64::EPSILON);
    }
}
