//! Core types shared by the cache tiers.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use thiserror::Error;

use crate::bitmap::ImageHandle;
use crate::key::CacheKey;

/// Why an entry left the memory cache.
///
/// Explicit `remove` calls do not produce a reason; the caller already
/// holds the removed handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvictionReason {
    /// Evicted as least recently used to make room
    Capacity,
    /// Overwritten by a `put` for the same key
    Replaced,
    /// Dropped by `clear`
    Cleared,
}

/// Hook notified when the memory cache lets go of an entry.
///
/// Called outside the cache lock, so implementations may call back into the
/// cache.
pub trait EvictionListener: Send + Sync {
    fn on_evicted(&self, key: &CacheKey, image: &ImageHandle, reason: EvictionReason);
}

/// Metadata for a committed disk cache file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskCacheEntry {
    /// Key the file was stored under
    pub key: CacheKey,
    /// Absolute path of the committed file
    pub path: PathBuf,
    /// Last activity time (used as recency)
    pub modified: SystemTime,
    /// File length in bytes
    pub len: u64,
}

/// Default free space kept on the cache volume (20 MiB).
pub const DEFAULT_DISK_RESERVE_BYTES: u64 = 20 * 1024 * 1024;

/// Disk cache configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskCacheConfig {
    /// Preferred cache directory
    pub directory: PathBuf,
    /// Directory tried when the preferred one cannot be created
    pub fallback_directory: Option<PathBuf>,
    /// Bytes that must stay free on the backing volume
    pub reserve_bytes: u64,
    /// Entries older than this are dropped on access (None = never)
    pub entry_ttl: Option<Duration>,
}

impl Default for DiskCacheConfig {
    fn default() -> Self {
        let directory = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("glimpse");

        Self {
            directory,
            fallback_directory: Some(std::env::temp_dir().join("glimpse-cache")),
            reserve_bytes: DEFAULT_DISK_RESERVE_BYTES,
            entry_ttl: None,
        }
    }
}

impl DiskCacheConfig {
    /// Create a configuration for the given directory with default policy.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Self::default()
        }
    }

    pub fn with_fallback_directory(mut self, directory: Option<PathBuf>) -> Self {
        self.fallback_directory = directory;
        self
    }

    pub fn with_reserve_bytes(mut self, bytes: u64) -> Self {
        self.reserve_bytes = bytes;
        self
    }

    /// Set the entry time-to-live. A zero duration disables expiry.
    pub fn with_entry_ttl(mut self, ttl: Duration) -> Self {
        self.entry_ttl = (!ttl.is_zero()).then_some(ttl);
        self
    }
}

/// Disk cache failures.
///
/// Never surfaced to request listeners; the disk tier logs them and
/// degrades to a miss.
#[derive(Debug, Error)]
pub enum DiskCacheError {
    /// Neither the primary nor the fallback directory could be created
    #[error("Disk cache unavailable: {0}")]
    Unavailable(String),

    /// I/O error while reading or writing a cache file
    #[error("Disk cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking sweep task panicked or was cancelled
    #[error("Disk cache task failed: {0}")]
    Task(String),
}
