//! Default values for configuration settings.
//!
//! Values owned by a component are re-stated here in the units the config
//! file uses.

use std::path::PathBuf;

use crate::cache::DiskCacheConfig;

/// Default reserve kept free on the disk cache volume: 20 MB.
pub const DEFAULT_DISK_RESERVE_BYTES: usize = crate::cache::DEFAULT_DISK_RESERVE_BYTES as usize;

/// Default disk entry time to live; zero means entries never expire.
pub const DEFAULT_DISK_ENTRY_TTL_MILLIS: u64 = 0;

/// Default survivable (weakly held) memory entries.
pub const DEFAULT_SURVIVABLE_ENTRIES: usize = crate::cache::DEFAULT_SURVIVABLE_ENTRIES;

/// Default buffer reuse switch.
pub const DEFAULT_BUFFER_REUSE: bool = true;

/// Default extra attempts after a fetch timeout.
pub const DEFAULT_MAX_RETRY_COUNT: u32 = crate::pipeline::DEFAULT_MAX_RETRY_COUNT;

/// Default fetch timeout in seconds.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = crate::pipeline::DEFAULT_FETCH_TIMEOUT.as_secs();

/// Default concurrent network fetches.
pub const DEFAULT_NETWORK_POOL_SIZE: usize = crate::executor::DEFAULT_NETWORK_WORKERS;

/// Default concurrent local file operations.
pub const DEFAULT_LOCAL_POOL_SIZE: usize = crate::executor::DEFAULT_LOCAL_WORKERS;

/// Default queued jobs per pool.
pub const DEFAULT_QUEUE_CAPACITY: usize = crate::executor::DEFAULT_QUEUE_CAPACITY;

/// Default log level when `RUST_LOG` is unset.
pub const DEFAULT_LOG_LEVEL: &str = crate::logging::DEFAULT_LOG_LEVEL;

/// Default disk cache directory (platform cache dir + `glimpse`).
pub fn default_disk_cache_dir() -> PathBuf {
    DiskCacheConfig::default().directory
}

/// Default fallback directory used when the primary cannot be created.
pub fn default_disk_cache_fallback_dir() -> Option<PathBuf> {
    DiskCacheConfig::default().fallback_directory
}
