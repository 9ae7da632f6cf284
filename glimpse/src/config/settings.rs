//! Settings structs for all configuration sections.
//!
//! Each struct represents one `[section]` of the INI config file.
//! These are pure data types with no parsing or serialization logic.

use std::path::PathBuf;
use std::time::Duration;

use super::defaults::*;
use super::EngineConfig;
use crate::logging::default_log_dir;
use crate::system::{default_buffer_pool_bytes, default_memory_cache_bytes};

/// Complete configuration loaded from config.ini.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    /// Cache settings
    pub cache: CacheSettings,
    /// Network fetch settings
    pub network: NetworkSettings,
    /// Worker pool settings
    pub executor: ExecutorSettings,
    /// Logging settings
    pub logging: LoggingSettings,
}

/// Memory cache, disk cache and buffer pool configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// Disk cache directory
    pub disk_cache_dir: PathBuf,
    /// Used when `disk_cache_dir` cannot be created
    pub disk_cache_fallback_dir: Option<PathBuf>,
    /// Free space kept on the disk cache volume
    pub disk_reserve_bytes: usize,
    /// Memory cache capacity
    pub memory_cache_max_bytes: usize,
    /// Disk entry time to live (0 = never expires)
    pub disk_entry_ttl_millis: u64,
    /// Evicted entries remembered weakly (0 = disabled)
    pub survivable_entries: usize,
    /// Buffer pool capacity
    pub buffer_pool_max_bytes: usize,
    /// Reuse pixel buffers between decodes
    pub buffer_reuse: bool,
}

/// Network fetch configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSettings {
    /// Extra attempts after a timeout
    pub max_retry_count: u32,
    /// Connect and per-chunk read timeout
    pub fetch_timeout_secs: u64,
}

/// Worker pool configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorSettings {
    /// Concurrent network fetches
    pub network_pool_size: usize,
    /// Concurrent local file operations
    pub local_pool_size: usize,
    /// Queued jobs per pool before the oldest is discarded
    pub queue_capacity: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    /// Log directory
    pub directory: PathBuf,
    /// Filter used when `RUST_LOG` is unset
    pub level: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            disk_cache_dir: default_disk_cache_dir(),
            disk_cache_fallback_dir: default_disk_cache_fallback_dir(),
            disk_reserve_bytes: DEFAULT_DISK_RESERVE_BYTES,
            memory_cache_max_bytes: default_memory_cache_bytes(),
            disk_entry_ttl_millis: DEFAULT_DISK_ENTRY_TTL_MILLIS,
            survivable_entries: DEFAULT_SURVIVABLE_ENTRIES,
            buffer_pool_max_bytes: default_buffer_pool_bytes(),
            buffer_reuse: DEFAULT_BUFFER_REUSE,
        }
    }
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            max_retry_count: DEFAULT_MAX_RETRY_COUNT,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
        }
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            network_pool_size: DEFAULT_NETWORK_POOL_SIZE,
            local_pool_size: DEFAULT_LOCAL_POOL_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: default_log_dir(),
            level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            cache: CacheSettings::default(),
            network: NetworkSettings::default(),
            executor: ExecutorSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl ConfigFile {
    /// Build the engine configuration these settings describe.
    pub fn to_engine_config(&self) -> EngineConfig {
        let cache = &self.cache;
        EngineConfig::default()
            .with_disk_cache_dir(cache.disk_cache_dir.clone())
            .with_disk_cache_fallback_dir(cache.disk_cache_fallback_dir.clone())
            .with_disk_reserve_bytes(cache.disk_reserve_bytes as u64)
            .with_disk_entry_ttl(Duration::from_millis(cache.disk_entry_ttl_millis))
            .with_memory_cache_max_bytes(cache.memory_cache_max_bytes)
            .with_survivable_entries(cache.survivable_entries)
            .with_buffer_pool_max_bytes(cache.buffer_pool_max_bytes)
            .with_buffer_reuse(cache.buffer_reuse)
            .with_max_retry_count(self.network.max_retry_count)
            .with_fetch_timeout(Duration::from_secs(self.network.fetch_timeout_secs))
            .with_network_workers(self.executor.network_pool_size)
            .with_local_workers(self.executor.local_pool_size)
            .with_queue_capacity(self.executor.queue_capacity)
    }
}
