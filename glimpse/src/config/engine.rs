//! Runtime configuration for [`CacheEngine`](crate::engine::CacheEngine).

use std::path::PathBuf;
use std::time::Duration;

use crate::cache::{DiskCacheConfig, DEFAULT_SURVIVABLE_ENTRIES};
use crate::engine::EngineError;
use crate::executor::ExecutorConfig;
use crate::pipeline::PipelineConfig;
use crate::system::{default_buffer_pool_bytes, default_memory_cache_bytes};

/// Everything needed to build a cache engine.
///
/// # Example
///
/// ```
/// use glimpse::config::EngineConfig;
/// use std::time::Duration;
///
/// let config = EngineConfig::default()
///     .with_disk_cache_dir("/tmp/glimpse-doc")
///     .with_memory_cache_max_bytes(64 * 1024 * 1024)
///     .with_network_workers(8)
///     .with_fetch_timeout(Duration::from_secs(5));
///
/// assert_eq!(config.executor.network_workers, 8);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Disk cache directory, reserve and TTL
    pub disk: DiskCacheConfig,
    /// Memory cache capacity in bytes
    pub memory_cache_max_bytes: usize,
    /// Evicted entries remembered weakly
    pub survivable_entries: usize,
    /// Buffer pool capacity in bytes
    pub buffer_pool_max_bytes: usize,
    /// Reuse pixel buffers between decodes
    pub buffer_reuse: bool,
    /// Worker pool sizes
    pub executor: ExecutorConfig,
    /// Retry and timeout policy
    pub pipeline: PipelineConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            disk: DiskCacheConfig::default(),
            memory_cache_max_bytes: default_memory_cache_bytes(),
            survivable_entries: DEFAULT_SURVIVABLE_ENTRIES,
            buffer_pool_max_bytes: default_buffer_pool_bytes(),
            buffer_reuse: true,
            executor: ExecutorConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_disk_cache_dir(mut self, directory: impl Into<PathBuf>) -> Self {
        self.disk.directory = directory.into();
        self
    }

    pub fn with_disk_cache_fallback_dir(mut self, directory: Option<PathBuf>) -> Self {
        self.disk = self.disk.with_fallback_directory(directory);
        self
    }

    pub fn with_disk_reserve_bytes(mut self, bytes: u64) -> Self {
        self.disk = self.disk.with_reserve_bytes(bytes);
        self
    }

    /// Zero disables expiry.
    pub fn with_disk_entry_ttl(mut self, ttl: Duration) -> Self {
        self.disk = self.disk.with_entry_ttl(ttl);
        self
    }

    pub fn with_memory_cache_max_bytes(mut self, bytes: usize) -> Self {
        self.memory_cache_max_bytes = bytes;
        self
    }

    pub fn with_survivable_entries(mut self, entries: usize) -> Self {
        self.survivable_entries = entries;
        self
    }

    pub fn with_buffer_pool_max_bytes(mut self, bytes: usize) -> Self {
        self.buffer_pool_max_bytes = bytes;
        self
    }

    pub fn with_buffer_reuse(mut self, enabled: bool) -> Self {
        self.buffer_reuse = enabled;
        self
    }

    pub fn with_network_workers(mut self, workers: usize) -> Self {
        self.executor = self.executor.with_network_workers(workers);
        self
    }

    pub fn with_local_workers(mut self, workers: usize) -> Self {
        self.executor = self.executor.with_local_workers(workers);
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.executor = self.executor.with_queue_capacity(capacity);
        self
    }

    pub fn with_max_retry_count(mut self, retries: u32) -> Self {
        self.pipeline.max_retry_count = retries;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.pipeline.fetch_timeout = timeout;
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.pipeline.retry_base_delay = delay;
        self
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), EngineError> {
        let invalid = |field: &'static str, reason: &str| {
            Err(EngineError::InvalidConfig {
                field,
                reason: reason.to_string(),
            })
        };

        if self.executor.network_workers == 0 {
            return invalid("network_pool_size", "must be at least 1");
        }
        if self.executor.local_workers == 0 {
            return invalid("local_pool_size", "must be at least 1");
        }
        if self.executor.queue_capacity == 0 {
            return invalid("queue_capacity", "must be at least 1");
        }
        if self.pipeline.fetch_timeout.is_zero() {
            return invalid("fetch_timeout_secs", "must be greater than zero");
        }
        if self.disk.directory.as_os_str().is_empty() {
            return invalid("disk_cache_dir", "must not be empty");
        }
        Ok(())
    }
}
