//! INI serialization logic for converting `ConfigFile` → INI string.
//!
//! Produces the commented INI representation written to `config.ini`.

use std::path::Path;

use super::settings::ConfigFile;
use super::size::format_size;

/// Convert a `ConfigFile` to a commented INI string for saving.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    let cache = &config.cache;
    let fallback_dir = cache
        .disk_cache_fallback_dir
        .as_deref()
        .map(path_to_string)
        .unwrap_or_default();

    format!(
        r#"[cache]
; Directory holding downloaded image bytes, one file per key
disk_cache_dir = {}
; Used when disk_cache_dir cannot be created (leave empty to disable)
disk_cache_fallback_dir = {}
; Free space to keep on the cache volume; oldest entries are deleted to keep it
; Supports: KB, MB, GB suffixes
disk_reserve_bytes = {}
; Decoded images kept in memory (default: 1/8 of RAM)
memory_cache_max_bytes = {}
; Disk entries older than this are dropped on access (0 = never)
disk_entry_ttl_millis = {}
; Evicted images still remembered while displayed elsewhere (0 = disabled)
survivable_entries = {}
; Idle pixel buffers kept for reuse (default: 1/4 of memory_cache_max_bytes)
buffer_pool_max_bytes = {}
; Reuse pixel buffers between decodes
buffer_reuse = {}

[network]
; Extra attempts after a timeout
max_retry_count = {}
; Seconds to wait for a response and for each body chunk
fetch_timeout_secs = {}

[executor]
; Concurrent network fetches
network_pool_size = {}
; Concurrent disk probes and local file reads
local_pool_size = {}
; Jobs queued per pool; the oldest is discarded when full
queue_capacity = {}

[logging]
; Log file directory
directory = {}
; Default filter when RUST_LOG is not set (error, warn, info, debug, trace)
level = {}
"#,
        path_to_string(&cache.disk_cache_dir),
        fallback_dir,
        format_size(cache.disk_reserve_bytes),
        format_size(cache.memory_cache_max_bytes),
        cache.disk_entry_ttl_millis,
        cache.survivable_entries,
        format_size(cache.buffer_pool_max_bytes),
        cache.buffer_reuse,
        config.network.max_retry_count,
        config.network.fetch_timeout_secs,
        config.executor.network_pool_size,
        config.executor.local_pool_size,
        config.executor.queue_capacity,
        path_to_string(&config.logging.directory),
        config.logging.level,
    )
}

/// Render a path, abbreviating the home directory as `~`.
fn path_to_string(path: &Path) -> String {
    if let Some(home) = dirs::home_dir() {
        if let Ok(stripped) = path.strip_prefix(&home) {
            return format!("~/{}", stripped.display());
        }
    }
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_saved_config_loads_back() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.ini");

        let mut config = ConfigFile::default();
        config.cache.disk_cache_dir = PathBuf::from("/srv/glimpse");
        config.cache.memory_cache_max_bytes = 128 * 1024 * 1024;
        config.cache.buffer_reuse = false;
        config.executor.queue_capacity = 32;
        config.logging.level = "debug".to_string();

        config.save_to(&config_path).unwrap();
        let loaded = ConfigFile::load_from(&config_path).unwrap();

        assert_eq!(loaded.cache.disk_cache_dir, PathBuf::from("/srv/glimpse"));
        assert_eq!(loaded.cache.memory_cache_max_bytes, 128 * 1024 * 1024);
        assert!(!loaded.cache.buffer_reuse);
        assert_eq!(loaded.executor.queue_capacity, 32);
        assert_eq!(loaded.logging.level, "debug");
    }

    #[test]
    fn test_sizes_written_human_readable() {
        let content = to_config_string(&ConfigFile::default());
        assert!(content.contains("disk_reserve_bytes = 20MB"));
        assert!(content.contains("[executor]"));
    }

    #[test]
    fn test_path_to_string_abbreviates_home() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(path_to_string(&home.join("cache")), "~/cache");
        }
        assert_eq!(path_to_string(Path::new("/opt/x")), "/opt/x");
    }
}
