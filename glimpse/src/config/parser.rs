//! INI parsing logic for converting `Ini` → `ConfigFile`.
//!
//! This is the single place where INI key names are mapped to struct
//! fields. Empty values keep the default.

use std::path::PathBuf;
use std::str::FromStr;

use ini::{Ini, Properties};

use super::file::ConfigFileError;
use super::settings::ConfigFile;
use super::size::parse_size;

const SIZE_HINT: &str = "expected format like '20MB', '2GB', or '512KB'";

/// Parse an `Ini` object into a `ConfigFile`.
///
/// Starts from `ConfigFile::default()` and overlays any values found.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [cache] section
    if let Some(section) = ini.section(Some("cache")) {
        let fields = Fields::new("cache", section);
        let cache = &mut config.cache;

        if let Some(v) = fields.get("disk_cache_dir") {
            cache.disk_cache_dir = expand_tilde(v);
        }
        if let Some(v) = section.get("disk_cache_fallback_dir") {
            // An explicitly empty value disables the fallback
            let v = v.trim();
            cache.disk_cache_fallback_dir = (!v.is_empty()).then(|| expand_tilde(v));
        }
        if let Some(v) = fields.size("disk_reserve_bytes")? {
            cache.disk_reserve_bytes = v;
        }
        if let Some(v) = fields.size("memory_cache_max_bytes")? {
            cache.memory_cache_max_bytes = v;
        }
        if let Some(v) = fields.number("disk_entry_ttl_millis", "must be milliseconds (0 = never)")? {
            cache.disk_entry_ttl_millis = v;
        }
        if let Some(v) = fields.number("survivable_entries", "must be a whole number (0 = disabled)")? {
            cache.survivable_entries = v;
        }
        if let Some(v) = fields.size("buffer_pool_max_bytes")? {
            cache.buffer_pool_max_bytes = v;
        }
        if let Some(v) = fields.boolean("buffer_reuse")? {
            cache.buffer_reuse = v;
        }
    }

    // [network] section
    if let Some(section) = ini.section(Some("network")) {
        let fields = Fields::new("network", section);

        if let Some(v) = fields.number("max_retry_count", "must be a whole number")? {
            config.network.max_retry_count = v;
        }
        if let Some(v) = fields.positive("fetch_timeout_secs", "must be a positive integer (seconds)")? {
            config.network.fetch_timeout_secs = v;
        }
    }

    // [executor] section
    if let Some(section) = ini.section(Some("executor")) {
        let fields = Fields::new("executor", section);

        if let Some(v) = fields.positive("network_pool_size", "must be at least 1")? {
            config.executor.network_pool_size = v;
        }
        if let Some(v) = fields.positive("local_pool_size", "must be at least 1")? {
            config.executor.local_pool_size = v;
        }
        if let Some(v) = fields.positive("queue_capacity", "must be at least 1")? {
            config.executor.queue_capacity = v;
        }
    }

    // [logging] section
    if let Some(section) = ini.section(Some("logging")) {
        let fields = Fields::new("logging", section);

        if let Some(v) = fields.get("directory") {
            config.logging.directory = expand_tilde(v);
        }
        if let Some(v) = fields.get("level") {
            config.logging.level = v.to_string();
        }
    }

    Ok(config)
}

/// Typed accessors over one INI section.
struct Fields<'a> {
    section: &'static str,
    properties: &'a Properties,
}

impl<'a> Fields<'a> {
    fn new(section: &'static str, properties: &'a Properties) -> Self {
        Self {
            section,
            properties,
        }
    }

    /// Trimmed value, or `None` when missing or empty.
    fn get(&self, key: &str) -> Option<&'a str> {
        self.properties
            .get(key)
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    fn invalid(&self, key: &str, value: &str, reason: &str) -> ConfigFileError {
        ConfigFileError::InvalidValue {
            section: self.section.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }

    fn size(&self, key: &str) -> Result<Option<usize>, ConfigFileError> {
        self.get(key)
            .map(|v| parse_size(v).map_err(|_| self.invalid(key, v, SIZE_HINT)))
            .transpose()
    }

    fn number<T: FromStr>(&self, key: &str, reason: &str) -> Result<Option<T>, ConfigFileError> {
        self.get(key)
            .map(|v| v.parse().map_err(|_| self.invalid(key, v, reason)))
            .transpose()
    }

    fn positive<T>(&self, key: &str, reason: &str) -> Result<Option<T>, ConfigFileError>
    where
        T: FromStr + PartialOrd + Default,
    {
        match self.number::<T>(key, reason)? {
            Some(v) if v <= T::default() => {
                Err(self.invalid(key, self.get(key).unwrap_or_default(), reason))
            }
            other => Ok(other),
        }
    }

    fn boolean(&self, key: &str) -> Result<Option<bool>, ConfigFileError> {
        self.get(key)
            .map(|v| match v.to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Ok(true),
                "false" | "no" | "off" | "0" => Ok(false),
                _ => Err(self.invalid(key, v, "must be true or false")),
            })
            .transpose()
    }
}

/// Expand a leading `~/` to the home directory.
pub(super) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}
