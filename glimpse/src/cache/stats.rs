//! Counters recorded by the cache tiers and the fetch stage.
//!
//! The memory cache, the disk cache and the pipeline each keep their own
//! [`CacheStats`]; the engine merges the three snapshots when asked.

use std::fmt;

const MIB: f64 = 1024.0 * 1024.0;

/// Counters for one tier, or for all of them after [`merge`](Self::merge).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub memory_hits: u64,
    pub memory_misses: u64,
    /// Subset of `memory_hits` served by promoting a survivable entry
    pub memory_survivor_hits: u64,
    pub memory_size_bytes: usize,
    pub memory_entry_count: usize,
    pub memory_evictions: u64,

    pub disk_hits: u64,
    pub disk_misses: u64,
    /// Entries deleted on access for outliving the TTL
    pub disk_expired: u64,
    /// Files deleted to make room
    pub disk_evictions: u64,
    pub disk_bytes_evicted: u64,
    /// Staged downloads published into the cache
    pub disk_writes: u64,
    pub disk_write_failures: u64,

    pub downloads: u64,
    pub download_failures: u64,
    /// Extra attempts after a timeout
    pub download_retries: u64,
    pub bytes_downloaded: u64,
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share of memory lookups that found a decoded image.
    pub fn memory_hit_rate(&self) -> f64 {
        ratio(self.memory_hits, self.memory_hits + self.memory_misses)
    }

    /// Share of disk probes that found committed bytes.
    pub fn disk_hit_rate(&self) -> f64 {
        ratio(self.disk_hits, self.disk_hits + self.disk_misses)
    }

    /// Share of loads answered by either tier without touching the network.
    ///
    /// A disk miss is the only lookup that ends in a fetch.
    pub fn overall_hit_rate(&self) -> f64 {
        let served = self.memory_hits + self.disk_hits;
        ratio(served, served + self.disk_misses)
    }

    pub fn record_memory_hit(&mut self) {
        self.memory_hits += 1;
    }

    pub fn record_memory_miss(&mut self) {
        self.memory_misses += 1;
    }

    /// A hit on a weakly held entry; counts toward `memory_hits` as well.
    pub fn record_survivor_hit(&mut self) {
        self.record_memory_hit();
        self.memory_survivor_hits += 1;
    }

    pub fn record_memory_eviction(&mut self, count: u64) {
        self.memory_evictions += count;
    }

    pub fn update_memory_size(&mut self, size_bytes: usize, entry_count: usize) {
        self.memory_size_bytes = size_bytes;
        self.memory_entry_count = entry_count;
    }

    pub fn record_disk_hit(&mut self) {
        self.disk_hits += 1;
    }

    pub fn record_disk_miss(&mut self) {
        self.disk_misses += 1;
    }

    pub fn record_disk_expired(&mut self) {
        self.disk_expired += 1;
    }

    pub fn record_disk_eviction(&mut self, count: u64, bytes: u64) {
        self.disk_evictions += count;
        self.disk_bytes_evicted += bytes;
    }

    pub fn record_disk_write(&mut self) {
        self.disk_writes += 1;
    }

    pub fn record_disk_write_failure(&mut self) {
        self.disk_write_failures += 1;
    }

    pub fn record_download(&mut self, bytes: u64) {
        self.downloads += 1;
        self.bytes_downloaded += bytes;
    }

    pub fn record_download_failure(&mut self) {
        self.download_failures += 1;
    }

    pub fn record_download_retry(&mut self) {
        self.download_retries += 1;
    }

    /// Add another snapshot's counters into this one.
    ///
    /// Sizes add too: each tier only ever reports its own.
    pub fn merge(&mut self, other: &CacheStats) {
        let CacheStats {
            memory_hits,
            memory_misses,
            memory_survivor_hits,
            memory_size_bytes,
            memory_entry_count,
            memory_evictions,
            disk_hits,
            disk_misses,
            disk_expired,
            disk_evictions,
            disk_bytes_evicted,
            disk_writes,
            disk_write_failures,
            downloads,
            download_failures,
            download_retries,
            bytes_downloaded,
        } = other;

        self.memory_hits += memory_hits;
        self.memory_misses += memory_misses;
        self.memory_survivor_hits += memory_survivor_hits;
        self.memory_size_bytes += memory_size_bytes;
        self.memory_entry_count += memory_entry_count;
        self.memory_evictions += memory_evictions;
        self.disk_hits += disk_hits;
        self.disk_misses += disk_misses;
        self.disk_expired += disk_expired;
        self.disk_evictions += disk_evictions;
        self.disk_bytes_evicted += disk_bytes_evicted;
        self.disk_writes += disk_writes;
        self.disk_write_failures += disk_write_failures;
        self.downloads += downloads;
        self.download_failures += download_failures;
        self.download_retries += download_retries;
        self.bytes_downloaded += bytes_downloaded;
    }

    /// Multi-line report, as printed by the CLI.
    pub fn format(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn percent(rate: f64) -> String {
            format!("{:.1}%", rate * 100.0)
        }
        fn mib(bytes: u64) -> String {
            format!("{:.2} MiB", bytes as f64 / MIB)
        }

        writeln!(f, "Memory")?;
        writeln!(
            f,
            "  {:<12}{} ({})",
            "Images:",
            self.memory_entry_count,
            mib(self.memory_size_bytes as u64)
        )?;
        writeln!(
            f,
            "  {:<12}{} hits ({} revived) / {} misses, {}",
            "Lookups:",
            self.memory_hits,
            self.memory_survivor_hits,
            self.memory_misses,
            percent(self.memory_hit_rate())
        )?;
        writeln!(f, "  {:<12}{}", "Evicted:", self.memory_evictions)?;

        writeln!(f, "Disk")?;
        writeln!(
            f,
            "  {:<12}{} hits / {} misses, {}",
            "Probes:",
            self.disk_hits,
            self.disk_misses,
            percent(self.disk_hit_rate())
        )?;
        writeln!(
            f,
            "  {:<12}{} committed, {} failed",
            "Writes:",
            self.disk_writes,
            self.disk_write_failures
        )?;
        writeln!(
            f,
            "  {:<12}{} files ({}), {} expired",
            "Evicted:",
            self.disk_evictions,
            mib(self.disk_bytes_evicted),
            self.disk_expired
        )?;

        writeln!(f, "Network")?;
        writeln!(
            f,
            "  {:<12}{} ({}), {} failed, {} retries",
            "Fetched:",
            self.downloads,
            mib(self.bytes_downloaded),
            self.download_failures,
            self.download_retries
        )?;

        writeln!(f, "Served from cache: {}", percent(self.overall_hit_rate()))
    }
}
