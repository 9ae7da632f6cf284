//! On-disk cache of encoded image bytes.
//!
//! # Layout
//!
//! A flat directory of files named by [`CacheKey::file_name`]. There is no
//! index or journal; the file system is the index.
//!
//! ```text
//! <cache_dir>/
//!   3f9a...c1.img        committed entry
//!   77b0...9e.img.part   staging file of a write in progress
//! ```
//!
//! # Recency
//!
//! Every successful read bumps the file's mtime, so sorting by mtime
//! approximates LRU. Space is reclaimed on demand by
//! [`DiskCache::apply_for_space`], which deletes the oldest files until the
//! request fits while keeping a reserve free on the volume.
//!
//! # Failure Model
//!
//! Nothing here fails a load. An unavailable directory, a full volume or an
//! I/O error is logged and reported as a miss (`None` / `false`).

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use dashmap::DashMap;
use filetime::FileTime;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex as AsyncMutex, OnceCell, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::cache::stats::CacheStats;
use crate::cache::types::{DiskCacheConfig, DiskCacheEntry, DiskCacheError};
use crate::key::{CacheKey, CACHE_FILE_EXTENSION};

/// Suffix appended to a committed file name while it is being written.
pub const STAGING_EXTENSION: &str = "part";

/// Source of free-space figures for the cache volume.
pub trait SpaceProbe: Send + Sync {
    /// Bytes available to this process on the volume holding `dir`.
    fn available_bytes(&self, dir: &Path) -> io::Result<u64>;
}

/// Reads free space from the file system.
#[derive(Debug, Clone, Copy, Default)]
pub struct VolumeSpace;

impl SpaceProbe for VolumeSpace {
    fn available_bytes(&self, dir: &Path) -> io::Result<u64> {
        fs2::available_space(dir)
    }
}

/// Result of a space reclamation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpaceReclaim {
    /// Whether the requested bytes now fit above the reserve
    pub granted: bool,
    /// Number of files deleted
    pub files_deleted: usize,
    /// Total bytes freed
    pub bytes_freed: u64,
}

/// File count and byte total of committed entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskUsage {
    pub files: usize,
    pub bytes: u64,
}

type LockMap = DashMap<String, Arc<AsyncMutex<()>>>;

/// Reference-counted arena of per-key write locks.
///
/// A key's lock exists only while someone holds or waits for it; the last
/// guard to drop removes it from the arena.
#[derive(Default)]
struct KeyLocks {
    locks: Arc<LockMap>,
}

impl KeyLocks {
    async fn acquire(&self, name: &str) -> KeyLockGuard {
        let lock = Arc::clone(self.locks.entry(name.to_string()).or_default().value());
        let guard = lock.lock_owned().await;
        KeyLockGuard {
            name: name.to_string(),
            guard: Some(guard),
            locks: Arc::clone(&self.locks),
        }
    }

    fn len(&self) -> usize {
        self.locks.len()
    }
}

struct KeyLockGuard {
    name: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockMap>,
}

impl Drop for KeyLockGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold their own clone, so a count of one means only the
        // arena references the lock.
        self.locks
            .remove_if(&self.name, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Exclusive staging file for one key.
///
/// Holds the key's write lock until it is committed, discarded or dropped.
/// Dropping an uncommitted target deletes its staging file.
pub struct WriteTarget {
    key: CacheKey,
    staging_path: PathBuf,
    final_path: PathBuf,
    file: Option<tokio::fs::File>,
    written: u64,
    finished: bool,
    stats: Arc<Mutex<CacheStats>>,
    _lock: KeyLockGuard,
}

impl WriteTarget {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Bytes written to the staging file so far.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Append a chunk to the staging file.
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "write target closed"))?;
        if let Err(e) = file.write_all(chunk).await {
            self.stats.lock().record_disk_write_failure();
            return Err(e);
        }
        self.written += chunk.len() as u64;
        Ok(())
    }

    /// Publish the staged file under its final name.
    ///
    /// Consumes the target. Returns `None` (and removes the staging file) if
    /// publishing fails.
    pub async fn commit(mut self) -> Option<DiskCacheEntry> {
        self.finished = true;
        match self.publish().await {
            Ok(entry) => {
                self.stats.lock().record_disk_write();
                debug!(key = %self.key, bytes = entry.len, "Disk cache entry committed");
                Some(entry)
            }
            Err(e) => {
                self.stats.lock().record_disk_write_failure();
                warn!(key = %self.key, error = %e, "Failed to commit disk cache entry");
                let _ = tokio::fs::remove_file(&self.staging_path).await;
                None
            }
        }
    }

    /// Abandon the write and delete the staging file.
    pub async fn discard(mut self) {
        self.finished = true;
        drop(self.file.take());
        if let Err(e) = tokio::fs::remove_file(&self.staging_path).await {
            if e.kind() != io::ErrorKind::NotFound {
                debug!(path = %self.staging_path.display(), error = %e, "Failed to remove staging file");
            }
        }
    }

    async fn publish(&mut self) -> io::Result<DiskCacheEntry> {
        let mut file = self
            .file
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "write target closed"))?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&self.staging_path, &self.final_path).await?;
        let modified = touch(self.final_path.clone()).await?;
        let len = tokio::fs::metadata(&self.final_path).await?.len();

        Ok(DiskCacheEntry {
            key: self.key.clone(),
            path: self.final_path.clone(),
            modified,
            len,
        })
    }
}

impl Drop for WriteTarget {
    fn drop(&mut self) {
        if !self.finished {
            drop(self.file.take());
            let _ = std::fs::remove_file(&self.staging_path);
        }
    }
}

impl std::fmt::Debug for WriteTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteTarget")
            .field("key", &self.key)
            .field("staging_path", &self.staging_path)
            .field("written", &self.written)
            .finish()
    }
}

/// Flat-directory disk cache with mtime-based LRU.
pub struct DiskCache {
    config: DiskCacheConfig,
    directory: OnceCell<Option<PathBuf>>,
    probe: Arc<dyn SpaceProbe>,
    locks: KeyLocks,
    sweep_lock: AsyncMutex<()>,
    stats: Arc<Mutex<CacheStats>>,
}

impl DiskCache {
    /// Create a disk cache. The directory is not touched until first use.
    pub fn new(config: DiskCacheConfig) -> Self {
        Self {
            config,
            directory: OnceCell::new(),
            probe: Arc::new(VolumeSpace),
            locks: KeyLocks::default(),
            sweep_lock: AsyncMutex::new(()),
            stats: Arc::new(Mutex::new(CacheStats::new())),
        }
    }

    /// Replace the free-space probe.
    pub fn with_space_probe(mut self, probe: Arc<dyn SpaceProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn config(&self) -> &DiskCacheConfig {
        &self.config
    }

    /// Resolve the backing directory, creating it on first call.
    ///
    /// Returns `None` if neither the preferred nor the fallback directory
    /// can be created; the result is remembered for the cache's lifetime.
    pub async fn directory(&self) -> Option<&Path> {
        self.directory
            .get_or_init(|| resolve_directory(&self.config))
            .await
            .as_deref()
    }

    /// Returns true once the directory has been resolved and is usable.
    pub async fn is_available(&self) -> bool {
        self.directory().await.is_some()
    }

    /// Look up the committed entry for a key and mark it as recently used.
    ///
    /// Expired entries are deleted and reported as a miss.
    pub async fn entry_for(&self, key: &CacheKey) -> Option<DiskCacheEntry> {
        let Some(dir) = self.directory().await else {
            self.stats.lock().record_disk_miss();
            return None;
        };
        let path = dir.join(key.file_name());

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => {
                self.stats.lock().record_disk_miss();
                return None;
            }
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(key = %key, error = %e, "Failed to stat disk cache entry");
                }
                self.stats.lock().record_disk_miss();
                return None;
            }
        };

        if let Some(ttl) = self.config.entry_ttl {
            if is_expired(&metadata, ttl) {
                debug!(key = %key, ttl_ms = ttl.as_millis() as u64, "Disk cache entry expired");
                self.remove(key).await;
                let mut stats = self.stats.lock();
                stats.record_disk_expired();
                stats.record_disk_miss();
                return None;
            }
        }

        let modified = match touch(path.clone()).await {
            Ok(now) => now,
            Err(e) => {
                // Still a usable entry; its recency just did not move.
                debug!(key = %key, error = %e, "Failed to touch disk cache entry");
                metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH)
            }
        };

        self.stats.lock().record_disk_hit();
        Some(DiskCacheEntry {
            key: key.clone(),
            path,
            modified,
            len: metadata.len(),
        })
    }

    /// Read a committed entry's bytes.
    pub async fn read_entry(&self, entry: &DiskCacheEntry) -> Option<Vec<u8>> {
        match tokio::fs::read(&entry.path).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(key = %entry.key, error = %e, "Failed to read disk cache entry");
                None
            }
        }
    }

    /// Look up and read a key's bytes in one step.
    pub async fn read(&self, key: &CacheKey) -> Option<Vec<u8>> {
        let entry = self.entry_for(key).await?;
        self.read_entry(&entry).await
    }

    /// Open an exclusive staging file for a key.
    ///
    /// Waits for any other writer of the same key to finish. Returns `None`
    /// if the cache is unavailable or the file cannot be created.
    pub async fn create_write_target(&self, key: &CacheKey) -> Option<WriteTarget> {
        let dir = self.directory().await?;
        let file_name = key.file_name();
        let final_path = dir.join(&file_name);
        let staging_path = dir.join(format!("{}.{}", file_name, STAGING_EXTENSION));

        let lock = self.locks.acquire(&file_name).await;

        match tokio::fs::File::create(&staging_path).await {
            Ok(file) => Some(WriteTarget {
                key: key.clone(),
                staging_path,
                final_path,
                file: Some(file),
                written: 0,
                finished: false,
                stats: Arc::clone(&self.stats),
                _lock: lock,
            }),
            Err(e) => {
                self.stats.lock().record_disk_write_failure();
                warn!(key = %key, error = %e, "Failed to create disk cache staging file");
                None
            }
        }
    }

    /// Delete a key's committed file. Returns true if a file was removed.
    pub async fn remove(&self, key: &CacheKey) -> bool {
        let Some(dir) = self.directory().await else {
            return false;
        };
        let file_name = key.file_name();
        let _lock = self.locks.acquire(&file_name).await;

        match tokio::fs::remove_file(dir.join(&file_name)).await {
            Ok(()) => true,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(key = %key, error = %e, "Failed to remove disk cache entry");
                }
                false
            }
        }
    }

    /// Make room for `required_bytes`, deleting oldest entries if needed.
    ///
    /// Returns false if the cache is unavailable or the space cannot be
    /// found even after deleting every entry.
    pub async fn apply_for_space(&self, required_bytes: u64) -> bool {
        self.reclaim_space(required_bytes)
            .await
            .is_some_and(|reclaim| reclaim.granted)
    }

    /// Like [`apply_for_space`](Self::apply_for_space), reporting what was
    /// deleted.
    pub async fn reclaim_space(&self, required_bytes: u64) -> Option<SpaceReclaim> {
        let dir = self.directory().await?.to_path_buf();
        let _sweep = self.sweep_lock.lock().await;

        let probe = Arc::clone(&self.probe);
        let reserve = self.config.reserve_bytes;
        let result = tokio::task::spawn_blocking(move || {
            reclaim_blocking(&dir, probe.as_ref(), reserve, required_bytes)
        })
        .await
        .map_err(|e| DiskCacheError::Task(e.to_string()))
        .and_then(|result| result);

        match result {
            Ok(reclaim) => {
                if reclaim.files_deleted > 0 {
                    self.stats
                        .lock()
                        .record_disk_eviction(reclaim.files_deleted as u64, reclaim.bytes_freed);
                }
                if !reclaim.granted {
                    warn!(
                        required_bytes,
                        reserve_bytes = reserve,
                        files_deleted = reclaim.files_deleted,
                        "Disk cache could not make room"
                    );
                }
                Some(reclaim)
            }
            Err(e) => {
                warn!(error = %e, "Disk cache space check failed");
                None
            }
        }
    }

    /// Delete every committed entry. Returns the number of files removed.
    ///
    /// Staging files of writes in progress are left alone.
    pub async fn clear(&self) -> usize {
        let Some(dir) = self.directory().await.map(Path::to_path_buf) else {
            return 0;
        };
        let _sweep = self.sweep_lock.lock().await;
        let start = Instant::now();

        let deleted = tokio::task::spawn_blocking(move || {
            let mut deleted = 0usize;
            for (path, _, _) in collect_cache_files(&dir) {
                if std::fs::remove_file(&path).is_ok() {
                    deleted += 1;
                }
            }
            deleted
        })
        .await
        .unwrap_or_default();

        info!(
            files_deleted = deleted,
            duration_ms = start.elapsed().as_millis() as u64,
            "Disk cache cleared"
        );
        deleted
    }

    /// Count committed entries and their total size.
    pub async fn usage(&self) -> DiskUsage {
        let Some(dir) = self.directory().await.map(Path::to_path_buf) else {
            return DiskUsage::default();
        };
        tokio::task::spawn_blocking(move || {
            let files = collect_cache_files(&dir);
            DiskUsage {
                files: files.len(),
                bytes: files.iter().map(|(_, _, size)| size).sum(),
            }
        })
        .await
        .unwrap_or_default()
    }

    /// Number of keys with a write lock held or awaited.
    pub fn active_writers(&self) -> usize {
        self.locks.len()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.lock().clone()
    }
}

impl std::fmt::Debug for DiskCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskCache")
            .field("config", &self.config)
            .field("directory", &self.directory.get())
            .finish()
    }
}

async fn resolve_directory(config: &DiskCacheConfig) -> Option<PathBuf> {
    let candidates = std::iter::once(&config.directory).chain(config.fallback_directory.as_ref());

    for dir in candidates {
        match tokio::fs::create_dir_all(dir).await {
            Ok(()) => {
                info!(cache_dir = %dir.display(), "Disk cache directory ready");
                return Some(dir.clone());
            }
            Err(e) => {
                warn!(
                    cache_dir = %dir.display(),
                    error = %e,
                    "Failed to create disk cache directory"
                );
            }
        }
    }

    warn!("Disk cache unavailable, continuing without it");
    None
}

/// Set a file's mtime to now.
async fn touch(path: PathBuf) -> io::Result<SystemTime> {
    tokio::task::spawn_blocking(move || {
        let now = SystemTime::now();
        filetime::set_file_mtime(&path, FileTime::from_system_time(now))?;
        Ok::<_, io::Error>(now)
    })
    .await
    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
}

/// Age is measured from creation when the platform records it, else from
/// the last modification.
fn is_expired(metadata: &std::fs::Metadata, ttl: Duration) -> bool {
    let born = metadata.created().or_else(|_| metadata.modified());
    match born {
        Ok(born) => SystemTime::now()
            .duration_since(born)
            .is_ok_and(|age| age > ttl),
        Err(_) => false,
    }
}

fn is_committed_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == CACHE_FILE_EXTENSION)
}

/// Collect committed cache files with their mtime and size.
fn collect_cache_files(dir: &Path) -> Vec<(PathBuf, SystemTime, u64)> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "Failed to read disk cache directory");
            return Vec::new();
        }
    };

    entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            if !is_committed_file(&path) {
                return None;
            }
            let metadata = entry.metadata().ok().filter(|m| m.is_file())?;
            let mtime = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            Some((path, mtime, metadata.len()))
        })
        .collect()
}

fn fits(available: u64, freed: u64, reserve: u64, required: u64) -> bool {
    available.saturating_add(freed).saturating_sub(reserve) >= required
}

/// Blocking implementation of the reserve-space policy.
fn reclaim_blocking(
    dir: &Path,
    probe: &dyn SpaceProbe,
    reserve: u64,
    required: u64,
) -> Result<SpaceReclaim, DiskCacheError> {
    let available = probe.available_bytes(dir)?;
    if fits(available, 0, reserve, required) {
        return Ok(SpaceReclaim {
            granted: true,
            ..SpaceReclaim::default()
        });
    }

    let mut files = collect_cache_files(dir);
    files.sort_by_key(|(_, mtime, _)| *mtime);

    let mut reclaim = SpaceReclaim::default();
    for (path, _mtime, size) in files {
        match std::fs::remove_file(&path) {
            Ok(()) => {
                reclaim.files_deleted += 1;
                reclaim.bytes_freed += size;
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Failed to delete cache file");
                continue;
            }
        }
        if fits(available, reclaim.bytes_freed, reserve, required) {
            reclaim.granted = true;
            break;
        }
    }

    if reclaim.files_deleted > 0 {
        info!(
            files_deleted = reclaim.files_deleted,
            bytes_freed = reclaim.bytes_freed,
            required_bytes = required,
            granted = reclaim.granted,
            "Disk cache eviction complete"
        );
    }
    Ok(reclaim)
}
