//! Cache engine facade.
//!
//! [`CacheEngine`] owns one instance of every component and is the entry
//! point for loading images:
//!
//! ```text
//! submit(request, listener)
//!     │
//!     ├─ memory hit ──► on_completed(MemoryCache)      (caller's thread)
//!     │
//!     └─ miss ──► RequestRegistry::attach
//!                    ├─ joined existing ──► wait for shared outcome
//!                    └─ new ──► dispatch pool ──► local / network pools
//! ```
//!
//! Dropping the engine cancels in-flight requests and stops the pools.

mod builder;
mod error;

use std::sync::Arc;

use tracing::{debug, info};

use crate::bitmap::ImageHandle;
use crate::cache::{CacheStats, DiskCache, MemoryCache};
use crate::config::EngineConfig;
use crate::executor::ExecutorStats;
use crate::key::{CacheKey, ImageRequest};
use crate::pipeline::{LoadError, PipelineContext, Provenance};
use crate::pool::{BufferPool, PoolStats};
use crate::registry::{ChannelListener, RegistryStats, RequestEvent, RequestHandle, RequestListener};

pub use builder::CacheEngineBuilder;
pub use error::EngineError;

/// How aggressively [`CacheEngine::trim_memory`] releases memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimLevel {
    /// Halve the memory cache and the buffer pool
    Background,
    /// Keep a quarter of the memory cache; drop pooled buffers
    Moderate,
    /// Drop everything held in memory
    Complete,
}

/// An image delivered by [`CacheEngine::load`].
#[derive(Debug, Clone)]
pub struct LoadedImage {
    pub key: CacheKey,
    pub image: ImageHandle,
    pub provenance: Provenance,
}

/// Snapshot of every component's counters.
#[derive(Debug, Clone)]
pub struct EngineStats {
    /// Memory, disk and download counters combined
    pub cache: CacheStats,
    pub registry: RegistryStats,
    pub pool: PoolStats,
    pub executor: ExecutorStats,
    /// Requests currently being loaded
    pub in_flight: usize,
}

/// Image loading engine.
pub struct CacheEngine {
    ctx: PipelineContext,
    config: EngineConfig,
}

impl CacheEngine {
    /// Start building an engine.
    pub fn builder(config: EngineConfig) -> CacheEngineBuilder {
        CacheEngineBuilder::new(config)
    }

    /// Build an engine with the default HTTP fetcher and image decoder.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Submit a request.
    ///
    /// A memory hit is delivered synchronously on the caller's thread with
    /// [`Provenance::MemoryCache`] and no `on_started`. Otherwise the
    /// listener is attached to the in-flight request for the key, starting
    /// one if none exists, and receives exactly one terminal callback.
    pub fn submit(&self, request: ImageRequest, listener: Arc<dyn RequestListener>) -> RequestHandle {
        let key = request.cache_key();

        if let Some(image) = self.ctx.memory.get(&key) {
            debug!(key = %key, "Memory hit");
            listener.on_completed(&key, image, Provenance::MemoryCache);
            return RequestHandle::completed(key);
        }

        if self.ctx.executors.is_shut_down() {
            debug!(key = %key, "Engine shut down, cancelling request");
            listener.on_cancelled(&key);
            return RequestHandle::completed(key);
        }

        let attachment = self.ctx.registry.attach(&request, listener);
        if let Some(in_flight) = attachment.new_request {
            self.ctx.start(in_flight);
        }
        attachment.handle
    }

    /// Load an image and wait for the outcome.
    ///
    /// Dropping the returned future detaches this caller the same way
    /// [`RequestHandle::cancel`] does.
    pub async fn load(&self, request: ImageRequest) -> Result<LoadedImage, LoadError> {
        let key = request.cache_key();
        let (listener, mut events) = ChannelListener::new();
        let handle = self.submit(request, Arc::new(listener));
        let _guard = CancelOnDrop(handle);

        while let Some(event) = events.recv().await {
            match event {
                RequestEvent::Completed { image, provenance } => {
                    return Ok(LoadedImage {
                        key,
                        image,
                        provenance,
                    })
                }
                RequestEvent::Failed(error) => return Err(error),
                RequestEvent::Cancelled => return Err(LoadError::Cancelled),
                RequestEvent::Started | RequestEvent::Progress { .. } => {}
            }
        }

        Err(LoadError::Internal(format!(
            "listener for {} dropped without an outcome",
            key
        )))
    }

    pub fn memory_cache(&self) -> &Arc<MemoryCache> {
        &self.ctx.memory
    }

    pub fn disk_cache(&self) -> &Arc<DiskCache> {
        &self.ctx.disk
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.ctx.pool
    }

    pub fn clear_memory_cache(&self) {
        self.ctx.memory.clear();
        info!("Memory cache cleared");
    }

    /// Delete every committed disk entry. Returns how many were deleted.
    pub async fn clear_disk_cache(&self) -> usize {
        let removed = self.ctx.disk.clear().await;
        info!(removed, "Disk cache cleared");
        removed
    }

    /// Release memory held by the memory cache and the buffer pool.
    pub fn trim_memory(&self, level: TrimLevel) {
        let memory = &self.ctx.memory;
        let pool = &self.ctx.pool;

        let evicted = match level {
            TrimLevel::Background => {
                pool.trim_to_size(pool.size_bytes() / 2);
                memory.trim_to_size(memory.size_bytes() / 2)
            }
            TrimLevel::Moderate => {
                pool.clear();
                memory.trim_to_size(memory.max_size_bytes() / 4)
            }
            TrimLevel::Complete => {
                pool.clear();
                let count = memory.entry_count();
                memory.clear();
                count
            }
        };

        info!(
            level = ?level,
            evicted,
            memory_bytes = memory.size_bytes(),
            pool_bytes = pool.size_bytes(),
            "Trimmed memory"
        );
    }

    pub fn stats(&self) -> EngineStats {
        let mut cache = self.ctx.memory.stats();
        cache.merge(&self.ctx.disk.stats());
        cache.merge(&self.ctx.stats());

        EngineStats {
            cache,
            registry: self.ctx.registry.stats(),
            pool: self.ctx.pool.stats(),
            executor: self.ctx.executors.stats(),
            in_flight: self.ctx.registry.in_flight_count(),
        }
    }

    /// Cancel in-flight requests and stop the worker pools.
    ///
    /// Later submissions are cancelled immediately unless they hit memory.
    /// Safe to call more than once.
    pub fn shutdown(&self) {
        if self.ctx.executors.is_shut_down() {
            return;
        }
        let cancelled = self.ctx.registry.cancel_all();
        self.ctx.executors.shutdown();
        info!(cancelled, "Cache engine shut down");
    }
}

impl Drop for CacheEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for CacheEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEngine")
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}

/// Detaches a [`load`](CacheEngine::load) caller whose future is dropped.
struct CancelOnDrop(RequestHandle);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::{DecodedImage, PixelBuffer, PixelFormat};
    use crate::pipeline::{ByteFetcher, DecodeError, DecodeTarget, Decoder, FetchError, FetchResponse};
    use futures::future::BoxFuture;
    use tempfile::TempDir;

    struct NoFetch;

    impl ByteFetcher for NoFetch {
        fn fetch(&self, uri: &str) -> BoxFuture<'static, Result<FetchResponse, FetchError>> {
            let uri = uri.to_string();
            Box::pin(async move { Err(FetchError::status(404, uri)) })
        }
    }

    struct NoDecode;

    impl Decoder for NoDecode {
        fn decode(
            &self,
            _data: &[u8],
            _target: &DecodeTarget,
            reuse: Option<PixelBuffer>,
        ) -> Result<PixelBuffer, DecodeError> {
            Err(DecodeError::corrupt("test").with_buffer(reuse))
        }
    }

    fn engine(dir: &TempDir) -> CacheEngine {
        let config = EngineConfig::default()
            .with_disk_cache_dir(dir.path().join("cache"))
            .with_disk_cache_fallback_dir(None)
            .with_memory_cache_max_bytes(1024 * 1024);
        CacheEngine::builder(config)
            .fetcher(Arc::new(NoFetch))
            .decoder(Arc::new(NoDecode))
            .build()
            .unwrap()
    }

    fn image(side: u32) -> ImageHandle {
        DecodedImage::new(PixelBuffer::allocate(side, side, PixelFormat::Rgba8888)).into_handle()
    }

    #[test]
    fn test_build_requires_runtime() {
        let result = CacheEngine::builder(EngineConfig::default())
            .fetcher(Arc::new(NoFetch))
            .decoder(Arc::new(NoDecode))
            .build();
        assert!(matches!(result, Err(EngineError::Executor(_))));
    }

    #[tokio::test]
    async fn test_build_rejects_invalid_config() {
        let config = EngineConfig::default().with_queue_capacity(0);
        let result = CacheEngine::builder(config)
            .fetcher(Arc::new(NoFetch))
            .decoder(Arc::new(NoDecode))
            .build();
        assert!(matches!(
            result,
            Err(EngineError::InvalidConfig {
                field: "queue_capacity",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_memory_hit_is_synchronous() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let request = ImageRequest::new("https://example.com/a.png");
        engine.memory_cache().put(request.cache_key(), image(4));

        let (listener, mut events) = ChannelListener::new();
        engine.submit(request, Arc::new(listener));

        match events.try_recv().unwrap() {
            RequestEvent::Completed { provenance, .. } => {
                assert_eq!(provenance, Provenance::MemoryCache)
            }
            other => panic!("expected Completed, got {:?}", other),
        }
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_load_reports_fetch_failure() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);

        let result = engine
            .load(ImageRequest::new("https://example.com/missing.png"))
            .await;

        assert!(matches!(result, Err(LoadError::Fetch(_))));
        assert_eq!(engine.stats().in_flight, 0);
    }

    #[tokio::test]
    async fn test_trim_levels() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        for i in 0..4 {
            engine
                .memory_cache()
                .put(CacheKey::from_raw(format!("k{}", i)), image(64));
        }
        let full = engine.memory_cache().size_bytes();

        engine.trim_memory(TrimLevel::Background);
        assert!(engine.memory_cache().size_bytes() <= full / 2);

        engine.trim_memory(TrimLevel::Complete);
        assert_eq!(engine.memory_cache().size_bytes(), 0);
        assert!(engine.buffer_pool().is_empty());
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_cancelled() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        engine.shutdown();
        engine.shutdown();

        let result = engine.load(ImageRequest::new("https://example.com/a.png")).await;
        assert_eq!(result.unwrap_err(), LoadError::Cancelled);
    }
}
