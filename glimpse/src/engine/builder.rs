//! Builder for [`CacheEngine`].

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::info;

use super::{CacheEngine, EngineError};
use crate::adapters::{HttpFetcher, ImageDecoder};
use crate::cache::{CacheStats, DiskCache, MemoryCache, SpaceProbe};
use crate::config::EngineConfig;
use crate::executor::{ExecutorError, ExecutorSet};
use crate::pipeline::{ByteFetcher, Decoder, PipelineContext};
use crate::pool::BufferPool;
use crate::registry::RequestRegistry;

/// Assembles a [`CacheEngine`] from configuration and collaborators.
///
/// Without an explicit fetcher the engine uses [`HttpFetcher`]; without an
/// explicit decoder it uses [`ImageDecoder`].
pub struct CacheEngineBuilder {
    config: EngineConfig,
    fetcher: Option<Arc<dyn ByteFetcher>>,
    decoder: Option<Arc<dyn Decoder>>,
    space_probe: Option<Arc<dyn SpaceProbe>>,
    runtime: Option<Handle>,
}

impl CacheEngineBuilder {
    pub(super) fn new(config: EngineConfig) -> Self {
        Self {
            config,
            fetcher: None,
            decoder: None,
            space_probe: None,
            runtime: None,
        }
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn ByteFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn decoder(mut self, decoder: Arc<dyn Decoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    /// Replace the free-space probe used by the disk cache.
    pub fn space_probe(mut self, probe: Arc<dyn SpaceProbe>) -> Self {
        self.space_probe = Some(probe);
        self
    }

    /// Run worker pools on this runtime instead of the current one.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Validate the configuration and start the worker pools.
    ///
    /// Fails with [`EngineError::Executor`] when called outside a Tokio
    /// runtime and no runtime was given.
    pub fn build(self) -> Result<CacheEngine, EngineError> {
        let config = self.config;
        config.validate()?;

        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(ExecutorError::from)?,
        };

        let fetcher: Arc<dyn ByteFetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(
                HttpFetcher::new(config.pipeline.fetch_timeout).map_err(EngineError::Fetcher)?,
            ),
        };
        let decoder = self
            .decoder
            .unwrap_or_else(|| Arc::new(ImageDecoder::new()));

        let mut disk = DiskCache::new(config.disk.clone());
        if let Some(probe) = self.space_probe {
            disk = disk.with_space_probe(probe);
        }

        let memory = MemoryCache::new(config.memory_cache_max_bytes)
            .with_survivable_entries(config.survivable_entries);
        let pool = BufferPool::new(config.buffer_pool_max_bytes, config.buffer_reuse);
        let executors = ExecutorSet::with_runtime(config.executor, &runtime);

        info!(
            disk_cache_dir = %config.disk.directory.display(),
            memory_cache_max_bytes = config.memory_cache_max_bytes,
            buffer_pool_max_bytes = config.buffer_pool_max_bytes,
            buffer_reuse = config.buffer_reuse,
            "Cache engine started"
        );

        let ctx = PipelineContext {
            memory: Arc::new(memory),
            disk: Arc::new(disk),
            pool: Arc::new(pool),
            registry: Arc::new(RequestRegistry::new()),
            executors: Arc::new(executors),
            fetcher,
            decoder,
            config: config.pipeline,
            stats: Arc::new(Mutex::new(CacheStats::new())),
        };

        Ok(CacheEngine { ctx, config })
    }
}

impl std::fmt::Debug for CacheEngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEngineBuilder")
            .field("config", &self.config)
            .field("custom_fetcher", &self.fetcher.is_some())
            .field("custom_decoder", &self.decoder.is_some())
            .finish()
    }
}
