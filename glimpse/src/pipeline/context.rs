//! Pipeline context containing shared resources.
//!
//! The `PipelineContext` gives every stage access to the caches, the buffer
//! pool, the registry, the executor set and the injected collaborators.
//! Cloning it only bumps reference counts.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use super::job::{Stage, StageJob};
use super::traits::{ByteFetcher, Decoder};
use super::RequestState;
use crate::cache::{CacheStats, DiskCache, MemoryCache};
use crate::executor::ExecutorSet;
use crate::pool::BufferPool;
use crate::registry::{InFlightRequest, RequestRegistry};

/// Default extra attempts after a fetch timeout.
pub const DEFAULT_MAX_RETRY_COUNT: u32 = 2;

/// Default connect and per-chunk read timeout.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Default delay before the first retry; doubles on each further retry.
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Configuration for the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Extra attempts after a timeout (total attempts = this + 1)
    pub max_retry_count: u32,

    /// Timeout for the fetch to start and for each chunk read
    pub fetch_timeout: Duration,

    /// Backoff before the first retry
    pub retry_base_delay: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retry_count: DEFAULT_MAX_RETRY_COUNT,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
        }
    }
}

impl PipelineConfig {
    /// Backoff before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        self.retry_base_delay * (1u32 << retry.saturating_sub(1).min(6))
    }
}

/// Shared context for pipeline stages.
#[derive(Clone)]
pub struct PipelineContext {
    pub memory: Arc<MemoryCache>,
    pub disk: Arc<DiskCache>,
    pub pool: Arc<BufferPool>,
    pub registry: Arc<RequestRegistry>,
    pub executors: Arc<ExecutorSet>,
    pub fetcher: Arc<dyn ByteFetcher>,
    pub decoder: Arc<dyn Decoder>,
    pub config: PipelineConfig,

    /// Download counters; disk and memory keep their own
    pub stats: Arc<Mutex<CacheStats>>,
}

impl PipelineContext {
    /// Start work for a newly created request on the dispatch pool.
    pub fn start(&self, request: Arc<InFlightRequest>) {
        if !request.advance(RequestState::Dispatching) {
            debug!(key = %request.key(), state = %request.state(), "Request not startable");
            return;
        }
        self.submit_dispatch(request);
    }

    pub(crate) fn submit_dispatch(&self, request: Arc<InFlightRequest>) {
        self.executors
            .dispatch()
            .submit(Box::new(StageJob::new(self.clone(), request, Stage::Dispatch)));
    }

    pub(crate) fn submit_local(&self, request: Arc<InFlightRequest>, stage: Stage) {
        self.executors
            .local()
            .submit(Box::new(StageJob::new(self.clone(), request, stage)));
    }

    pub(crate) fn submit_network(&self, request: Arc<InFlightRequest>) {
        self.executors
            .network()
            .submit(Box::new(StageJob::new(self.clone(), request, Stage::Fetch)));
    }

    /// Snapshot of download counters.
    pub fn stats(&self) -> CacheStats {
        self.stats.lock().clone()
    }
}

impl std::fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext")
            .field("config", &self.config)
            .field("memory", &self.memory)
            .field("disk", &self.disk)
            .finish_non_exhaustive()
    }
}
