//! Executor set for request pipelines.
//!
//! Three independent worker pools keep slow work from starving fast work:
//!
//! ```text
//!                  ┌──────────────────────────┐
//!   submit ──────► │ dispatch (1 worker)      │  memory re-check, routing
//!                  └────────────┬─────────────┘
//!                 ┌─────────────┴─────────────┐
//!                 ▼                           ▼
//!   ┌──────────────────────────┐  ┌──────────────────────────┐
//!   │ network (N workers)      │  │ local (M workers)        │
//!   │ HTTP fetch, stream       │  │ disk probe, file read    │
//!   └──────────────────────────┘  └──────────────────────────┘
//! ```
//!
//! Every pool has a bounded queue that discards its oldest waiting job on
//! overflow. Decoding runs on the blocking thread pool from whichever worker
//! finished the fetch.

mod job;
mod worker;

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub use job::{FnJob, Job, PanicHandler};
pub use worker::{WorkerPool, WorkerPoolStats};

/// Default number of concurrent network fetches.
pub const DEFAULT_NETWORK_WORKERS: usize = 5;

/// Default number of concurrent local file operations.
pub const DEFAULT_LOCAL_WORKERS: usize = 2;

/// Default jobs queued per pool before the oldest is discarded.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Errors creating an executor set.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("no tokio runtime available: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

/// Pool sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorConfig {
    pub network_workers: usize,
    pub local_workers: usize,
    pub queue_capacity: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            network_workers: DEFAULT_NETWORK_WORKERS,
            local_workers: DEFAULT_LOCAL_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl ExecutorConfig {
    pub fn with_network_workers(mut self, workers: usize) -> Self {
        self.network_workers = workers;
        self
    }

    pub fn with_local_workers(mut self, workers: usize) -> Self {
        self.local_workers = workers;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }
}

/// Counters for all three pools.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorStats {
    pub dispatch: WorkerPoolStats,
    pub network: WorkerPoolStats,
    pub local: WorkerPoolStats,
}

/// The dispatch, network and local worker pools.
#[derive(Debug)]
pub struct ExecutorSet {
    dispatch: WorkerPool,
    network: WorkerPool,
    local: WorkerPool,
    shutdown: CancellationToken,
}

impl ExecutorSet {
    /// Start the pools on the current tokio runtime.
    pub fn new(config: ExecutorConfig) -> Result<Self, ExecutorError> {
        let runtime = Handle::try_current()?;
        Ok(Self::with_runtime(config, &runtime))
    }

    /// Start the pools on the given runtime.
    pub fn with_runtime(config: ExecutorConfig, runtime: &Handle) -> Self {
        let shutdown = CancellationToken::new();
        let capacity = config.queue_capacity;

        info!(
            network_workers = config.network_workers,
            local_workers = config.local_workers,
            queue_capacity = capacity,
            "Starting executor set"
        );

        Self {
            dispatch: WorkerPool::new("dispatch", 1, capacity, runtime, shutdown.child_token()),
            network: WorkerPool::new(
                "network",
                config.network_workers,
                capacity,
                runtime,
                shutdown.child_token(),
            ),
            local: WorkerPool::new(
                "local",
                config.local_workers,
                capacity,
                runtime,
                shutdown.child_token(),
            ),
            shutdown,
        }
    }

    pub fn dispatch(&self) -> &WorkerPool {
        &self.dispatch
    }

    pub fn network(&self) -> &WorkerPool {
        &self.network
    }

    pub fn local(&self) -> &WorkerPool {
        &self.local
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop all pools, discarding queued jobs.
    pub fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        info!("Shutting down executor set");
        self.dispatch.shutdown();
        self.network.shutdown();
        self.local.shutdown();
        self.shutdown.cancel();
    }

    pub fn stats(&self) -> ExecutorStats {
        ExecutorStats {
            dispatch: self.dispatch.stats(),
            network: self.network.stats(),
            local: self.local.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[test]
    fn test_config_builders() {
        let config = ExecutorConfig::default()
            .with_network_workers(3)
            .with_local_workers(1)
            .with_queue_capacity(10);

        assert_eq!(config.network_workers, 3);
        assert_eq!(config.local_workers, 1);
        assert_eq!(config.queue_capacity, 10);
    }

    #[test]
    fn test_new_without_runtime_fails() {
        assert!(matches!(
            ExecutorSet::new(ExecutorConfig::default()),
            Err(ExecutorError::NoRuntime(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_network_concurrency_is_bounded() {
        let executors = ExecutorSet::new(ExecutorConfig::default().with_network_workers(2)).unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = mpsc::unbounded_channel();

        for i in 0..6 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let tx = tx.clone();
            executors
                .network()
                .submit(Box::new(FnJob::new(format!("job-{i}"), move || async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    let _ = tx.send(());
                })));
        }

        for _ in 0..6 {
            rx.recv().await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(executors.stats().network.completed, 6);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let executors = ExecutorSet::new(ExecutorConfig::default()).unwrap();
        executors.shutdown();
        executors.shutdown();
        assert!(executors.is_shut_down());
    }
}
