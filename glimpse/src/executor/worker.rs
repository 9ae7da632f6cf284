//! Fixed-size worker pool over a bounded discard-oldest queue.
//!
//! # Overflow
//!
//! When the queue is full, the oldest queued job (not yet started) is
//! dropped to make room and told so through [`Job::discard`]. Newer work
//! wins because the caller most likely scrolled past the older request.
//!
//! # Panics
//!
//! A panicking job is caught; its [`PanicHandler`](super::PanicHandler)
//! runs and the worker moves on to the next job.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use super::job::Job;

/// Counters for one worker pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerPoolStats {
    /// Jobs accepted by `submit`
    pub submitted: u64,
    /// Jobs whose future ran to completion
    pub completed: u64,
    /// Jobs evicted from a full queue
    pub discarded: u64,
    /// Jobs whose future panicked
    pub panicked: u64,
}

struct JobQueue {
    jobs: Mutex<VecDeque<Box<dyn Job>>>,
    capacity: usize,
    notify: Notify,
    stats: Mutex<WorkerPoolStats>,
}

impl JobQueue {
    async fn pop(&self) -> Box<dyn Job> {
        loop {
            if let Some(job) = self.jobs.lock().pop_front() {
                return job;
            }
            self.notify.notified().await;
        }
    }
}

/// A named pool of worker tasks sharing one queue.
pub struct WorkerPool {
    name: &'static str,
    queue: Arc<JobQueue>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl WorkerPool {
    /// Spawn `workers` tasks on `runtime` draining a queue of `capacity`.
    ///
    /// # Arguments
    ///
    /// * `name` - Pool name for logs
    /// * `workers` - Number of jobs run concurrently (at least 1)
    /// * `capacity` - Queued jobs kept before discarding the oldest (at least 1)
    /// * `runtime` - Runtime the workers are spawned on
    /// * `shutdown` - Stops the workers when cancelled
    pub fn new(
        name: &'static str,
        workers: usize,
        capacity: usize,
        runtime: &Handle,
        shutdown: CancellationToken,
    ) -> Self {
        let workers = workers.max(1);
        let queue = Arc::new(JobQueue {
            jobs: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            notify: Notify::new(),
            stats: Mutex::new(WorkerPoolStats::default()),
        });

        let handles = (0..workers)
            .map(|index| {
                runtime.spawn(worker_loop(
                    name,
                    index,
                    Arc::clone(&queue),
                    shutdown.clone(),
                ))
            })
            .collect();

        debug!(pool = name, workers, capacity = queue.capacity, "Worker pool started");

        Self {
            name,
            queue,
            workers: Mutex::new(handles),
            shutdown,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Queue a job, discarding the oldest queued job if the queue is full.
    ///
    /// After shutdown the job is discarded immediately.
    pub fn submit(&self, job: Box<dyn Job>) {
        if self.shutdown.is_cancelled() {
            self.queue.stats.lock().discarded += 1;
            job.discard();
            return;
        }

        let evicted = {
            let mut jobs = self.queue.jobs.lock();
            let evicted = if jobs.len() >= self.queue.capacity {
                jobs.pop_front()
            } else {
                None
            };
            jobs.push_back(job);
            evicted
        };
        {
            let mut stats = self.queue.stats.lock();
            stats.submitted += 1;
            if evicted.is_some() {
                stats.discarded += 1;
            }
        }
        self.queue.notify.notify_one();

        if let Some(evicted) = evicted {
            debug!(pool = self.name, job = %evicted.name(), "Queue full, discarding oldest job");
            evicted.discard();
        }
    }

    /// Jobs waiting to start.
    pub fn queued(&self) -> usize {
        self.queue.jobs.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity
    }

    pub fn stats(&self) -> WorkerPoolStats {
        *self.queue.stats.lock()
    }

    /// Stop the workers and discard every queued job.
    ///
    /// Jobs already running are left to observe their own cancellation.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        let drained: Vec<_> = self.queue.jobs.lock().drain(..).collect();
        if !drained.is_empty() {
            self.queue.stats.lock().discarded += drained.len() as u64;
            info!(pool = self.name, discarded = drained.len(), "Discarding queued jobs on shutdown");
        }
        for job in drained {
            job.discard();
        }
    }

    /// Wait for every worker task to exit. Call after [`shutdown`](Self::shutdown).
    pub async fn join(&self) {
        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("queued", &self.queued())
            .field("capacity", &self.queue.capacity)
            .finish()
    }
}

async fn worker_loop(
    pool: &'static str,
    index: usize,
    queue: Arc<JobQueue>,
    shutdown: CancellationToken,
) {
    loop {
        let job = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            job = queue.pop() => job,
        };

        let name = job.name();
        let on_panic = job.on_panic();
        trace!(pool, worker = index, job = %name, "Running job");

        match AssertUnwindSafe(job.run()).catch_unwind().await {
            Ok(()) => {
                queue.stats.lock().completed += 1;
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                queue.stats.lock().panicked += 1;
                error!(pool, worker = index, job = %name, panic = %message, "Job panicked");
                if let Some(handler) = on_panic {
                    handler(message);
                }
            }
        }
    }
    trace!(pool, worker = index, "Worker stopped");
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::job::{FnJob, PanicHandler};
    use std::future::Future;
    use std::pin::Pin;
    use std::time::Duration;
    use tokio::sync::{mpsc, oneshot};

    /// Job that reports run/discard through a channel.
    struct Probe {
        id: u32,
        gate: Option<oneshot::Receiver<()>>,
        events: mpsc::UnboundedSender<(u32, &'static str)>,
    }

    impl Job for Probe {
        fn name(&self) -> String {
            format!("probe-{}", self.id)
        }

        fn run(self: Box<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
            Box::pin(async move {
                if let Some(gate) = self.gate {
                    let _ = gate.await;
                }
                let _ = self.events.send((self.id, "ran"));
            })
        }

        fn discard(self: Box<Self>) {
            let _ = self.events.send((self.id, "discarded"));
        }
    }

    fn probe(
        id: u32,
        events: &mpsc::UnboundedSender<(u32, &'static str)>,
    ) -> Box<dyn Job> {
        Box::new(Probe {
            id,
            gate: None,
            events: events.clone(),
        })
    }

    #[tokio::test]
    async fn test_jobs_run() {
        let pool = WorkerPool::new("test", 2, 8, &Handle::current(), CancellationToken::new());
        let (tx, mut rx) = mpsc::unbounded_channel();

        for id in 0..4 {
            pool.submit(probe(id, &tx));
        }

        let mut ran = Vec::new();
        for _ in 0..4 {
            ran.push(rx.recv().await.unwrap());
        }
        ran.sort();
        assert_eq!(ran, vec![(0, "ran"), (1, "ran"), (2, "ran"), (3, "ran")]);
    }

    #[tokio::test]
    async fn test_full_queue_discards_oldest() {
        let pool = WorkerPool::new("test", 1, 2, &Handle::current(), CancellationToken::new());
        let (tx, mut rx) = mpsc::unbounded_channel();

        // Occupy the only worker
        let (open, gate) = oneshot::channel();
        pool.submit(Box::new(Probe {
            id: 0,
            gate: Some(gate),
            events: tx.clone(),
        }));
        while pool.queued() > 0 {
            tokio::task::yield_now().await;
        }

        pool.submit(probe(1, &tx));
        pool.submit(probe(2, &tx));
        pool.submit(probe(3, &tx)); // evicts 1

        assert_eq!(rx.recv().await.unwrap(), (1, "discarded"));
        assert_eq!(pool.queued(), 2);

        open.send(()).unwrap();
        assert_eq!(rx.recv().await.unwrap(), (0, "ran"));
        assert_eq!(rx.recv().await.unwrap(), (2, "ran"));
        assert_eq!(rx.recv().await.unwrap(), (3, "ran"));
        assert_eq!(pool.stats().discarded, 1);
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_kill_worker() {
        struct Exploding {
            tx: mpsc::UnboundedSender<String>,
        }

        impl Job for Exploding {
            fn name(&self) -> String {
                "exploding".to_string()
            }

            fn run(self: Box<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
                Box::pin(async move { panic!("boom") })
            }

            fn discard(self: Box<Self>) {}

            fn on_panic(&self) -> Option<PanicHandler> {
                let tx = self.tx.clone();
                Some(Box::new(move |message| {
                    let _ = tx.send(message);
                }))
            }
        }

        let pool = WorkerPool::new("test", 1, 4, &Handle::current(), CancellationToken::new());
        let (panic_tx, mut panic_rx) = mpsc::unbounded_channel();
        let (tx, mut rx) = mpsc::unbounded_channel();

        pool.submit(Box::new(Exploding { tx: panic_tx }));
        pool.submit(probe(7, &tx));

        assert_eq!(panic_rx.recv().await.unwrap(), "boom");
        assert_eq!(rx.recv().await.unwrap(), (7, "ran"));
        assert_eq!(pool.stats().panicked, 1);
    }

    #[tokio::test]
    async fn test_shutdown_discards_queued_and_later_jobs() {
        let pool = WorkerPool::new("test", 1, 4, &Handle::current(), CancellationToken::new());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let (_open, gate) = oneshot::channel::<()>();
        pool.submit(Box::new(Probe {
            id: 0,
            gate: Some(gate),
            events: tx.clone(),
        }));
        while pool.queued() > 0 {
            tokio::task::yield_now().await;
        }
        pool.submit(probe(1, &tx));

        pool.shutdown();
        assert_eq!(rx.recv().await.unwrap(), (1, "discarded"));

        pool.submit(probe(2, &tx));
        assert_eq!(rx.recv().await.unwrap(), (2, "discarded"));
    }

    #[tokio::test]
    async fn test_fn_job() {
        let pool = WorkerPool::new("test", 1, 4, &Handle::current(), CancellationToken::new());
        let (tx, rx) = oneshot::channel();

        pool.submit(Box::new(FnJob::new("send", move || async move {
            let _ = tx.send(42);
        })));

        let value = tokio::time::timeout(Duration::from_secs(5), rx).await.unwrap();
        assert_eq!(value.unwrap(), 42);
    }
}
