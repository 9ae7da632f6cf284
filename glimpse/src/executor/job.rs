//! Units of work accepted by worker pools.

use std::future::Future;
use std::pin::Pin;

/// Callback run when a job's future panics. Receives the panic message.
pub type PanicHandler = Box<dyn FnOnce(String) + Send>;

/// A queued piece of work.
///
/// A job ends in exactly one of three ways: its future runs to completion,
/// it is discarded from a full queue before starting, or its future panics
/// and the handler from [`on_panic`](Job::on_panic) runs.
pub trait Job: Send + 'static {
    /// Short description for logs.
    fn name(&self) -> String;

    /// Consume the job and produce its work.
    fn run(self: Box<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>>;

    /// The job was evicted from a full queue and will never run.
    fn discard(self: Box<Self>);

    /// Handler to invoke if [`run`](Job::run) panics. Taken before the job
    /// is consumed.
    fn on_panic(&self) -> Option<PanicHandler> {
        None
    }
}

/// Adapts a closure-produced future into a [`Job`]. Used by tests and
/// housekeeping work that needs no discard handling.
pub struct FnJob<F> {
    name: String,
    make: F,
}

impl<F, Fut> FnJob<F>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    pub fn new(name: impl Into<String>, make: F) -> Self {
        Self {
            name: name.into(),
            make,
        }
    }
}

impl<F, Fut> Job for FnJob<F>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn name(&self) -> String {
        self.name.clone()
    }

    fn run(self: Box<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin((self.make)())
    }

    fn discard(self: Box<Self>) {}
}
