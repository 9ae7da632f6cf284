//! In-flight request registry with coalescing and cancellation.
//!
//! When several callers ask for the same key while it is being loaded, only
//! the first starts work; the rest attach to it and receive the same
//! outcome.
//!
//! ```text
//! caller A ─┐
//!           │ attach                                 pipeline
//! caller B ─┼──► RequestRegistry ──► InFlightRequest ──► (one execution)
//!           │          │                                    │
//! caller C ─┘          │ finish(outcome)                    │
//!                      ▼                                    │
//!          [A, B, C each get the same result] ◄─────────────┘
//! ```
//!
//! # Cancellation
//!
//! Cancelling a [`RequestHandle`] detaches only that caller, who receives
//! `on_cancelled`. The underlying work is cancelled when the last caller
//! detaches.
//!
//! # Locking
//!
//! The key map has one coarse lock; each request guards its own listener
//! list. Listener callbacks always run with no lock held.

mod listener;
mod request;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use crate::bitmap::ImageHandle;
use crate::key::{CacheKey, ImageRequest};
use crate::pipeline::{LoadError, Provenance, RequestState};

pub use listener::{ChannelListener, RequestEvent, RequestListener};
pub use request::{InFlightRequest, ListenerId};

/// Statistics for monitoring coalescing effectiveness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Attach calls
    pub total_requests: u64,
    /// Attach calls that joined existing work
    pub coalesced_requests: u64,
    /// Attach calls that started new work
    pub new_requests: u64,
    /// Callers that detached before an outcome
    pub cancelled_listeners: u64,
    /// Requests whose work was cancelled
    pub cancelled_requests: u64,
    pub completed_requests: u64,
    pub failed_requests: u64,
}

impl RegistryStats {
    /// Returns the coalescing ratio (0.0 to 1.0)
    pub fn coalescing_ratio(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.coalesced_requests as f64 / self.total_requests as f64
        }
    }
}

/// Terminal outcome of an in-flight request.
#[derive(Debug, Clone)]
pub enum Outcome {
    Completed {
        image: ImageHandle,
        provenance: Provenance,
    },
    Failed(LoadError),
    Cancelled,
}

impl Outcome {
    fn state(&self) -> RequestState {
        match self {
            Self::Completed { .. } => RequestState::Completed,
            Self::Failed(_) => RequestState::Failed,
            Self::Cancelled => RequestState::Cancelled,
        }
    }
}

/// Result of [`RequestRegistry::attach`].
#[derive(Debug)]
pub struct Attachment {
    /// Handle the caller uses to cancel
    pub handle: RequestHandle,
    /// Set when this attach created the request; the caller must start it
    pub new_request: Option<Arc<InFlightRequest>>,
}

/// A caller's stake in a request.
///
/// Dropping the handle does not cancel; call [`cancel`](Self::cancel).
#[derive(Debug, Clone)]
pub struct RequestHandle {
    key: CacheKey,
    target: Option<HandleTarget>,
}

#[derive(Debug, Clone)]
struct HandleTarget {
    request_id: u64,
    listener_id: ListenerId,
    registry: Weak<RequestRegistry>,
}

impl RequestHandle {
    /// Handle for a request that completed synchronously.
    pub fn completed(key: CacheKey) -> Self {
        Self { key, target: None }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Detach this caller. Returns true if the caller was still waiting.
    pub fn cancel(&self) -> bool {
        let Some(target) = &self.target else {
            return false;
        };
        match target.registry.upgrade() {
            Some(registry) => registry.cancel(&self.key, target.request_id, target.listener_id),
            None => false,
        }
    }
}

/// Map of in-flight requests keyed by cache key.
pub struct RequestRegistry {
    requests: Mutex<HashMap<CacheKey, Arc<InFlightRequest>>>,
    next_request_id: AtomicU64,
    next_listener_id: AtomicU64,
    stats: Mutex<RegistryStats>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self {
            requests: Mutex::new(HashMap::new()),
            next_request_id: AtomicU64::new(1),
            next_listener_id: AtomicU64::new(1),
            stats: Mutex::new(RegistryStats::default()),
        }
    }

    /// Attach a caller to the request for this descriptor's key.
    ///
    /// Joins a live request if one exists; otherwise creates one, returned
    /// in [`Attachment::new_request`]. The listener receives `on_started`
    /// either way, before it can receive any other event.
    pub fn attach(
        self: &Arc<Self>,
        request: &ImageRequest,
        listener: Arc<dyn RequestListener>,
    ) -> Attachment {
        let key = request.cache_key();
        let listener_id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);

        // Once published, progress and the outcome may arrive from workers.
        listener.on_started(&key);

        let (in_flight, created) = {
            let mut requests = self.requests.lock();
            let joined = requests
                .get(&key)
                .filter(|existing| existing.try_attach(listener_id, Arc::clone(&listener)))
                .map(Arc::clone);

            match joined {
                Some(existing) => (existing, false),
                None => {
                    let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
                    let created = Arc::new(InFlightRequest::new(
                        id,
                        request.clone(),
                        listener_id,
                        Arc::clone(&listener),
                    ));
                    requests.insert(key.clone(), Arc::clone(&created));
                    (created, true)
                }
            }
        };

        {
            let mut stats = self.stats.lock();
            stats.total_requests += 1;
            if created {
                stats.new_requests += 1;
            } else {
                stats.coalesced_requests += 1;
            }
        }
        debug!(
            key = %key,
            request_id = in_flight.id(),
            coalesced = !created,
            "Attached to request"
        );

        Attachment {
            handle: RequestHandle {
                key,
                target: Some(HandleTarget {
                    request_id: in_flight.id(),
                    listener_id,
                    registry: Arc::downgrade(self),
                }),
            },
            new_request: created.then_some(in_flight),
        }
    }

    /// Look up the live request for a key.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<InFlightRequest>> {
        self.requests.lock().get(key).cloned()
    }

    /// Detach one caller. The request's work is cancelled once nobody is
    /// left waiting.
    fn cancel(&self, key: &CacheKey, request_id: u64, listener_id: ListenerId) -> bool {
        let (listener, abandoned) = {
            let mut requests = self.requests.lock();
            let Some(request) = requests.get(key).filter(|r| r.id() == request_id).cloned() else {
                return false;
            };

            let mut inner = request.inner.lock();
            if inner.state.is_terminal() {
                return false;
            }
            let Some(position) = inner.listeners.iter().position(|(id, _)| *id == listener_id)
            else {
                return false;
            };
            let (_, listener) = inner.listeners.remove(position);

            let abandoned = inner.listeners.is_empty();
            if abandoned {
                inner.state = RequestState::Cancelled;
                request.cancel_token().cancel();
                drop(inner);
                requests.remove(key);
            }
            (listener, abandoned)
        };

        {
            let mut stats = self.stats.lock();
            stats.cancelled_listeners += 1;
            if abandoned {
                stats.cancelled_requests += 1;
            }
        }
        debug!(key = %key, request_id, abandoned, "Listener cancelled");

        listener.on_cancelled(key);
        true
    }

    /// Deliver a terminal outcome to every attached caller.
    ///
    /// Returns false if the request already ended (for example because every
    /// caller cancelled); nothing is delivered then.
    pub fn finish(&self, request: &InFlightRequest, outcome: Outcome) -> bool {
        let listeners = {
            let mut requests = self.requests.lock();
            if requests
                .get(request.key())
                .is_some_and(|current| current.id() == request.id())
            {
                requests.remove(request.key());
            }
            request.terminate(outcome.state())
        };

        let Some(listeners) = listeners else {
            debug!(
                key = %request.key(),
                request_id = request.id(),
                "Dropping outcome for finished request"
            );
            return false;
        };

        {
            let mut stats = self.stats.lock();
            match &outcome {
                Outcome::Completed { .. } => stats.completed_requests += 1,
                Outcome::Failed(_) => stats.failed_requests += 1,
                Outcome::Cancelled => stats.cancelled_requests += 1,
            }
        }
        if matches!(outcome, Outcome::Cancelled) {
            request.cancel_token().cancel();
        }

        debug!(
            key = %request.key(),
            request_id = request.id(),
            listeners = listeners.len(),
            state = %outcome.state(),
            "Request finished"
        );

        let key = request.key();
        for (_, listener) in listeners {
            match &outcome {
                Outcome::Completed { image, provenance } => {
                    listener.on_completed(key, Arc::clone(image), *provenance)
                }
                Outcome::Failed(error) => listener.on_failed(key, error.clone()),
                Outcome::Cancelled => listener.on_cancelled(key),
            }
        }
        true
    }

    /// Cancel every in-flight request. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<_> = self.requests.lock().drain().map(|(_, r)| r).collect();
        drained
            .iter()
            .filter(|request| self.finish(request, Outcome::Cancelled))
            .count()
    }

    pub fn in_flight_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn stats(&self) -> RegistryStats {
        *self.stats.lock()
    }
}

impl Default for RequestRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RequestRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestRegistry")
            .field("in_flight", &self.in_flight_count())
            .field("stats", &self.stats())
            .finish()
    }
}
