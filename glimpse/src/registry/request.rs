//! A single in-flight request and its listeners.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::listener::RequestListener;
use crate::key::{CacheKey, ImageRequest};
use crate::pipeline::RequestState;

/// Identifies one attached caller.
pub type ListenerId = u64;

pub(super) type Listeners = Vec<(ListenerId, Arc<dyn RequestListener>)>;

pub(super) struct RequestInner {
    pub(super) state: RequestState,
    pub(super) listeners: Listeners,
}

/// Work shared by every caller that asked for the same key.
pub struct InFlightRequest {
    id: u64,
    key: CacheKey,
    request: ImageRequest,
    token: CancellationToken,
    pub(super) inner: Mutex<RequestInner>,
}

impl InFlightRequest {
    pub(super) fn new(
        id: u64,
        request: ImageRequest,
        listener_id: ListenerId,
        listener: Arc<dyn RequestListener>,
    ) -> Self {
        Self {
            id,
            key: request.cache_key(),
            request,
            token: CancellationToken::new(),
            inner: Mutex::new(RequestInner {
                state: RequestState::Idle,
                listeners: vec![(listener_id, listener)],
            }),
        }
    }

    /// Registry-unique id; distinguishes successive requests for one key.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn request(&self) -> &ImageRequest {
        &self.request
    }

    pub fn state(&self) -> RequestState {
        self.inner.lock().state
    }

    /// Token cancelled when the last listener detaches.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    /// Move to a non-terminal state.
    ///
    /// Returns false and leaves the state unchanged if the lifecycle does not
    /// allow the transition. Terminal states are set by the registry.
    pub fn advance(&self, next: RequestState) -> bool {
        let mut inner = self.inner.lock();
        if next.is_terminal() || !inner.state.can_transition_to(next) {
            debug!(
                key = %self.key,
                from = %inner.state,
                to = %next,
                "Rejected request state transition"
            );
            return false;
        }
        trace!(key = %self.key, from = %inner.state, to = %next, "Request state");
        inner.state = next;
        true
    }

    /// Report download progress to every attached listener.
    pub fn report_progress(&self, total: Option<u64>, completed: u64) {
        let listeners: Vec<_> = {
            let inner = self.inner.lock();
            if inner.state.is_terminal() {
                return;
            }
            inner.listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
        };
        for listener in listeners {
            listener.on_progress(&self.key, total, completed);
        }
    }

    /// Add a caller unless the request already reached a terminal state.
    pub(super) fn try_attach(&self, id: ListenerId, listener: Arc<dyn RequestListener>) -> bool {
        let mut inner = self.inner.lock();
        if inner.state.is_terminal() {
            return false;
        }
        inner.listeners.push((id, listener));
        true
    }

    /// Set a terminal state and take the listeners to notify.
    ///
    /// Returns `None` if the request was already terminal.
    pub(super) fn terminate(&self, state: RequestState) -> Option<Listeners> {
        let mut inner = self.inner.lock();
        if inner.state.is_terminal() {
            return None;
        }
        if !inner.state.can_transition_to(state) {
            warn!(
                key = %self.key,
                from = %inner.state,
                to = %state,
                "Forcing terminal state outside the lifecycle"
            );
        }
        inner.state = state;
        Some(std::mem::take(&mut inner.listeners))
    }
}

impl std::fmt::Debug for InFlightRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("InFlightRequest")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("state", &inner.state)
            .field("listeners", &inner.listeners.len())
            .finish()
    }
}
