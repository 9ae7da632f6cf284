//! Listener interface for request outcomes.

use tokio::sync::mpsc;

use crate::bitmap::ImageHandle;
use crate::key::CacheKey;
use crate::pipeline::{LoadError, Provenance};

/// Receives lifecycle events for one submitted request.
///
/// Exactly one of `on_completed`, `on_failed` or `on_cancelled` is delivered
/// per submission. Calls happen on worker tasks; implementations must not
/// block.
pub trait RequestListener: Send + Sync {
    /// Work for this key has been scheduled (not sent for memory hits).
    fn on_started(&self, _key: &CacheKey) {}

    /// Bytes received so far. `total` is `None` when the length is unknown.
    fn on_progress(&self, _key: &CacheKey, _total: Option<u64>, _completed: u64) {}

    fn on_completed(&self, key: &CacheKey, image: ImageHandle, provenance: Provenance);

    fn on_failed(&self, key: &CacheKey, error: LoadError);

    /// This caller's interest was withdrawn.
    fn on_cancelled(&self, _key: &CacheKey) {}
}

/// Event emitted by a [`ChannelListener`].
#[derive(Debug, Clone)]
pub enum RequestEvent {
    Started,
    Progress { total: Option<u64>, completed: u64 },
    Completed { image: ImageHandle, provenance: Provenance },
    Failed(LoadError),
    Cancelled,
}

impl RequestEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed(_) | Self::Cancelled
        )
    }
}

/// Listener that forwards events into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<RequestEvent>,
}

impl ChannelListener {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RequestEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: RequestEvent) {
        // Receiver gone means the caller stopped listening.
        let _ = self.tx.send(event);
    }
}

impl RequestListener for ChannelListener {
    fn on_started(&self, _key: &CacheKey) {
        self.send(RequestEvent::Started);
    }

    fn on_progress(&self, _key: &CacheKey, total: Option<u64>, completed: u64) {
        self.send(RequestEvent::Progress { total, completed });
    }

    fn on_completed(&self, _key: &CacheKey, image: ImageHandle, provenance: Provenance) {
        self.send(RequestEvent::Completed { image, provenance });
    }

    fn on_failed(&self, _key: &CacheKey, error: LoadError) {
        self.send(RequestEvent::Failed(error));
    }

    fn on_cancelled(&self, _key: &CacheKey) {
        self.send(RequestEvent::Cancelled);
    }
}
