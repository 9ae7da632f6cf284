//! Shared fakes for engine integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::StreamExt;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::{mpsc, Semaphore};

use glimpse::bitmap::PixelBuffer;
use glimpse::cache::SpaceProbe;
use glimpse::config::EngineConfig;
use glimpse::engine::CacheEngine;
use glimpse::pipeline::{
    ByteFetcher, DecodeError, DecodeTarget, Decoder, FetchError, FetchResponse,
};
use glimpse::registry::{ChannelListener, RequestEvent};

// =============================================================================
// Fetcher
// =============================================================================

/// One scripted reply of the fake fetcher.
#[derive(Clone)]
pub enum Reply {
    /// Body delivered in two chunks
    Body(Vec<u8>),
    /// Immediate timeout error
    Timeout,
    /// Non-success status
    Status(u16),
    /// Body delivered after a permit is added to the gate
    Gated(Arc<Semaphore>, Vec<u8>),
}

/// Byte fetcher serving scripted replies per URI.
///
/// Once a URI's script is exhausted it serves the URI itself as the body.
#[derive(Default)]
pub struct FakeFetcher {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<HashMap<String, usize>>,
    total_calls: AtomicUsize,
}

impl FakeFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, uri: &str, replies: Vec<Reply>) {
        self.scripts
            .lock()
            .insert(uri.to_string(), replies.into_iter().collect());
    }

    pub fn calls(&self, uri: &str) -> usize {
        self.calls.lock().get(uri).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.total_calls.load(Ordering::SeqCst)
    }
}

fn two_chunks(body: Vec<u8>) -> FetchResponse {
    let len = body.len() as u64;
    let mid = body.len() / 2;
    let bytes = Bytes::from(body);
    let chunks = vec![Ok(bytes.slice(..mid)), Ok(bytes.slice(mid..))];
    FetchResponse::new(Some(len), futures::stream::iter(chunks).boxed())
}

impl ByteFetcher for FakeFetcher {
    fn fetch(&self, uri: &str) -> BoxFuture<'static, Result<FetchResponse, FetchError>> {
        *self.calls.lock().entry(uri.to_string()).or_default() += 1;
        self.total_calls.fetch_add(1, Ordering::SeqCst);

        let reply = self
            .scripts
            .lock()
            .get_mut(uri)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Reply::Body(uri.as_bytes().to_vec()));

        Box::pin(async move {
            match reply {
                Reply::Body(body) => Ok(two_chunks(body)),
                Reply::Timeout => Err(FetchError::timeout("scripted timeout")),
                Reply::Status(code) => Err(FetchError::status(code, "scripted status")),
                Reply::Gated(gate, body) => {
                    let _permit = gate
                        .acquire()
                        .await
                        .map_err(|_| FetchError::other("gate closed"))?;
                    Ok(two_chunks(body))
                }
            }
        })
    }
}

// =============================================================================
// Decoder
// =============================================================================

/// Decoder that fills the target size (2x2 when natural) with the first
/// input byte. Input starting with `bad` is corrupt.
#[derive(Default)]
pub struct FakeDecoder {
    decodes: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    /// Blocking time per decode
    delay: Duration,
    /// Reject every reusable buffer as incompatible
    reject_reuse: bool,
}

impl FakeDecoder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Decoder that blocks its thread for `delay` on every decode.
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    /// Decoder that only accepts freshly allocated output.
    pub fn rejecting_reuse() -> Arc<Self> {
        Arc::new(Self {
            reject_reuse: true,
            ..Self::default()
        })
    }

    pub fn decodes(&self) -> usize {
        self.decodes.load(Ordering::SeqCst)
    }

    /// Most decodes ever running at the same time.
    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn decode_into(
        &self,
        data: &[u8],
        target: &DecodeTarget,
        reuse: Option<PixelBuffer>,
    ) -> Result<PixelBuffer, DecodeError> {
        if self.reject_reuse && reuse.is_some() {
            return Err(DecodeError::incompatible_buffer("scripted rejection").with_buffer(reuse));
        }
        if data.starts_with(b"bad") {
            return Err(DecodeError::corrupt("scripted corrupt input").with_buffer(reuse));
        }

        let (width, height) = if target.size.is_natural() {
            (2, 2)
        } else {
            (target.size.width.max(1), target.size.height.max(1))
        };
        let mut buffer = match reuse {
            Some(mut buffer) => {
                if !buffer.reconfigure(width, height, target.format) {
                    return Err(
                        DecodeError::incompatible_buffer("too small").with_buffer(Some(buffer))
                    );
                }
                buffer
            }
            None => PixelBuffer::allocate(width, height, target.format),
        };
        let fill = data.first().copied().unwrap_or(0);
        buffer.pixels_mut().fill(fill);
        Ok(buffer)
    }
}

impl Decoder for FakeDecoder {
    fn decode(
        &self,
        data: &[u8],
        target: &DecodeTarget,
        reuse: Option<PixelBuffer>,
    ) -> Result<PixelBuffer, DecodeError> {
        self.decodes.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        let result = self.decode_into(data, target, reuse);
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

// =============================================================================
// Disk space
// =============================================================================

/// Space probe reporting a fixed amount of free space.
pub struct PlentifulSpace;

impl SpaceProbe for PlentifulSpace {
    fn available_bytes(&self, _dir: &Path) -> io::Result<u64> {
        Ok(u64::MAX / 2)
    }
}

// =============================================================================
// Listener
// =============================================================================

/// Listener whose events are collected by the returned [`Events`].
pub fn recording_listener() -> (Arc<ChannelListener>, Events) {
    let (listener, rx) = ChannelListener::new();
    (Arc::new(listener), Events { rx, seen: Vec::new() })
}

/// Receiving side of a [`recording_listener`].
pub struct Events {
    rx: mpsc::UnboundedReceiver<RequestEvent>,
    pub seen: Vec<RequestEvent>,
}

impl Events {
    /// Wait for the terminal event, keeping everything before it.
    pub async fn terminal(&mut self) -> RequestEvent {
        let wait = async {
            while let Some(event) = self.rx.recv().await {
                self.seen.push(event.clone());
                if event.is_terminal() {
                    return event;
                }
            }
            panic!("listener dropped without a terminal event");
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .expect("no terminal event within 5s")
    }

    /// Events already delivered, without waiting.
    pub fn drain(&mut self) -> &[RequestEvent] {
        while let Ok(event) = self.rx.try_recv() {
            self.seen.push(event);
        }
        &self.seen
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Engine config rooted in `dir` with fast retries.
pub fn test_config(dir: &TempDir) -> EngineConfig {
    EngineConfig::default()
        .with_disk_cache_dir(dir.path().join("cache"))
        .with_disk_cache_fallback_dir(None)
        .with_memory_cache_max_bytes(4 * 1024 * 1024)
        .with_buffer_pool_max_bytes(1024 * 1024)
        .with_fetch_timeout(Duration::from_secs(5))
        .with_retry_base_delay(Duration::from_millis(1))
}

pub fn build_engine(
    config: EngineConfig,
    fetcher: &Arc<FakeFetcher>,
    decoder: &Arc<FakeDecoder>,
) -> CacheEngine {
    CacheEngine::builder(config)
        .fetcher(Arc::clone(fetcher) as Arc<dyn ByteFetcher>)
        .decoder(Arc::clone(decoder) as Arc<dyn Decoder>)
        .space_probe(Arc::new(PlentifulSpace))
        .build()
        .expect("engine builds")
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 2s"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
