//! Collaborators injected into the pipeline.
//!
//! The engine knows nothing about transports or image formats. Bytes come
//! from a [`ByteFetcher`]; pixels come from a [`Decoder`]. Both are stored
//! as trait objects, so async methods return boxed futures.

use std::fmt;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::BoxStream;

use super::error::{DecodeError, FetchError};
use crate::bitmap::{PixelBuffer, PixelFormat};
use crate::key::{ImageRequest, TargetSize};

/// Stream of body chunks.
pub type ByteStream = BoxStream<'static, Result<Bytes, FetchError>>;

/// Response to a fetch: optional length plus a body stream.
pub struct FetchResponse {
    /// Total body length when the transport knows it
    pub content_length: Option<u64>,
    /// Body chunks in order
    pub body: ByteStream,
}

impl FetchResponse {
    pub fn new(content_length: Option<u64>, body: ByteStream) -> Self {
        Self {
            content_length,
            body,
        }
    }
}

impl fmt::Debug for FetchResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchResponse")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Source of encoded bytes for network URIs.
///
/// Implementations should fail with [`FetchErrorKind::Timeout`] when the
/// transport gives up waiting; the pipeline retries those.
///
/// [`FetchErrorKind::Timeout`]: super::FetchErrorKind::Timeout
pub trait ByteFetcher: Send + Sync + 'static {
    /// Start fetching `uri`. Resolves once headers are available.
    fn fetch(&self, uri: &str) -> BoxFuture<'static, Result<FetchResponse, FetchError>>;
}

/// What a decode should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeTarget {
    /// Bounding box to fit into; zero means unconstrained
    pub size: TargetSize,
    /// Output pixel layout
    pub format: PixelFormat,
}

impl DecodeTarget {
    pub fn new(size: TargetSize, format: PixelFormat) -> Self {
        Self { size, format }
    }

    /// Returns true when the output dimensions are known before decoding.
    pub fn has_exact_size(&self) -> bool {
        self.size.width > 0 && self.size.height > 0
    }
}

impl From<&ImageRequest> for DecodeTarget {
    fn from(request: &ImageRequest) -> Self {
        Self::new(request.target, request.format)
    }
}

/// Turns encoded bytes into pixels.
///
/// Called from a blocking thread. When `reuse` is given, the decoder should
/// write into it if the output fits and fail with
/// [`DecodeErrorKind::IncompatibleBuffer`] otherwise; the pipeline then retries
/// once without a buffer.
///
/// [`DecodeErrorKind::IncompatibleBuffer`]: super::DecodeErrorKind::IncompatibleBuffer
pub trait Decoder: Send + Sync + 'static {
    fn decode(
        &self,
        data: &[u8],
        target: &DecodeTarget,
        reuse: Option<PixelBuffer>,
    ) -> Result<PixelBuffer, DecodeError>;
}
