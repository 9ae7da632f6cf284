//! Error types for the request pipeline.
//!
//! Fetch and decode errors come from the injected collaborators. Only
//! [`LoadError`] reaches listeners; it is cloneable so one outcome can be
//! fanned out to every caller attached to a request.

use std::fmt;

use thiserror::Error;

use crate::bitmap::PixelBuffer;

/// Category of a fetch failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchErrorKind {
    /// Connect or read timed out; retried by the pipeline
    Timeout,
    /// Server answered with a non-success status
    Status(u16),
    /// Local I/O failure (file sources, socket errors)
    Io,
    /// Anything else
    Other,
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("timeout"),
            Self::Status(code) => write!(f, "HTTP {}", code),
            Self::Io => f.write_str("I/O error"),
            Self::Other => f.write_str("error"),
        }
    }
}

/// Failure reported by a [`ByteFetcher`](super::ByteFetcher).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Timeout, message)
    }

    pub fn status(code: u16, message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Status(code), message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Io, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Other, message)
    }

    /// Only timeouts are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        self.kind == FetchErrorKind::Timeout
    }
}

impl From<std::io::Error> for FetchError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::TimedOut {
            Self::timeout(e.to_string())
        } else {
            Self::io(e.to_string())
        }
    }
}

/// Category of a decode failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecodeErrorKind {
    /// Bytes are not a valid image
    Corrupt,
    /// Valid image in a format the decoder cannot handle
    Unsupported,
    /// Allocation for the output failed
    OutOfMemory,
    /// The reusable buffer offered to the decoder cannot hold the output
    IncompatibleBuffer,
}

impl fmt::Display for DecodeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Corrupt => "corrupt image",
            Self::Unsupported => "unsupported format",
            Self::OutOfMemory => "out of memory",
            Self::IncompatibleBuffer => "incompatible buffer",
        })
    }
}

/// Failure reported by a [`Decoder`](super::Decoder).
///
/// May carry back the reusable buffer the decoder was given so the pipeline
/// can return it to the pool.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct DecodeError {
    pub kind: DecodeErrorKind,
    pub message: String,
    buffer: Option<PixelBuffer>,
}

impl DecodeError {
    pub fn new(kind: DecodeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            buffer: None,
        }
    }

    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::new(DecodeErrorKind::Corrupt, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(DecodeErrorKind::Unsupported, message)
    }

    pub fn out_of_memory(message: impl Into<String>) -> Self {
        Self::new(DecodeErrorKind::OutOfMemory, message)
    }

    pub fn incompatible_buffer(message: impl Into<String>) -> Self {
        Self::new(DecodeErrorKind::IncompatibleBuffer, message)
    }

    /// Attach the unused reusable buffer.
    pub fn with_buffer(mut self, buffer: Option<PixelBuffer>) -> Self {
        self.buffer = buffer;
        self
    }

    /// Take back the reusable buffer, if the decoder returned it.
    pub fn take_buffer(&mut self) -> Option<PixelBuffer> {
        self.buffer.take()
    }
}

/// Terminal failure delivered to request listeners.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// Encoded bytes could not be obtained
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// Bytes were obtained but could not be decoded
    #[error("decode failed ({kind}): {message}")]
    Decode {
        kind: DecodeErrorKind,
        message: String,
    },

    /// Dropped from a full worker queue before it started
    #[error("request discarded from a full queue")]
    Discarded,

    /// Every caller detached or the engine shut down
    #[error("request cancelled")]
    Cancelled,

    /// A pipeline stage panicked or a task was lost
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<DecodeError> for LoadError {
    fn from(e: DecodeError) -> Self {
        Self::Decode {
            kind: e.kind,
            message: e.message,
        }
    }
}
