//! Cache key derivation for image requests.
//!
//! A request descriptor (source URI plus every decode parameter that changes
//! the output pixels) is folded into a stable [`CacheKey`] string. The same
//! key addresses the memory cache, the in-flight registry and, through
//! [`CacheKey::file_name`], the disk cache.
//!
//! # Key Format
//!
//! ```text
//! <uri>#<width>x<height>@<format>[;<transform>]
//! ```
//!
//! Requests without a target size use `0x0`, meaning "decode at natural size".

use std::fmt;
use std::path::PathBuf;

use sha2::{Digest, Sha256};

use crate::bitmap::PixelFormat;

/// File extension for committed disk cache entries.
pub const CACHE_FILE_EXTENSION: &str = "img";

/// Target dimensions for a decode.
///
/// A zero dimension means "unconstrained" on that axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TargetSize {
    pub width: u32,
    pub height: u32,
}

impl TargetSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Natural size: decode without downscaling.
    pub const fn natural() -> Self {
        Self {
            width: 0,
            height: 0,
        }
    }

    /// Returns true when neither axis is constrained.
    pub fn is_natural(&self) -> bool {
        self.width == 0 && self.height == 0
    }
}

impl fmt::Display for TargetSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Where the encoded bytes for a request come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    /// Fetched through the injected byte fetcher and cached on disk.
    Network,
    /// Read directly from the local filesystem; never disk cached.
    File(PathBuf),
}

/// Descriptor of a single image load.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRequest {
    /// Source identifier (URL, `file://` URI or bare absolute path)
    pub uri: String,
    /// Decode target size
    pub target: TargetSize,
    /// Output pixel format
    pub format: PixelFormat,
    /// Optional caller-defined transform tag (e.g. "rounded:8")
    pub transform: Option<String>,
}

impl ImageRequest {
    /// Create a request for the given URI at natural size in RGBA8888.
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            target: TargetSize::natural(),
            format: PixelFormat::Rgba8888,
            transform: None,
        }
    }

    /// Set the decode target size.
    pub fn with_target(mut self, width: u32, height: u32) -> Self {
        self.target = TargetSize::new(width, height);
        self
    }

    /// Set the output pixel format.
    pub fn with_format(mut self, format: PixelFormat) -> Self {
        self.format = format;
        self
    }

    /// Set a transform tag that becomes part of the key.
    pub fn with_transform(mut self, transform: impl Into<String>) -> Self {
        self.transform = Some(transform.into());
        self
    }

    /// Classify the source of this request.
    pub fn source(&self) -> SourceKind {
        if let Some(path) = self.uri.strip_prefix("file://") {
            SourceKind::File(PathBuf::from(path))
        } else if self.uri.starts_with('/') {
            SourceKind::File(PathBuf::from(&self.uri))
        } else {
            SourceKind::Network
        }
    }

    /// Derive the cache key for this request.
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::from_request(self)
    }
}

/// Stable cache key for a request descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Build a key from a request descriptor.
    pub fn from_request(request: &ImageRequest) -> Self {
        let mut key = format!(
            "{}#{}@{}",
            request.uri,
            request.target,
            request.format.tag()
        );
        if let Some(transform) = &request.transform {
            key.push(';');
            key.push_str(transform);
        }
        Self(key)
    }

    /// Wrap an already-encoded key string.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filesystem-safe name of the disk cache file for this key.
    ///
    /// SHA-256 of the key in lowercase hex, so names have a fixed length
    /// regardless of the URI.
    pub fn file_name(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        let mut name = String::with_capacity(digest.len() * 2 + 1 + CACHE_FILE_EXTENSION.len());
        for byte in digest {
            name.push_str(&format!("{:02x}", byte));
        }
        name.push('.');
        name.push_str(CACHE_FILE_EXTENSION);
        name
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&ImageRequest> for CacheKey {
    fn from(request: &ImageRequest) -> Self {
        Self::from_request(request)
    }
}
