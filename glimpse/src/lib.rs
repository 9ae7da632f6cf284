//! Glimpse - image loading with memory and disk caching
//!
//! This library fetches encoded images over the network or from local files,
//! decodes them to pixel buffers and caches them at two tiers: decoded images
//! in memory, encoded bytes on disk.
//!
//! # High-Level API
//!
//! For most use cases, [`engine::CacheEngine`] is the only type needed:
//!
//! ```no_run
//! use glimpse::config::EngineConfig;
//! use glimpse::engine::CacheEngine;
//! use glimpse::key::ImageRequest;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = CacheEngine::new(EngineConfig::default())?;
//!
//! let request = ImageRequest::new("https://example.com/photo.jpg").with_target(256, 256);
//! let loaded = engine.load(request).await?;
//! println!("{}x{} from {}", loaded.image.width(), loaded.image.height(), loaded.provenance);
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod bitmap;
pub mod cache;
pub mod config;
pub mod engine;
pub mod executor;
pub mod key;
pub mod logging;
pub mod pipeline;
pub mod pool;
pub mod registry;
pub mod system;

pub use engine::{CacheEngine, EngineError, EngineStats, LoadedImage, TrimLevel};
pub use key::{CacheKey, ImageRequest};
pub use pipeline::{LoadError, Provenance};
pub use registry::{RequestHandle, RequestListener};

/// Version of the Glimpse library and CLI.
///
/// This is synchronized across all components in the workspace.
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_not_empty() {
        assert!(!VERSION.is_empty());
    }
}
