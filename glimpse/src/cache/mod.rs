//! Two-tier cache system for decoded images and encoded bytes.
//!
//! The memory tier holds decoded images keyed by request; the disk tier
//! holds the encoded bytes fetched from the network so a later decode at any
//! size can skip the download.

mod disk;
mod memory;
mod stats;
mod types;

pub use disk::{
    DiskCache, DiskUsage, SpaceProbe, SpaceReclaim, VolumeSpace, WriteTarget, STAGING_EXTENSION,
};
pub use memory::{MemoryCache, DEFAULT_SURVIVABLE_ENTRIES};
pub use stats::CacheStats;
pub use types::{
    DiskCacheConfig, DiskCacheEntry, DiskCacheError, EvictionListener, EvictionReason,
    DEFAULT_DISK_RESERVE_BYTES,
};
