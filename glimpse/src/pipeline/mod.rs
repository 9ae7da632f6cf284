//! Request execution pipeline.
//!
//! A request that misses the memory cache moves through executor pools as
//! a chain of stage jobs:
//!
//! ```text
//! submit → [dispatch pool] dispatch
//!            ├─ file ─► [local pool] read_local ──────► decode ─┐
//!            └─ uri ──► [local pool] probe_disk ─ hit ► decode ─┤
//!                              │ miss                           │
//!                              └──► [network pool] fetch        │
//!                                         └──► [local pool] decode
//!                                                               ▼
//!                                 commit ──► memory cache ──► listeners
//! ```
//!
//! # Collaborators
//!
//! Transports and image formats are injected through [`ByteFetcher`] and
//! [`Decoder`]. Decoding is bounded by the local pool's workers; each
//! decoder call runs on the blocking thread pool.
//!
//! # Lifecycle
//!
//! Every request carries a [`RequestState`]; the in-flight request rejects
//! transitions the lifecycle does not allow.

mod context;
mod error;
mod job;
mod stages;
mod state;
mod traits;

pub use context::{
    PipelineConfig, PipelineContext, DEFAULT_FETCH_TIMEOUT, DEFAULT_MAX_RETRY_COUNT,
    DEFAULT_RETRY_BASE_DELAY,
};
pub use error::{DecodeError, DecodeErrorKind, FetchError, FetchErrorKind, LoadError};
pub use job::{Stage, StageJob};
pub use state::{Provenance, RequestState};
pub use traits::{ByteFetcher, ByteStream, DecodeTarget, Decoder, FetchResponse};
