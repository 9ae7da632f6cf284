//! Concrete collaborators for the pipeline.
//!
//! - [`HttpFetcher`] streams bytes over HTTP(S) with `reqwest`
//! - [`ImageDecoder`] decodes PNG, JPEG, GIF and WebP with the `image` crate
//!
//! Both are optional; the engine accepts any [`ByteFetcher`] and
//! [`Decoder`].
//!
//! [`ByteFetcher`]: crate::pipeline::ByteFetcher
//! [`Decoder`]: crate::pipeline::Decoder

mod decoder;
mod http;

pub use decoder::ImageDecoder;
pub use http::{HttpFetcher, DEFAULT_USER_AGENT};
