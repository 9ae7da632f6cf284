//! Engine construction errors.

use thiserror::Error;

use crate::executor::ExecutorError;
use crate::pipeline::FetchError;

/// Errors that can occur while building a [`CacheEngine`](super::CacheEngine).
#[derive(Debug, Error)]
pub enum EngineError {
    /// Worker pools could not be started
    #[error("executor error: {0}")]
    Executor(#[from] ExecutorError),

    /// A configuration value the engine cannot run with
    #[error("invalid configuration for {field}: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    /// The default HTTP fetcher could not be created
    #[error("failed to create HTTP fetcher: {0}")]
    Fetcher(FetchError),
}
