//! Configuration for Glimpse.
//!
//! Two layers:
//!
//! - [`EngineConfig`] is what [`CacheEngine`](crate::engine::CacheEngine)
//!   is built from, assembled in code with `with_*` builders.
//! - [`ConfigFile`] is the user-editable `~/.glimpse/config.ini`, with
//!   sections `[cache]`, `[network]`, `[executor]` and `[logging]`.
//!   [`ConfigFile::to_engine_config`] bridges the two.
//!
//! # Example
//!
//! ```no_run
//! use glimpse::config::ConfigFile;
//!
//! let file = ConfigFile::load()?;
//! let config = file.to_engine_config();
//! # Ok::<(), glimpse::config::ConfigFileError>(())
//! ```

mod defaults;
mod engine;
mod file;
mod parser;
mod settings;
mod size;
mod writer;

pub use defaults::*;
pub use engine::EngineConfig;
pub use file::{config_directory, config_file_path, ConfigFileError};
pub use settings::{CacheSettings, ConfigFile, ExecutorSettings, LoggingSettings, NetworkSettings};
pub use size::{format_size, parse_size, SizeParseError};
