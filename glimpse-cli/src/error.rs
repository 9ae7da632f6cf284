//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process;

use glimpse::config::ConfigFileError;
use glimpse::{EngineError, LoadError};

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration file could not be read or written
    Config(ConfigFileError),
    /// Failed to start the async runtime
    Runtime(io::Error),
    /// Failed to build the cache engine
    Engine(EngineError),
    /// An image failed to load
    Load { uri: String, error: LoadError },
    /// The disk cache directory cannot be used
    CacheUnavailable(PathBuf),
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_) => 2,
            CliError::Load { .. } => 3,
            CliError::CacheUnavailable(_) => 4,
            _ => 1,
        }
    }

    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        match self {
            CliError::Config(ConfigFileError::InvalidValue { .. }) => {
                eprintln!();
                eprintln!("Fix the value in {}", glimpse::config::config_file_path().display());
                eprintln!("or run 'glimpse config show' to see the defaults.");
            }
            CliError::Load {
                error: LoadError::Fetch(_),
                ..
            } => {
                eprintln!();
                eprintln!("Check the URI and your network connection.");
            }
            _ => {}
        }

        process::exit(self.exit_code())
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(e) => write!(f, "Configuration error: {}", e),
            CliError::Runtime(e) => write!(f, "Failed to start runtime: {}", e),
            CliError::Engine(e) => write!(f, "Failed to start cache engine: {}", e),
            CliError::Load { uri, error } => write!(f, "Failed to load '{}': {}", uri, error),
            CliError::CacheUnavailable(path) => {
                write!(f, "Disk cache unavailable at '{}'", path.display())
            }
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Config(e) => Some(e),
            CliError::Runtime(e) => Some(e),
            CliError::Engine(e) => Some(e),
            CliError::Load { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::Config(e)
    }
}

impl From<EngineError> for CliError {
    fn from(e: EngineError) -> Self {
        CliError::Engine(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let load = CliError::Load {
            uri: "https://example.com/a.png".to_string(),
            error: LoadError::Discarded,
        };
        assert_eq!(load.exit_code(), 3);
        assert_eq!(CliError::LoggingInit("x".to_string()).exit_code(), 1);
        assert_eq!(
            CliError::CacheUnavailable(PathBuf::from("/nope")).exit_code(),
            4
        );
    }

    #[test]
    fn test_load_message_names_uri() {
        let e = CliError::Load {
            uri: "img:42".to_string(),
            error: LoadError::Cancelled,
        };
        assert_eq!(e.to_string(), "Failed to load 'img:42': request cancelled");
    }
}
