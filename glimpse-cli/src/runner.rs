//! CLI runner for common setup and operations.
//!
//! Encapsulates configuration loading, logging initialization, runtime and
//! engine creation to reduce duplication across command handlers.

use tokio::runtime::Runtime;
use tracing::info;

use glimpse::config::ConfigFile;
use glimpse::engine::CacheEngine;
use glimpse::logging::{init_logging, LoggingGuard, DEFAULT_LOG_FILE};

use crate::error::CliError;

/// Runner that manages CLI lifecycle and common operations.
pub struct CliRunner {
    /// Logging guard - keeps logging active while runner exists
    #[allow(dead_code)]
    logging_guard: LoggingGuard,
    /// Loaded configuration file
    config: ConfigFile,
}

impl CliRunner {
    /// Load config and initialize logging.
    ///
    /// # Arguments
    ///
    /// * `verbose` - Also log to stdout, at debug level unless `RUST_LOG` is set
    pub fn new(verbose: bool) -> Result<Self, CliError> {
        // Load config file (or use defaults if not present)
        let config = ConfigFile::load()?;

        let level = if verbose {
            "debug"
        } else {
            config.logging.level.as_str()
        };
        let logging_guard =
            init_logging(&config.logging.directory, DEFAULT_LOG_FILE, level, verbose)
                .map_err(|e| CliError::LoggingInit(e.to_string()))?;

        Ok(Self {
            logging_guard,
            config,
        })
    }

    /// Get the loaded configuration.
    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    /// Log startup information for a command.
    pub fn log_startup(&self, command: &str) {
        info!("Glimpse v{}", glimpse::VERSION);
        info!("Glimpse CLI: {} command", command);
    }

    /// Create a multi-threaded runtime for async commands.
    pub fn runtime(&self) -> Result<Runtime, CliError> {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("glimpse")
            .build()
            .map_err(CliError::Runtime)
    }

    /// Create an engine from the loaded configuration.
    ///
    /// Must be called inside `runtime`.
    pub fn create_engine(&self) -> Result<CacheEngine, CliError> {
        let engine = CacheEngine::new(self.config.to_engine_config())?;
        info!("Cache engine created");
        Ok(engine)
    }
}
