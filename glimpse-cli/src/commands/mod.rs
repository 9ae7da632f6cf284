//! CLI command implementations.
//!
//! Each subcommand has its own module with argument definitions and handlers.
//!
//! # Command Modules
//!
//! - [`cache`] - Disk cache management (stats, clear)
//! - [`config`] - Configuration file (path, show, init)
//! - [`load`] - Load images through the engine

pub mod cache;
pub mod config;
pub mod load;
