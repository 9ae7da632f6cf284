//! Glimpse CLI - Command-line interface
//!
//! This binary provides a command-line interface to the Glimpse library:
//! loading images through the cache engine and managing the disk cache
//! and configuration file.

mod commands;
mod error;
mod runner;

use clap::{Parser, Subcommand};

use commands::cache::CacheAction;
use commands::config::ConfigCommands;
use commands::load::LoadArgs;
use error::CliError;
use runner::CliRunner;

#[derive(Parser)]
#[command(name = "glimpse")]
#[command(version = glimpse::VERSION)]
#[command(about = "Load images through a memory and disk cache", long_about = None)]
struct Cli {
    /// Also log to stdout at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load images, then load them again from memory
    Load(LoadArgs),

    /// Manage the disk cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Inspect the configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        e.exit();
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        // Config commands must work even when the file is invalid
        Commands::Config { command } => commands::config::run(command),
        Commands::Load(args) => {
            let runner = CliRunner::new(cli.verbose)?;
            commands::load::run(&runner, args)
        }
        Commands::Cache { action } => {
            let runner = CliRunner::new(cli.verbose)?;
            runner.log_startup("cache");
            commands::cache::run(&runner, action)
        }
    }
}
