//! Cache management CLI commands.

use clap::Subcommand;

use glimpse::cache::DiskCache;
use glimpse::config::format_size;

use crate::error::CliError;
use crate::runner::CliRunner;

/// Cache action subcommands.
#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Clear the disk cache, removing all cached images
    Clear,
    /// Show disk cache statistics
    Stats,
}

/// Run a cache subcommand.
pub fn run(runner: &CliRunner, action: CacheAction) -> Result<(), CliError> {
    let config = runner.config().to_engine_config();
    let runtime = runner.runtime()?;
    let disk = DiskCache::new(config.disk);

    runtime.block_on(async {
        let Some(cache_dir) = disk.directory().await.map(|p| p.to_path_buf()) else {
            return Err(CliError::CacheUnavailable(disk.config().directory.clone()));
        };

        match action {
            CacheAction::Clear => {
                println!("Clearing disk cache at: {}", cache_dir.display());
                let before = disk.usage().await;
                let removed = disk.clear().await;
                println!(
                    "Deleted {} files, freed {}",
                    removed,
                    format_size(before.bytes as usize)
                );
            }
            CacheAction::Stats => {
                let usage = disk.usage().await;
                println!("Disk cache: {}", cache_dir.display());
                println!("  Files:   {}", usage.files);
                println!("  Size:    {}", format_size(usage.bytes as usize));
                println!(
                    "  Reserve: {}",
                    format_size(disk.config().reserve_bytes as usize)
                );
            }
        }
        Ok(())
    })
}
