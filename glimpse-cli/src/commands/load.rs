//! Load command - fetch, decode and cache images.
//!
//! Each URI is loaded twice: the first load shows where the pixels came
//! from (network, disk cache or local file), the second shows the memory
//! cache hit.

use std::sync::Arc;
use std::time::Instant;

use clap::Args;
use tracing::info;

use glimpse::bitmap::PixelFormat;
use glimpse::config::format_size;
use glimpse::engine::CacheEngine;
use glimpse::registry::{ChannelListener, RequestEvent};
use glimpse::{ImageRequest, Provenance};

use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for `glimpse load`.
#[derive(Debug, Args)]
pub struct LoadArgs {
    /// URIs to load (http(s)://, file:// or absolute paths)
    #[arg(required = true)]
    pub uris: Vec<String>,

    /// Target width in pixels (0 = natural)
    #[arg(long, default_value_t = 0)]
    pub width: u32,

    /// Target height in pixels (0 = natural)
    #[arg(long, default_value_t = 0)]
    pub height: u32,

    /// Output pixel format (rgba8888, rgb565, alpha8)
    #[arg(long, default_value = "rgba8888")]
    pub format: PixelFormat,
}

impl LoadArgs {
    fn request(&self, uri: &str) -> ImageRequest {
        ImageRequest::new(uri)
            .with_target(self.width, self.height)
            .with_format(self.format)
    }
}

/// Run the load command.
pub fn run(runner: &CliRunner, args: LoadArgs) -> Result<(), CliError> {
    runner.log_startup("load");
    let runtime = runner.runtime()?;

    runtime.block_on(async {
        let engine = runner.create_engine()?;
        let mut failures = Vec::new();

        for uri in &args.uris {
            println!("{}", uri);
            let first = load_with_progress(&engine, args.request(uri)).await;
            if let Err(error) = first {
                println!("  failed: {}", error);
                failures.push(CliError::Load {
                    uri: uri.clone(),
                    error,
                });
                continue;
            }
            // Second load of the same request is served from memory
            if let Err(error) = load_with_progress(&engine, args.request(uri)).await {
                failures.push(CliError::Load {
                    uri: uri.clone(),
                    error,
                });
            }
        }

        let stats = engine.stats();
        println!();
        print!("{}", stats.cache.format());
        println!(
            "Requests: {} ({} coalesced)",
            stats.registry.total_requests, stats.registry.coalesced_requests
        );

        engine.shutdown();
        match failures.into_iter().next() {
            Some(error) => Err(error),
            None => Ok::<(), CliError>(()),
        }
    })
}

/// Submit one request and print its events until it finishes.
async fn load_with_progress(
    engine: &CacheEngine,
    request: ImageRequest,
) -> Result<Provenance, glimpse::LoadError> {
    let started = Instant::now();
    let (listener, mut events) = ChannelListener::new();
    let _handle = engine.submit(request, Arc::new(listener));

    while let Some(event) = events.recv().await {
        match event {
            RequestEvent::Started => println!("  started"),
            RequestEvent::Progress { total, completed } => match total {
                Some(total) => println!(
                    "  progress: {} / {}",
                    format_size(completed as usize),
                    format_size(total as usize)
                ),
                None => println!("  progress: {}", format_size(completed as usize)),
            },
            RequestEvent::Completed { image, provenance } => {
                let elapsed = started.elapsed();
                println!(
                    "  completed: {}x{} {} from {} in {:.1?}",
                    image.width(),
                    image.height(),
                    image.format(),
                    provenance,
                    elapsed
                );
                info!(
                    width = image.width(),
                    height = image.height(),
                    provenance = %provenance,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Image loaded"
                );
                return Ok(provenance);
            }
            RequestEvent::Failed(error) => return Err(error),
            RequestEvent::Cancelled => return Err(glimpse::LoadError::Cancelled),
        }
    }

    Err(glimpse::LoadError::Internal(
        "listener dropped without an outcome".to_string(),
    ))
}
