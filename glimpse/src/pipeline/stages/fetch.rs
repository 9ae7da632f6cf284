//! Fetch stage - streams bytes from the network into the disk cache.
//!
//! Each attempt stages the body into a disk [`WriteTarget`], falling back to
//! an in-memory buffer when the disk cache is unavailable or cannot make
//! room. Committed bytes are read back from disk and handed to the local
//! pool for decoding, so the network workers never decode.
//!
//! # Retries
//!
//! Only timeouts are retried, up to `max_retry_count` extra attempts with
//! exponential backoff. The staging file is discarded before every retry.
//! A disk write failure restarts the attempt with an in-memory sink and
//! does not count as a retry.

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use tracing::{debug, instrument, warn};

use super::fail;
use crate::cache::WriteTarget;
use crate::key::CacheKey;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::error::{FetchError, LoadError};
use crate::pipeline::job::Stage;
use crate::pipeline::state::Provenance;
use crate::registry::InFlightRequest;

/// Where an attempt writes the body.
enum Sink {
    Disk(WriteTarget),
    Memory(Vec<u8>),
}

impl Sink {
    async fn write(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        match self {
            Self::Disk(target) => target.write_chunk(chunk).await,
            Self::Memory(buffer) => {
                buffer.extend_from_slice(chunk);
                Ok(())
            }
        }
    }

    async fn discard(self) {
        if let Self::Disk(target) = self {
            target.discard().await;
        }
    }

    /// Publish the body and return its bytes.
    async fn finish(self, ctx: &PipelineContext) -> Result<Bytes, String> {
        match self {
            Self::Memory(buffer) => Ok(Bytes::from(buffer)),
            Self::Disk(target) => {
                let key = target.key().clone();
                let entry = target
                    .commit()
                    .await
                    .ok_or_else(|| format!("commit failed for {key}"))?;
                ctx.disk
                    .read_entry(&entry)
                    .await
                    .map(Bytes::from)
                    .ok_or_else(|| format!("read back failed for {key}"))
            }
        }
    }
}

/// Why one attempt ended without bytes.
#[derive(Debug)]
enum AttemptError {
    Cancelled,
    Fetch(FetchError),
    Storage(String),
}

/// Fetch the request's URI, retrying timeouts, and queue the decode.
#[instrument(skip(ctx, request), fields(key = %request.key()))]
pub(crate) async fn fetch(ctx: &PipelineContext, request: Arc<InFlightRequest>) {
    let token = request.cancel_token().clone();
    let mut retries = 0u32;
    let mut use_disk = true;

    let data = loop {
        if token.is_cancelled() {
            debug!("Cancelled before fetch");
            return;
        }

        match fetch_attempt(ctx, &request, use_disk).await {
            Ok(data) => break data,
            Err(AttemptError::Cancelled) => {
                debug!("Cancelled during fetch");
                return;
            }
            Err(AttemptError::Storage(reason)) => {
                warn!(reason = %reason, "Disk staging failed, refetching into memory");
                use_disk = false;
            }
            Err(AttemptError::Fetch(error))
                if error.is_retryable() && retries < ctx.config.max_retry_count =>
            {
                retries += 1;
                ctx.stats.lock().record_download_retry();
                let delay = ctx.config.backoff(retries);
                debug!(retry = retries, delay_ms = delay.as_millis() as u64, error = %error, "Retrying fetch");
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(AttemptError::Fetch(error)) => {
                ctx.stats.lock().record_download_failure();
                warn!(retries, error = %error, "Fetch failed");
                return fail(ctx, &request, LoadError::Fetch(error));
            }
        }
    };

    ctx.stats.lock().record_download(data.len() as u64);
    debug!(bytes = data.len(), retries, "Fetch complete");
    if request.is_cancelled() {
        return;
    }
    ctx.submit_local(request, Stage::Decode(data, Provenance::Network));
}

async fn fetch_attempt(
    ctx: &PipelineContext,
    request: &InFlightRequest,
    use_disk: bool,
) -> Result<Bytes, AttemptError> {
    let token = request.cancel_token();
    let timeout = ctx.config.fetch_timeout;
    let uri = request.request().uri.as_str();

    let response = tokio::select! {
        biased;
        _ = token.cancelled() => return Err(AttemptError::Cancelled),
        result = tokio::time::timeout(timeout, ctx.fetcher.fetch(uri)) => match result {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(AttemptError::Fetch(e)),
            Err(_) => {
                return Err(AttemptError::Fetch(FetchError::timeout(format!(
                    "no response within {}ms",
                    timeout.as_millis()
                ))))
            }
        },
    };

    let total = response.content_length;
    let mut body = response.body;
    let mut sink = if use_disk {
        open_sink(ctx, request.key(), total).await
    } else {
        Sink::Memory(Vec::new())
    };
    let mut completed = 0u64;

    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => {
                sink.discard().await;
                return Err(AttemptError::Cancelled);
            }
            next = tokio::time::timeout(timeout, body.next()) => next,
        };

        let chunk = match next {
            Ok(Some(Ok(chunk))) => chunk,
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                sink.discard().await;
                return Err(AttemptError::Fetch(e));
            }
            Err(_) => {
                sink.discard().await;
                return Err(AttemptError::Fetch(FetchError::timeout(format!(
                    "body stalled after {completed} bytes"
                ))));
            }
        };

        if let Err(e) = sink.write(&chunk).await {
            sink.discard().await;
            return Err(AttemptError::Storage(e.to_string()));
        }
        completed += chunk.len() as u64;
        request.report_progress(total, completed);
    }

    if token.is_cancelled() {
        sink.discard().await;
        return Err(AttemptError::Cancelled);
    }

    sink.finish(ctx).await.map_err(AttemptError::Storage)
}

/// Open a disk staging file, or a memory buffer if the disk cannot take it.
async fn open_sink(ctx: &PipelineContext, key: &CacheKey, content_length: Option<u64>) -> Sink {
    if let Some(length) = content_length {
        if !ctx.disk.apply_for_space(length).await {
            debug!(length, "No disk space for download, staging in memory");
            return Sink::Memory(Vec::new());
        }
    }

    match ctx.disk.create_write_target(key).await {
        Some(target) => Sink::Disk(target),
        None => Sink::Memory(Vec::new()),
    }
}
