//! Dispatch, disk probe and local file stages.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, instrument};

use super::{commit, decode, fail};
use crate::key::SourceKind;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::error::{FetchError, LoadError};
use crate::pipeline::job::Stage;
use crate::pipeline::state::{Provenance, RequestState};
use crate::registry::InFlightRequest;

/// Re-check memory, then route by source.
///
/// Local files go straight to the local pool. Everything else probes the
/// disk cache on the local pool first and reaches the network pool only on
/// a disk miss.
#[instrument(skip(ctx, request), fields(key = %request.key()))]
pub(crate) async fn dispatch(ctx: &PipelineContext, request: Arc<InFlightRequest>) {
    if request.is_cancelled() {
        return;
    }

    // Another request for the same key may have landed while queued
    if let Some(image) = ctx.memory.get(request.key()) {
        if request.advance(RequestState::CacheHit) {
            debug!("Memory hit at dispatch");
            commit(ctx, &request, image, Provenance::MemoryCache);
        }
        return;
    }

    if !request.advance(RequestState::FetchingLocal) {
        return;
    }

    match request.request().source() {
        SourceKind::File(path) => ctx.submit_local(request, Stage::ReadLocal(path)),
        SourceKind::Network => ctx.submit_local(request, Stage::ProbeDisk),
    }
}

/// Decode committed disk bytes, or hand the request to the network pool.
#[instrument(skip(ctx, request), fields(key = %request.key()))]
pub(crate) async fn probe_disk(ctx: &PipelineContext, request: Arc<InFlightRequest>) {
    if request.is_cancelled() {
        return;
    }

    let bytes = match ctx.disk.entry_for(request.key()).await {
        Some(entry) => ctx.disk.read_entry(&entry).await,
        None => None,
    };

    match bytes {
        Some(bytes) => {
            debug!(bytes = bytes.len(), "Disk cache hit");
            decode(ctx, &request, Bytes::from(bytes), Provenance::DiskCache).await;
        }
        None => {
            if request.advance(RequestState::FetchingNetwork) {
                ctx.submit_network(request);
            }
        }
    }
}

/// Read a local file and decode it.
#[instrument(skip(ctx, request, path), fields(key = %request.key(), path = %path.display()))]
pub(crate) async fn read_local(ctx: &PipelineContext, request: Arc<InFlightRequest>, path: PathBuf) {
    if request.is_cancelled() {
        return;
    }

    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            decode(ctx, &request, Bytes::from(bytes), Provenance::Local).await;
        }
        Err(e) => {
            let error = FetchError::from(e);
            fail(ctx, &request, LoadError::Fetch(error));
        }
    }
}
