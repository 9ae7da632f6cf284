//! Decode stage - turns encoded bytes into a pooled pixel buffer.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, instrument};

use super::{commit, fail};
use crate::bitmap::{DecodedImage, PixelBuffer};
use crate::pipeline::context::PipelineContext;
use crate::pipeline::error::{DecodeError, DecodeErrorKind, LoadError};
use crate::pipeline::state::{Provenance, RequestState};
use crate::pipeline::traits::DecodeTarget;
use crate::registry::InFlightRequest;

/// Decode `data` for the request and commit the result.
///
/// A reusable buffer is taken from the pool when the output dimensions are
/// known up front. If the decoder rejects it, decoding is retried once
/// without a buffer.
#[instrument(skip(ctx, request, data), fields(key = %request.key(), bytes = data.len()))]
pub(crate) async fn decode(
    ctx: &PipelineContext,
    request: &InFlightRequest,
    data: Bytes,
    provenance: Provenance,
) {
    if request.is_cancelled() {
        return;
    }
    if !request.advance(RequestState::Decoding) && request.state().is_terminal() {
        return;
    }

    let target = DecodeTarget::from(request.request());
    let reuse = if target.has_exact_size() {
        ctx.pool
            .get(target.size.width, target.size.height, target.format)
    } else {
        None
    };

    let first = match run_decoder(ctx, data.clone(), target, reuse).await {
        Ok(result) => result,
        Err(error) => return fail(ctx, request, error),
    };

    let result = match first {
        Err(mut e) if e.kind == DecodeErrorKind::IncompatibleBuffer => {
            if let Some(buffer) = e.take_buffer() {
                ctx.pool.put(buffer);
            }
            debug!(reason = %e.message, "Reusable buffer rejected, decoding without one");
            match run_decoder(ctx, data, target, None).await {
                Ok(result) => result,
                Err(error) => return fail(ctx, request, error),
            }
        }
        other => other,
    };

    match result {
        Ok(buffer) => {
            if request.is_cancelled() {
                ctx.pool.put(buffer);
                return;
            }
            let image = DecodedImage::pooled(buffer, &ctx.pool).into_handle();
            commit(ctx, request, image, provenance);
        }
        Err(mut e) => {
            if let Some(buffer) = e.take_buffer() {
                ctx.pool.put(buffer);
            }
            fail(ctx, request, LoadError::from(e));
        }
    }
}

/// Run the decoder on the blocking pool.
///
/// A decoder panic is resumed on the calling worker so the job's panic
/// handler fails the request.
async fn run_decoder(
    ctx: &PipelineContext,
    data: Bytes,
    target: DecodeTarget,
    reuse: Option<PixelBuffer>,
) -> Result<Result<PixelBuffer, DecodeError>, LoadError> {
    let decoder = Arc::clone(&ctx.decoder);
    match tokio::task::spawn_blocking(move || decoder.decode(&data, &target, reuse)).await {
        Ok(result) => Ok(result),
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => Err(LoadError::Internal(format!("decode task failed: {e}"))),
    }
}
