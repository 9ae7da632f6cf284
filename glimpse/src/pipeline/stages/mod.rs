//! Pipeline stage implementations.
//!
//! ```text
//! dispatch ──► probe_disk ──hit──────────────────► decode ──► commit
//!    │             │                                 ▲
//!    │             └─miss─► fetch (network) ─► queue ┤
//!    └─file─► read_local ────────────────────────────┘
//! ```
//!
//! `decode` always runs on a local pool worker: inline after a disk hit or
//! a local read, and as its own queued job after a network fetch.
//!
//! Every stage checks the request's cancellation token before doing work
//! and before handing its result on. A cancelled request is simply
//! abandoned: its listeners were told when they detached.

mod decode;
mod dispatch;
mod fetch;

pub(crate) use decode::decode;
pub(crate) use dispatch::{dispatch, probe_disk, read_local};
pub(crate) use fetch::fetch;

use std::sync::Arc;

use tracing::debug;

use super::context::PipelineContext;
use super::error::LoadError;
use super::state::Provenance;
use crate::bitmap::ImageHandle;
use crate::registry::{InFlightRequest, Outcome};

/// Cache a decoded image and deliver it to every caller.
///
/// If the request ended between the cancellation check and delivery, the
/// memory insert is rolled back so nothing is cached for a cancelled load.
pub(crate) fn commit(
    ctx: &PipelineContext,
    request: &InFlightRequest,
    image: ImageHandle,
    provenance: Provenance,
) {
    if request.is_cancelled() {
        debug!(key = %request.key(), "Cancelled before commit");
        return;
    }

    ctx.memory.put(request.key().clone(), Arc::clone(&image));
    let delivered = ctx.registry.finish(
        request,
        Outcome::Completed {
            image: Arc::clone(&image),
            provenance,
        },
    );
    if !delivered {
        ctx.memory.remove_entry(request.key(), &image);
    }
}

/// Deliver a failure to every caller.
pub(crate) fn fail(ctx: &PipelineContext, request: &InFlightRequest, error: LoadError) {
    debug!(key = %request.key(), error = %error, "Request failed");
    ctx.registry.finish(request, Outcome::Failed(error));
}
