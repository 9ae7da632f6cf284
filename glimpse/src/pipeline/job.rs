//! Pipeline stages wrapped as executor jobs.

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use super::context::PipelineContext;
use super::error::LoadError;
use super::stages;
use super::state::Provenance;
use crate::executor::{Job, PanicHandler};
use crate::registry::{InFlightRequest, Outcome};

/// Which step a job performs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    /// Re-check memory and route by source (dispatch pool)
    Dispatch,
    /// Look for committed bytes on disk (local pool)
    ProbeDisk,
    /// Read a local file (local pool)
    ReadLocal(PathBuf),
    /// Fetch from the network (network pool)
    Fetch,
    /// Decode fetched bytes (local pool)
    Decode(Bytes, Provenance),
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Dispatch => "dispatch",
            Self::ProbeDisk => "probe-disk",
            Self::ReadLocal(_) => "read-local",
            Self::Fetch => "fetch",
            Self::Decode(..) => "decode",
        })
    }
}

/// One stage of one request.
pub struct StageJob {
    ctx: PipelineContext,
    request: Arc<InFlightRequest>,
    stage: Stage,
}

impl StageJob {
    pub fn new(ctx: PipelineContext, request: Arc<InFlightRequest>, stage: Stage) -> Self {
        Self {
            ctx,
            request,
            stage,
        }
    }
}

impl Job for StageJob {
    fn name(&self) -> String {
        format!("{} {}", self.stage, self.request.key())
    }

    fn run(self: Box<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        let StageJob {
            ctx,
            request,
            stage,
        } = *self;

        Box::pin(async move {
            match stage {
                Stage::Dispatch => stages::dispatch(&ctx, request).await,
                Stage::ProbeDisk => stages::probe_disk(&ctx, request).await,
                Stage::ReadLocal(path) => stages::read_local(&ctx, request, path).await,
                Stage::Fetch => stages::fetch(&ctx, request).await,
                Stage::Decode(data, provenance) => {
                    stages::decode(&ctx, &request, data, provenance).await
                }
            }
        })
    }

    fn discard(self: Box<Self>) {
        debug!(key = %self.request.key(), stage = %self.stage, "Stage discarded");
        self.ctx
            .registry
            .finish(&self.request, Outcome::Failed(LoadError::Discarded));
    }

    fn on_panic(&self) -> Option<PanicHandler> {
        let registry = Arc::clone(&self.ctx.registry);
        let request = Arc::clone(&self.request);
        let stage = self.stage.to_string();
        Some(Box::new(move |message| {
            registry.finish(
                &request,
                Outcome::Failed(LoadError::Internal(format!("{stage} stage panicked: {message}"))),
            );
        }))
    }
}
