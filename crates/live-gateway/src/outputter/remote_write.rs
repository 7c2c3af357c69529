use async_trait::async_trait;
use live_pipeline_core::prelude::*;
use live_pipeline_core::rules::RemoteWriteBackend;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Forwards frames to a remote write backend resolved at build time
///
/// Each write is bounded by the backend timeout (or the process default)
/// and by the message deadline, whichever is sooner. Failures are reported,
/// never retried.
pub struct RemoteWriteOutput {
    backend: RemoteWriteBackend,
    writer: Arc<dyn RemoteWriter>,
    default_timeout: Duration,
}

impl RemoteWriteOutput {
    pub fn new(
        backend: RemoteWriteBackend,
        writer: Arc<dyn RemoteWriter>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            writer,
            default_timeout,
        }
    }

    pub fn backend(&self) -> &RemoteWriteBackend {
        &self.backend
    }

    fn budget(&self, ctx: &OutputContext) -> Duration {
        let timeout = self.backend.settings.timeout.unwrap_or(self.default_timeout);
        match ctx.remaining() {
            Some(remaining) => timeout.min(remaining),
            None => timeout,
        }
    }
}

#[async_trait]
impl Outputter for RemoteWriteOutput {
    async fn output(&self, ctx: &OutputContext, frame: &Frame) -> Result<()> {
        let budget = self.budget(ctx);
        let operation = format!("remote write to {}", self.backend.uid);
        if budget.is_zero() {
            return Err(PipelineError::timeout(operation, 0));
        }

        match tokio::time::timeout(budget, self.writer.write(&self.backend, ctx.channel(), frame))
            .await
        {
            Ok(result) => {
                if result.is_ok() {
                    debug!(uid = %self.backend.uid, channel = ctx.channel(), "Frame written");
                }
                result
            }
            Err(_) => {
                warn!(
                    uid = %self.backend.uid,
                    channel = ctx.channel(),
                    budget_ms = budget.as_millis() as u64,
                    "Remote write timed out"
                );
                Err(PipelineError::timeout(operation, budget.as_millis() as u64))
            }
        }
    }

    fn name(&self) -> &'static str {
        "remoteWrite"
    }
}
