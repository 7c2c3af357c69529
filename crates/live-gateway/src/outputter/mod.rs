//! Outputter implementations
//!
//! ## Outputter Types
//!
//! - **LocalSubscribersOutput** / **ManagedStreamOutput**: fan-out to the
//!   channel's subscribers
//! - **RedirectOutput**: re-emit under another channel
//! - **MultipleOutput**: run every child, aggregate failures
//! - **ConditionalOutput**: forward only when a condition holds
//! - **ThresholdOutput**: emit on threshold crossings (stateful)
//! - **ChangeLogOutput**: emit on value changes (stateful)
//! - **RemoteWriteOutput**: forward to a remote write backend

mod change_log;
mod local;
mod redirect;
mod remote_write;
mod threshold;

pub use change_log::ChangeLogOutput;
pub use local::{LocalSubscribersOutput, ManagedStreamOutput};
pub use redirect::RedirectOutput;
pub use remote_write::RemoteWriteOutput;
pub use threshold::ThresholdOutput;

use async_trait::async_trait;
use chrono::Utc;
use live_pipeline_core::prelude::*;
use tracing::{debug, warn};

/// Fan-out to an ordered list of outputters
///
/// Every child runs even when an earlier one failed; failures are combined
/// into a single error.
pub struct MultipleOutput {
    outputters: Vec<Box<dyn Outputter>>,
}

impl MultipleOutput {
    pub fn new(outputters: Vec<Box<dyn Outputter>>) -> Self {
        Self { outputters }
    }
}

#[async_trait]
impl Outputter for MultipleOutput {
    async fn output(&self, ctx: &OutputContext, frame: &Frame) -> Result<()> {
        let mut errors = Vec::new();
        for outputter in &self.outputters {
            if let Err(e) = outputter.output(ctx, frame).await {
                warn!(
                    channel = ctx.channel(),
                    outputter = outputter.name(),
                    error = %e,
                    "Output failed"
                );
                errors.push(e);
            }
        }
        match PipelineError::combine(errors) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn name(&self) -> &'static str {
        "multiple"
    }
}

/// Forwards to its child only when the condition holds
pub struct ConditionalOutput {
    condition: Box<dyn ConditionChecker>,
    outputter: Box<dyn Outputter>,
}

impl ConditionalOutput {
    pub fn new(condition: Box<dyn ConditionChecker>, outputter: Box<dyn Outputter>) -> Self {
        Self {
            condition,
            outputter,
        }
    }
}

#[async_trait]
impl Outputter for ConditionalOutput {
    async fn output(&self, ctx: &OutputContext, frame: &Frame) -> Result<()> {
        if !self.condition.check(frame) {
            debug!(
                channel = ctx.channel(),
                condition = self.condition.name(),
                "Condition not met"
            );
            return Ok(());
        }
        self.outputter.output(ctx, frame).await
    }

    fn name(&self) -> &'static str {
        "conditional"
    }
}

/// Single-row `time` column stamped now
pub(crate) fn now_field() -> Field {
    Field::new("time", FieldValues::Time(vec![Some(Utc::now())]))
}
