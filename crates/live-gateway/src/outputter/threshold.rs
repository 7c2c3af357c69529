use crate::store::KeyedLocks;
use async_trait::async_trait;
use live_pipeline_core::condition::NumberCompareCondition;
use live_pipeline_core::prelude::*;
use std::sync::Arc;
use tracing::{debug, trace};

/// Emits an event frame when a field crosses a threshold
///
/// The previous observation of each channel is kept in the [`FrameStore`].
/// The first observation only establishes state. Afterwards an event is
/// broadcast to the destination channel whenever the condition flips:
///
/// | field       | type    | value                              |
/// |-------------|---------|------------------------------------|
/// | `time`      | time    | emission time                      |
/// | `value`     | number  | current sample                     |
/// | `previous`  | number  | previous sample                    |
/// | `direction` | string  | `up` or `down` (movement of value) |
/// | `active`    | boolean | condition state after the crossing |
pub struct ThresholdOutput {
    condition: NumberCompareCondition,
    channel: ChannelTemplate,
    broadcaster: Arc<dyn Broadcaster>,
    store: Arc<dyn FrameStore>,
    locks: Arc<KeyedLocks>,
}

impl ThresholdOutput {
    pub fn new(
        condition: NumberCompareCondition,
        channel: ChannelTemplate,
        broadcaster: Arc<dyn Broadcaster>,
        store: Arc<dyn FrameStore>,
        locks: Arc<KeyedLocks>,
    ) -> Self {
        Self {
            condition,
            channel,
            broadcaster,
            store,
            locks,
        }
    }

    fn state_key(&self, channel: &str) -> String {
        format!(
            "threshold/{}/{}@{}",
            self.condition.field_name(),
            self.channel.as_str(),
            channel
        )
    }

    fn event(&self, source: &Frame, value: f64, previous: f64, active: bool) -> Result<Frame> {
        let direction = if value >= previous { "up" } else { "down" };
        Frame::new(
            source.name(),
            vec![
                super::now_field(),
                Field::new("value", FieldValues::Number(vec![Some(value)])),
                Field::new("previous", FieldValues::Number(vec![Some(previous)])),
                Field::new("direction", FieldValues::String(vec![Some(direction.to_string())])),
                Field::new("active", FieldValues::Boolean(vec![Some(active)])),
            ],
        )
    }
}

#[async_trait]
impl Outputter for ThresholdOutput {
    async fn output(&self, ctx: &OutputContext, frame: &Frame) -> Result<()> {
        let Some(value) = self.condition.sample(frame) else {
            trace!(
                channel = ctx.channel(),
                field = self.condition.field_name(),
                "No numeric sample, skipping"
            );
            return Ok(());
        };

        let key = self.state_key(ctx.channel());
        let _guard = self.locks.lock(&key).await;

        let previous = self.store.get(&key).await?;
        self.store.set(&key, frame.clone()).await?;

        let Some(previous) = previous.and_then(|p| self.condition.sample(&p)) else {
            debug!(channel = ctx.channel(), value, "Threshold state established");
            return Ok(());
        };

        let was_active = self.condition.holds_for(previous);
        let active = self.condition.holds_for(value);
        if was_active == active {
            return Ok(());
        }

        let destination = self.channel.expand(&ctx.matched);
        debug!(
            channel = ctx.channel(),
            destination = %destination,
            value,
            previous,
            active,
            "Threshold crossed"
        );
        let event = self.event(frame, value, previous, active)?;
        self.broadcaster.broadcast(&destination, &event).await
    }

    fn name(&self) -> &'static str {
        "threshold"
    }
}
