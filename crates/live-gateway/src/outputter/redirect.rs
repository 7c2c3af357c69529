use async_trait::async_trait;
use live_pipeline_core::prelude::*;
use std::sync::Arc;
use tracing::trace;

/// Re-emits frames under another channel
///
/// The destination may reference captures of the rule's pattern, e.g.
/// `stream/{source}/>` redirecting to `derived/{source}`.
pub struct RedirectOutput {
    channel: ChannelTemplate,
    broadcaster: Arc<dyn Broadcaster>,
}

impl RedirectOutput {
    pub fn new(channel: ChannelTemplate, broadcaster: Arc<dyn Broadcaster>) -> Self {
        Self {
            channel,
            broadcaster,
        }
    }
}

#[async_trait]
impl Outputter for RedirectOutput {
    async fn output(&self, ctx: &OutputContext, frame: &Frame) -> Result<()> {
        let destination = self.channel.expand(&ctx.matched);
        trace!(from = ctx.channel(), to = %destination, "Redirecting frame");
        self.broadcaster.broadcast(&destination, frame).await
    }

    fn name(&self) -> &'static str {
        "redirect"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::MemoryBroadcaster;
    use crate::outputter::testing::number_frame;

    #[tokio::test]
    async fn test_redirect_substitutes_captures() {
        let pattern = ChannelPattern::parse("stream/{source}/{metric}").unwrap();
        let template = ChannelTemplate::parse("derived/{metric}/{source}", &pattern).unwrap();
        let broadcaster = Arc::new(MemoryBroadcaster::new());
        let output = RedirectOutput::new(template, broadcaster.clone());

        let matched = pattern.matches("stream/telegraf/cpu").unwrap();
        let frame = number_frame("v", 1.0);
        output.output(&OutputContext::new(matched), &frame).await.unwrap();

        assert_eq!(broadcaster.published_to("derived/cpu/telegraf"), vec![frame]);
        assert!(broadcaster.published_to("stream/telegraf/cpu").is_empty());
    }
}
