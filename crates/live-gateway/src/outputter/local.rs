use crate::managed_stream::ManagedStream;
use async_trait::async_trait;
use live_pipeline_core::prelude::*;
use std::sync::Arc;

/// Broadcasts frames to the channel's current subscribers
pub struct LocalSubscribersOutput {
    broadcaster: Arc<dyn Broadcaster>,
}

impl LocalSubscribersOutput {
    pub fn new(broadcaster: Arc<dyn Broadcaster>) -> Self {
        Self { broadcaster }
    }
}

#[async_trait]
impl Outputter for LocalSubscribersOutput {
    async fn output(&self, ctx: &OutputContext, frame: &Frame) -> Result<()> {
        self.broadcaster.broadcast(ctx.channel(), frame).await
    }

    fn name(&self) -> &'static str {
        "localSubscribers"
    }
}

/// Broadcasts frames and keeps the channel's last value for late joiners
pub struct ManagedStreamOutput {
    stream: Arc<ManagedStream>,
}

impl ManagedStreamOutput {
    pub fn new(stream: Arc<ManagedStream>) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl Outputter for ManagedStreamOutput {
    async fn output(&self, ctx: &OutputContext, frame: &Frame) -> Result<()> {
        self.stream.push(ctx.channel(), frame).await
    }

    fn name(&self) -> &'static str {
        "ManagedStream"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::MemoryBroadcaster;
    use crate::outputter::testing::{ctx, number_frame};

    #[tokio::test]
    async fn test_local_subscribers() {
        let broadcaster = Arc::new(MemoryBroadcaster::new());
        let output = LocalSubscribersOutput::new(broadcaster.clone());
        output.output(&ctx("a/b"), &number_frame("v", 1.0)).await.unwrap();
        assert_eq!(broadcaster.published_to("a/b").len(), 1);
    }

    #[tokio::test]
    async fn test_managed_stream_keeps_last_value() {
        let broadcaster = Arc::new(MemoryBroadcaster::new());
        let stream = Arc::new(ManagedStream::new(broadcaster.clone()));
        let output = ManagedStreamOutput::new(stream.clone());

        output.output(&ctx("a/b"), &number_frame("v", 1.0)).await.unwrap();
        output.output(&ctx("a/b"), &number_frame("v", 2.0)).await.unwrap();

        let last = stream.last_frame("a/b").await.unwrap();
        assert_eq!(last.field("v").unwrap().last_number(), Some(2.0));
        assert_eq!(broadcaster.count(), 2);
    }
}
