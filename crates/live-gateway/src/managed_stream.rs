//! Managed streams
//!
//! Fan-out with a last-value cache so late-joining subscribers can be
//! brought up to date with the most recent frame of a channel.

use live_pipeline_core::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Last-value cache in front of a [`Broadcaster`]
pub struct ManagedStream {
    broadcaster: Arc<dyn Broadcaster>,
    last: RwLock<HashMap<String, Frame>>,
}

impl ManagedStream {
    pub fn new(broadcaster: Arc<dyn Broadcaster>) -> Self {
        Self {
            broadcaster,
            last: RwLock::new(HashMap::new()),
        }
    }

    /// Cache the frame as the channel's latest value, then broadcast it
    pub async fn push(&self, channel: &str, frame: &Frame) -> Result<()> {
        self.last
            .write()
            .await
            .insert(channel.to_string(), frame.clone());
        self.broadcaster.broadcast(channel, frame).await
    }

    /// Latest frame pushed to a channel
    pub async fn last_frame(&self, channel: &str) -> Option<Frame> {
        self.last.read().await.get(channel).cloned()
    }

    /// Channels with a cached frame, sorted
    pub async fn channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.last.read().await.keys().cloned().collect();
        channels.sort();
        channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::MemoryBroadcaster;

    fn frame(v: f64) -> Frame {
        Frame::new("f", vec![Field::new("v", FieldValues::Number(vec![Some(v)]))]).unwrap()
    }

    #[tokio::test]
    async fn test_push_caches_and_broadcasts() {
        let broadcaster = Arc::new(MemoryBroadcaster::new());
        let stream = ManagedStream::new(broadcaster.clone());

        stream.push("b/x", &frame(1.0)).await.unwrap();
        stream.push("a/x", &frame(2.0)).await.unwrap();
        stream.push("b/x", &frame(3.0)).await.unwrap();

        assert_eq!(broadcaster.count(), 3);
        assert_eq!(stream.last_frame("b/x").await, Some(frame(3.0)));
        assert_eq!(stream.last_frame("missing").await, None);
        assert_eq!(stream.channels().await, vec!["a/x", "b/x"]);
    }

    #[tokio::test]
    async fn test_cache_updated_even_when_broadcast_fails() {
        let stream = ManagedStream::new(Arc::new(MemoryBroadcaster::failing()));
        assert!(stream.push("a", &frame(1.0)).await.is_err());
        assert_eq!(stream.last_frame("a").await, Some(frame(1.0)));
    }
}
