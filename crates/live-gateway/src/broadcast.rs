//! Channel broadcasters
//!
//! - **NatsBroadcaster**: publishes frame JSON to `<output_prefix>.<segments>`
//! - **MemoryBroadcaster**: records broadcasts in memory (for testing)

use async_trait::async_trait;
use live_pipeline_core::prelude::*;
use std::sync::{Mutex, PoisonError};
use tracing::trace;

/// Map channel `a/b/c` to subject `<prefix>.a.b.c`
pub fn channel_to_subject(prefix: &str, channel: &str) -> String {
    format!("{prefix}.{}", channel.replace('/', "."))
}

/// Map subject `<prefix>.a.b.c` back to channel `a/b/c`
pub fn subject_to_channel(prefix: &str, subject: &str) -> Option<String> {
    subject
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('.'))
        .filter(|rest| !rest.is_empty())
        .map(|rest| rest.replace('.', "/"))
}

/// Publishes frames to NATS core subjects
pub struct NatsBroadcaster {
    client: async_nats::Client,
    prefix: String,
}

impl NatsBroadcaster {
    pub fn new(client: async_nats::Client, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl Broadcaster for NatsBroadcaster {
    async fn broadcast(&self, channel: &str, frame: &Frame) -> Result<()> {
        let subject = channel_to_subject(&self.prefix, channel);
        let payload = frame
            .to_bytes()
            .map_err(|e| PipelineError::transport_with_source("Failed to encode frame", e))?;

        self.client
            .publish(subject.clone(), payload)
            .await
            .map_err(|e| PipelineError::transport_with_source("Publish failed", e))?;

        trace!(channel, subject, "Frame broadcast");
        Ok(())
    }
}

/// In-memory broadcaster that records every broadcast
#[derive(Default)]
pub struct MemoryBroadcaster {
    published: Mutex<Vec<(String, Frame)>>,
    fail: bool,
}

impl MemoryBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Broadcaster whose every broadcast fails with a transport error
    pub fn failing() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    /// Snapshot of all broadcasts so far
    pub fn published(&self) -> Vec<(String, Frame)> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Frames broadcast to one channel
    pub fn published_to(&self, channel: &str) -> Vec<Frame> {
        self.published()
            .into_iter()
            .filter(|(c, _)| c == channel)
            .map(|(_, f)| f)
            .collect()
    }

    pub fn count(&self) -> usize {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl Broadcaster for MemoryBroadcaster {
    async fn broadcast(&self, channel: &str, frame: &Frame) -> Result<()> {
        if self.fail {
            return Err(PipelineError::transport(format!(
                "broadcast to {channel} rejected"
            )));
        }
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((channel.to_string(), frame.clone()));
        Ok(())
    }
}
