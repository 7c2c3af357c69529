//! Strategy Traits for the Live Channel Pipeline
//!
//! Every pipeline stage and every external collaborator is a trait object so
//! that the rule builder can compose them from configuration and tests can
//! swap in in-memory doubles.
//!
//! ## Strategy Hierarchy
//!
//! ```text
//! Pure stages (sync, stateless)
//!     ├── Converter        raw bytes → frames
//!     ├── Processor        frame → frame | suppressed
//!     └── ConditionChecker frame → bool
//!
//! Side-effecting stages (async)
//!     └── Outputter        frame → side effect
//!
//! Collaborators (async, injected at build time)
//!     ├── Broadcaster      publish a frame to channel subscribers
//!     ├── FrameStore       last frame per key
//!     └── RemoteWriter     ship a frame to a remote write backend
//! ```

use crate::error::Result;
use crate::frame::Frame;
use crate::pattern::ChannelMatch;
use crate::rules::RemoteWriteBackend;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

// ============================================================================
// Invocation Context
// ============================================================================

/// Context handed to converters
#[derive(Debug, Clone)]
pub struct ConvertContext {
    /// Channel the payload was published to
    pub channel: String,
    /// Arrival time, used for generated time columns
    pub received_at: DateTime<Utc>,
}

impl ConvertContext {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            received_at: Utc::now(),
        }
    }
}

/// Context handed to outputters
#[derive(Debug, Clone)]
pub struct OutputContext {
    /// Matched channel and the captures of its rule
    pub matched: ChannelMatch,
    /// Processing deadline of the inbound message
    pub deadline: Option<Instant>,
}

impl OutputContext {
    pub fn new(matched: ChannelMatch) -> Self {
        Self {
            matched,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn channel(&self) -> &str {
        &self.matched.channel
    }

    /// Time left before the deadline, `None` when unbounded
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }
}

// ============================================================================
// Pure Stages
// ============================================================================

/// Converter strategy - decodes raw payloads into frames
///
/// Implementations:
/// - `JsonAutoConverter`: infers fields from the JSON document shape
/// - `JsonExactConverter`: extracts a predeclared field list
/// - `JsonFrameConverter`: payload already is a wire-format frame
/// - `InfluxAutoConverter`: line protocol, one frame per measurement
pub trait Converter: Send + Sync {
    /// Decode a payload; an error drops the message
    fn convert(&self, ctx: &ConvertContext, payload: &[u8]) -> Result<Vec<Frame>>;

    /// Converter name for logging
    fn name(&self) -> &'static str;
}

/// Processor strategy - derives a new frame or suppresses it
pub trait Processor: Send + Sync {
    /// `Ok(None)` suppresses the frame without error
    fn process(&self, frame: Frame) -> Result<Option<Frame>>;

    fn name(&self) -> &'static str;
}

/// Condition strategy - pure predicate over a frame, never fails
pub trait ConditionChecker: Send + Sync {
    fn check(&self, frame: &Frame) -> bool;

    fn name(&self) -> &'static str;
}

// ============================================================================
// Side-Effecting Stages
// ============================================================================

/// Outputter strategy - performs a side effect with a frame
///
/// Implementations:
/// - `LocalSubscribersOutput`, `ManagedStreamOutput`: fan-out to subscribers
/// - `RedirectOutput`: re-emit under another channel
/// - `MultipleOutput`, `ConditionalOutput`: composites
/// - `ThresholdOutput`, `ChangeLogOutput`: stateful, backed by a `FrameStore`
/// - `RemoteWriteOutput`: forward to a remote write backend
#[async_trait]
pub trait Outputter: Send + Sync {
    async fn output(&self, ctx: &OutputContext, frame: &Frame) -> Result<()>;

    fn name(&self) -> &'static str;
}

// ============================================================================
// Collaborators
// ============================================================================

/// Publishes frames to the current subscribers of a channel
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn broadcast(&self, channel: &str, frame: &Frame) -> Result<()>;
}

/// Keyed store of the last observed frame
///
/// Read-modify-write sequences must be serialized per key by the caller.
#[async_trait]
pub trait FrameStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Frame>>;

    async fn set(&self, key: &str, frame: Frame) -> Result<()>;
}

/// Ships frames to remote time-series ingestion endpoints
///
/// Implementations do not retry; the caller bounds the call with a timeout.
#[async_trait]
pub trait RemoteWriter: Send + Sync {
    async fn write(&self, backend: &RemoteWriteBackend, channel: &str, frame: &Frame)
        -> Result<()>;
}
