//! Message dispatch
//!
//! [`Dispatcher`] drives one inbound message through the rule that matches
//! its channel: convert, process each frame, output each surviving frame.
//! [`ChannelWorkers`] gives every active channel its own bounded queue and
//! task so messages of one channel are handled in arrival order while
//! distinct channels proceed in parallel.
//!
//! ```text
//!                 submit(channel, payload)
//!                          │
//!          ┌───────────────┼───────────────┐
//!          ▼               ▼               ▼
//!     [queue a/b]     [queue c/d]     [queue e/f]     bounded, per channel
//!          │               │               │
//!     worker task     worker task     worker task     retire when idle
//!          └───────────────┼───────────────┘
//!                          ▼
//!                Dispatcher::dispatch
//! ```

use crate::registry::RuleRegistry;
use bytes::Bytes;
use live_pipeline_core::config::DispatchConfig;
use live_pipeline_core::prelude::*;
use live_pipeline_core::{LatencyTimer, PipelineMetrics};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, trace, warn};

/// What happened to a dispatched message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// No rule matches the channel
    Unmatched,
    /// The matching rule has no converter
    NoConverter,
    /// Frames were converted; `emitted` of them reached the outputter stage
    Processed { frames: usize, emitted: usize },
}

/// Dispatch counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub dispatched: u64,
    pub unmatched: u64,
    pub convert_failures: u64,
    pub frames: u64,
    pub suppressed: u64,
    pub output_failures: u64,
}

/// Runs messages through the active rule set
pub struct Dispatcher {
    registry: Arc<RuleRegistry>,
    message_timeout: Duration,
    metrics: PipelineMetrics,
    dispatched: AtomicU64,
    unmatched: AtomicU64,
    convert_failures: AtomicU64,
    frames: AtomicU64,
    suppressed: AtomicU64,
    output_failures: AtomicU64,
}

impl Dispatcher {
    pub fn new(registry: Arc<RuleRegistry>, message_timeout: Duration) -> Self {
        Self {
            registry,
            message_timeout,
            metrics: PipelineMetrics::new("dispatcher"),
            dispatched: AtomicU64::new(0),
            unmatched: AtomicU64::new(0),
            convert_failures: AtomicU64::new(0),
            frames: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
            output_failures: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<RuleRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            unmatched: self.unmatched.load(Ordering::Relaxed),
            convert_failures: self.convert_failures.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            output_failures: self.output_failures.load(Ordering::Relaxed),
        }
    }

    /// Run one message through the rule matching `channel`
    ///
    /// A conversion failure drops the whole message. Processor and outputter
    /// failures are collected per frame; every frame is still attempted and
    /// the failures come back combined.
    pub async fn dispatch(&self, channel: &str, payload: &[u8]) -> Result<DispatchOutcome> {
        let metrics = self.metrics.clone();
        let _timer = LatencyTimer::start(move |d| metrics.record_dispatch_latency(d));
        let deadline = Instant::now() + self.message_timeout;

        self.dispatched.fetch_add(1, Ordering::Relaxed);
        self.metrics.record_received();

        // Pinned for the whole message; a concurrent reload does not affect it.
        let rules = self.registry.current().await;
        let Some((rule, matched)) = rules.find(channel) else {
            self.unmatched.fetch_add(1, Ordering::Relaxed);
            self.metrics.record_unmatched();
            trace!(channel, "No rule for channel");
            return Ok(DispatchOutcome::Unmatched);
        };

        let Some(converter) = &rule.converter else {
            trace!(channel, pattern = rule.pattern.as_str(), "Rule has no converter");
            return Ok(DispatchOutcome::NoConverter);
        };

        let frames = match converter.convert(&ConvertContext::new(channel), payload) {
            Ok(frames) => frames,
            Err(e) => {
                self.convert_failures.fetch_add(1, Ordering::Relaxed);
                self.metrics.record_convert_failure(converter.name());
                return Err(e);
            }
        };
        self.frames.fetch_add(frames.len() as u64, Ordering::Relaxed);
        self.metrics.record_converted(converter.name(), frames.len());

        let ctx = OutputContext::new(matched).with_deadline(deadline);
        let total = frames.len();
        let mut emitted = 0;
        let mut errors = Vec::new();

        for frame in frames {
            let frame = match &rule.processor {
                Some(processor) => match processor.process(frame) {
                    Ok(Some(frame)) => frame,
                    Ok(None) => {
                        self.suppressed.fetch_add(1, Ordering::Relaxed);
                        self.metrics.record_suppressed();
                        trace!(channel, processor = processor.name(), "Frame suppressed");
                        continue;
                    }
                    // Sibling frames still go out; the failure is reported after the loop.
                    Err(e) => {
                        errors.push(e);
                        continue;
                    }
                },
                None => frame,
            };
            emitted += 1;

            let Some(outputter) = &rule.outputter else {
                continue;
            };
            let result = outputter.output(&ctx, &frame).await;
            self.metrics.record_output(outputter.name(), result.is_ok());
            if let Err(e) = result {
                self.output_failures.fetch_add(1, Ordering::Relaxed);
                errors.push(e);
            }
        }

        debug!(channel, frames = total, emitted, "Message dispatched");
        match PipelineError::combine(errors) {
            Some(e) => Err(e),
            None => Ok(DispatchOutcome::Processed {
                frames: total,
                emitted,
            }),
        }
    }

    /// Dispatch and report failures instead of returning them
    pub async fn dispatch_logged(&self, channel: &str, payload: &[u8]) {
        match self.dispatch(channel, payload).await {
            Ok(_) => {}
            Err(e @ PipelineError::Convert { .. }) => {
                warn!(channel, error = %e, "Dropped undecodable message");
            }
            Err(e) => {
                error!(channel, error = %e, transient = e.is_transient(), "Dispatch failed");
            }
        }
    }
}

// ============================================================================
// Per-Channel Workers
// ============================================================================

struct WorkerSlot {
    id: u64,
    sender: mpsc::Sender<Bytes>,
}

type Slots = HashMap<String, WorkerSlot>;
type WorkerTable = Arc<Mutex<Slots>>;

fn lock_table(table: &Mutex<Slots>) -> MutexGuard<'_, Slots> {
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One ordered queue and task per active channel
pub struct ChannelWorkers {
    dispatcher: Arc<Dispatcher>,
    capacity: usize,
    idle_timeout: Duration,
    table: WorkerTable,
    next_id: AtomicU64,
    metrics: PipelineMetrics,
}

impl ChannelWorkers {
    pub fn new(dispatcher: Arc<Dispatcher>, config: &DispatchConfig) -> Self {
        Self {
            dispatcher,
            capacity: config.queue_capacity.max(1),
            idle_timeout: config.worker_idle_timeout,
            table: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
            metrics: PipelineMetrics::new("workers"),
        }
    }

    /// Channels with a live worker
    pub fn active(&self) -> usize {
        lock_table(&self.table).len()
    }

    /// Queue a payload behind earlier payloads of the same channel
    ///
    /// Fails with `Backpressure` when the channel's queue is full.
    pub fn submit(&self, channel: &str, payload: Bytes) -> Result<()> {
        let mut table = lock_table(&self.table);

        let payload = match table.get(channel) {
            Some(slot) => match slot.sender.try_send(payload) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(_)) => {
                    self.metrics.record_backpressure();
                    return Err(PipelineError::Backpressure {
                        message: format!("queue for channel {channel} is full"),
                    });
                }
                Err(TrySendError::Closed(payload)) => payload,
            },
            None => payload,
        };

        let (sender, receiver) = mpsc::channel(self.capacity);
        sender
            .try_send(payload)
            .map_err(|_| PipelineError::Internal("fresh channel queue rejected payload".into()))?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        table.insert(channel.to_string(), WorkerSlot { id, sender });
        drop(table);

        trace!(channel, worker = id, "Channel worker started");
        tokio::spawn(run_worker(
            channel.to_string(),
            id,
            receiver,
            self.dispatcher.clone(),
            self.table.clone(),
            self.idle_timeout,
        ));
        Ok(())
    }
}

async fn run_worker(
    channel: String,
    id: u64,
    mut receiver: mpsc::Receiver<Bytes>,
    dispatcher: Arc<Dispatcher>,
    table: WorkerTable,
    idle_timeout: Duration,
) {
    loop {
        match tokio::time::timeout(idle_timeout, receiver.recv()).await {
            Ok(Some(payload)) => dispatcher.dispatch_logged(&channel, &payload).await,
            Ok(None) => break,
            Err(_) => {
                // Retire only if nothing was queued while the timeout fired.
                let mut table = lock_table(&table);
                if !receiver.is_empty() {
                    continue;
                }
                if table.get(&channel).is_some_and(|slot| slot.id == id) {
                    table.remove(&channel);
                }
                break;
            }
        }
    }
    trace!(channel, worker = id, "Channel worker retired");
}
