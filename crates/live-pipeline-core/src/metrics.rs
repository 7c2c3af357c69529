//! Metrics for the live channel pipeline
//!
//! Recorded through the `metrics` facade; installing an exporter is left to
//! the host process.

use metrics::{counter, histogram};
use std::time::{Duration, Instant};

/// Metric names as constants for consistency
pub mod names {
    pub const MESSAGES_RECEIVED: &str = "live_pipeline_messages_received_total";
    pub const MESSAGES_UNMATCHED: &str = "live_pipeline_messages_unmatched_total";
    pub const FRAMES_CONVERTED: &str = "live_pipeline_frames_converted_total";
    pub const CONVERT_FAILURES: &str = "live_pipeline_convert_failures_total";
    pub const FRAMES_SUPPRESSED: &str = "live_pipeline_frames_suppressed_total";
    pub const OUTPUTS: &str = "live_pipeline_outputs_total";
    pub const OUTPUT_FAILURES: &str = "live_pipeline_output_failures_total";
    pub const BACKPRESSURE_DROPS: &str = "live_pipeline_backpressure_drops_total";
    pub const RULE_LOADS: &str = "live_pipeline_rule_loads_total";
    pub const DISPATCH_LATENCY: &str = "live_pipeline_dispatch_latency_seconds";
}

/// Labels for metrics
pub mod labels {
    pub const COMPONENT: &str = "component";
    pub const CONVERTER: &str = "converter";
    pub const OUTPUTTER: &str = "outputter";
    pub const STATUS: &str = "status";
}

/// Dispatch pipeline metrics
#[derive(Clone)]
pub struct PipelineMetrics {
    component: String,
}

impl PipelineMetrics {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }

    /// Record message received
    pub fn record_received(&self) {
        counter!(
            names::MESSAGES_RECEIVED,
            labels::COMPONENT => self.component.clone(),
        )
        .increment(1);
    }

    /// Record message with no matching rule
    pub fn record_unmatched(&self) {
        counter!(
            names::MESSAGES_UNMATCHED,
            labels::COMPONENT => self.component.clone(),
        )
        .increment(1);
    }

    /// Record frames produced by a converter
    pub fn record_converted(&self, converter: &'static str, frames: usize) {
        counter!(
            names::FRAMES_CONVERTED,
            labels::COMPONENT => self.component.clone(),
            labels::CONVERTER => converter,
        )
        .increment(frames as u64);
    }

    /// Record a payload the converter rejected
    pub fn record_convert_failure(&self, converter: &'static str) {
        counter!(
            names::CONVERT_FAILURES,
            labels::COMPONENT => self.component.clone(),
            labels::CONVERTER => converter,
        )
        .increment(1);
    }

    /// Record frame suppressed by a processor
    pub fn record_suppressed(&self) {
        counter!(
            names::FRAMES_SUPPRESSED,
            labels::COMPONENT => self.component.clone(),
        )
        .increment(1);
    }

    /// Record outputter invocation
    pub fn record_output(&self, outputter: &'static str, success: bool) {
        let status = if success { "ok" } else { "error" };
        counter!(
            names::OUTPUTS,
            labels::COMPONENT => self.component.clone(),
            labels::OUTPUTTER => outputter,
            labels::STATUS => status,
        )
        .increment(1);
        if !success {
            counter!(
                names::OUTPUT_FAILURES,
                labels::COMPONENT => self.component.clone(),
                labels::OUTPUTTER => outputter,
            )
            .increment(1);
        }
    }

    /// Record message rejected by a full channel queue
    pub fn record_backpressure(&self) {
        counter!(
            names::BACKPRESSURE_DROPS,
            labels::COMPONENT => self.component.clone(),
        )
        .increment(1);
    }

    /// Record a rule set load attempt
    pub fn record_rule_load(&self, success: bool) {
        let status = if success { "ok" } else { "error" };
        counter!(
            names::RULE_LOADS,
            labels::COMPONENT => self.component.clone(),
            labels::STATUS => status,
        )
        .increment(1);
    }

    /// Record end-to-end dispatch latency
    pub fn record_dispatch_latency(&self, duration: Duration) {
        histogram!(
            names::DISPATCH_LATENCY,
            labels::COMPONENT => self.component.clone(),
        )
        .record(duration.as_secs_f64());
    }
}

/// Timer guard for automatic latency recording
pub struct LatencyTimer<F>
where
    F: FnOnce(Duration),
{
    start: Instant,
    on_drop: Option<F>,
}

impl<F> LatencyTimer<F>
where
    F: FnOnce(Duration),
{
    /// Start a new timer
    pub fn start(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }

    /// Stop timer and record
    pub fn stop(mut self) -> Duration {
        let elapsed = self.start.elapsed();
        if let Some(f) = self.on_drop.take() {
            f(elapsed);
        }
        elapsed
    }
}

impl<F> Drop for LatencyTimer<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f(self.start.elapsed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_timer() {
        let mut recorded = None;
        {
            let timer = LatencyTimer::start(|d| recorded = Some(d));
            std::thread::sleep(Duration::from_millis(10));
            timer.stop();
        }
        assert!(recorded.unwrap() >= Duration::from_millis(10));
    }

    #[test]
    fn test_recording_without_exporter_is_noop() {
        let metrics = PipelineMetrics::new("test");
        metrics.record_received();
        metrics.record_converted("jsonAuto", 3);
        metrics.record_output("redirect", false);
        metrics.record_rule_load(true);
    }
}
