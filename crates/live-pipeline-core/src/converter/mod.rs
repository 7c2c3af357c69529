//! Payload converters
//!
//! Each converter turns the raw bytes published to a channel into zero or
//! more [`Frame`](crate::frame::Frame)s.

mod influx;
mod json_auto;
mod json_exact;
mod json_frame;

pub use influx::InfluxAutoConverter;
pub use json_auto::JsonAutoConverter;
pub use json_exact::JsonExactConverter;
pub use json_frame::JsonFrameConverter;

use crate::error::{PipelineError, Result};
use serde_json::Value;

/// Default frame name for a channel: its last path segment
pub(crate) fn frame_name(channel: &str) -> &str {
    channel.rsplit('/').next().unwrap_or(channel)
}

/// Parse a JSON payload, mapping syntax errors to conversion errors
pub(crate) fn parse_json(payload: &[u8]) -> Result<Value> {
    serde_json::from_slice(payload)
        .map_err(|e| PipelineError::convert_with_source("payload is not valid JSON", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_name() {
        assert_eq!(frame_name("stream/telegraf/cpu"), "cpu");
        assert_eq!(frame_name("plain"), "plain");
    }

    #[test]
    fn test_parse_json_error() {
        let err = parse_json(b"{not json").unwrap_err();
        assert!(matches!(err, PipelineError::Convert { .. }));
    }
}
