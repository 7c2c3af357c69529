use super::frame_name;
use crate::error::{PipelineError, Result};
use crate::frame::Frame;
use crate::rules::JsonFrameConfig;
use crate::strategy::{ConvertContext, Converter};

/// Accepts payloads that already are wire-format frames
///
/// Only the frame shape is validated; a frame without fields is rejected.
/// An unnamed frame takes the channel's last segment as its name.
#[derive(Debug, Clone, Default)]
pub struct JsonFrameConverter;

impl JsonFrameConverter {
    pub fn new(_config: JsonFrameConfig) -> Self {
        Self
    }
}

impl Converter for JsonFrameConverter {
    fn convert(&self, ctx: &ConvertContext, payload: &[u8]) -> Result<Vec<Frame>> {
        let frame = Frame::from_bytes(payload)
            .map_err(|e| PipelineError::convert_with_source("payload is not a valid frame", e))?;
        if frame.field_count() == 0 {
            return Err(PipelineError::convert("frame has no fields"));
        }

        if frame.name().is_empty() {
            let fields = frame.fields().to_vec();
            return Ok(vec![Frame::new(frame_name(&ctx.channel), fields)?]);
        }
        Ok(vec![frame])
    }

    fn name(&self) -> &'static str {
        "jsonFrame"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_frame() {
        let payload = br#"{"name": "cpu", "fields": [{"name": "v", "type": "number", "values": [1, 2]}]}"#;
        let frames = JsonFrameConverter
            .convert(&ConvertContext::new("stream/a"), payload)
            .unwrap();
        assert_eq!(frames[0].name(), "cpu");
        assert_eq!(frames[0].row_count(), 2);
    }

    #[test]
    fn test_unnamed_frame_takes_channel_name() {
        let payload = br#"{"fields": [{"name": "v", "type": "number", "values": [1]}]}"#;
        let frames = JsonFrameConverter
            .convert(&ConvertContext::new("stream/a"), payload)
            .unwrap();
        assert_eq!(frames[0].name(), "a");
    }

    #[test]
    fn test_rejects_bad_shape() {
        let unequal = br#"{"fields": [
            {"name": "a", "type": "number", "values": [1]},
            {"name": "b", "type": "number", "values": [1, 2]}
        ]}"#;
        let err = JsonFrameConverter
            .convert(&ConvertContext::new("stream/a"), unequal)
            .unwrap_err();
        assert!(matches!(err, PipelineError::Convert { .. }));

        assert!(JsonFrameConverter
            .convert(&ConvertContext::new("stream/a"), br#"{"value": 1}"#)
            .is_err());
    }
}
