use crate::store::KeyedLocks;
use async_trait::async_trait;
use live_pipeline_core::prelude::*;
use std::sync::Arc;
use tracing::{debug, trace};

/// Emits a record whenever a channel's data changes
///
/// With a field name, only that field's latest value is compared and the
/// record is a `time`/`value`/`previous` frame (`previous` is null on the
/// first observation). Without one, frames are compared field for field,
/// ignoring time columns, and the new frame itself is emitted.
///
/// The first observation of a channel is always emitted. The store is only
/// updated when a change is emitted.
pub struct ChangeLogOutput {
    field_name: Option<String>,
    channel: ChannelTemplate,
    broadcaster: Arc<dyn Broadcaster>,
    store: Arc<dyn FrameStore>,
    locks: Arc<KeyedLocks>,
}

impl ChangeLogOutput {
    pub fn new(
        field_name: Option<String>,
        channel: ChannelTemplate,
        broadcaster: Arc<dyn Broadcaster>,
        store: Arc<dyn FrameStore>,
        locks: Arc<KeyedLocks>,
    ) -> Self {
        Self {
            field_name,
            channel,
            broadcaster,
            store,
            locks,
        }
    }

    fn state_key(&self, channel: &str) -> String {
        format!(
            "changeLog/{}/{}@{}",
            self.field_name.as_deref().unwrap_or("*"),
            self.channel.as_str(),
            channel
        )
    }

    /// Change record for `frame`, `None` when nothing changed
    fn change(&self, previous: Option<&Frame>, frame: &Frame) -> Result<Option<Frame>> {
        let Some(name) = &self.field_name else {
            return Ok(match previous {
                Some(p) if p.content_eq(frame) => None,
                _ => Some(frame.clone()),
            });
        };

        let Some(current) = frame.field(name) else {
            return Ok(None);
        };
        let value = current.last_row_as("value");
        let previous = match previous.and_then(|p| p.field(name)) {
            Some(field) => {
                let previous = field.last_row_as("previous");
                if previous.values() == value.values() {
                    return Ok(None);
                }
                previous
            }
            None => Field::new("previous", FieldValues::nulls(current.field_type(), 1)),
        };

        Frame::new(frame.name(), vec![super::now_field(), value, previous]).map(Some)
    }
}

#[async_trait]
impl Outputter for ChangeLogOutput {
    async fn output(&self, ctx: &OutputContext, frame: &Frame) -> Result<()> {
        if let Some(name) = &self.field_name {
            if frame.field(name).is_none() {
                trace!(channel = ctx.channel(), field = %name, "Field absent, skipping");
                return Ok(());
            }
        }

        let key = self.state_key(ctx.channel());
        let _guard = self.locks.lock(&key).await;

        let previous = self.store.get(&key).await?;
        let Some(record) = self.change(previous.as_ref(), frame)? else {
            trace!(channel = ctx.channel(), "Unchanged, suppressed");
            return Ok(());
        };
        self.store.set(&key, frame.clone()).await?;

        let destination = self.channel.expand(&ctx.matched);
        debug!(
            channel = ctx.channel(),
            destination = %destination,
            first = previous.is_none(),
            "Change recorded"
        );
        self.broadcaster.broadcast(&destination, &record).await
    }

    fn name(&self) -> &'static str {
        "changeLog"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::MemoryBroadcaster;
    use crate::outputter::testing::{ctx, number_frame};
    use crate::store::MemoryFrameStore;
    use live_pipeline_core::converter::JsonAutoConverter;
    use serde_json::{json, Value};

    fn change_log(field_name: Option<&str>, broadcaster: Arc<MemoryBroadcaster>) -> ChangeLogOutput {
        let pattern = ChannelPattern::parse("sensors/{id}").unwrap();
        ChangeLogOutput::new(
            field_name.map(str::to_string),
            ChannelTemplate::parse("changes/{id}", &pattern).unwrap(),
            broadcaster,
            Arc::new(MemoryFrameStore::new()),
            Arc::new(KeyedLocks::new()),
        )
    }

    fn sensor(id: &str) -> OutputContext {
        let pattern = ChannelPattern::parse("sensors/{id}").unwrap();
        OutputContext::new(pattern.matches(&format!("sensors/{id}")).unwrap())
    }

    #[tokio::test]
    async fn test_field_changes() {
        let broadcaster = Arc::new(MemoryBroadcaster::new());
        let output = change_log(Some("value"), broadcaster.clone());

        for v in [1.0, 1.0, 2.0, 2.0, 1.0] {
            output.output(&sensor("s1"), &number_frame("value", v)).await.unwrap();
        }

        let records = broadcaster.published_to("changes/s1");
        assert_eq!(records.len(), 3);

        let first = &records[0];
        assert_eq!(first.field("value").unwrap().last_number(), Some(1.0));
        assert_eq!(first.field("previous").unwrap().values().get(0), Value::Null);

        let second = &records[1];
        assert_eq!(second.field("value").unwrap().values().get(0), json!(2.0));
        assert_eq!(second.field("previous").unwrap().values().get(0), json!(1.0));
    }

    #[tokio::test]
    async fn test_whole_frame_changes_ignore_time() {
        let broadcaster = Arc::new(MemoryBroadcaster::new());
        let output = change_log(None, broadcaster.clone());

        output.output(&sensor("s1"), &number_frame("value", 1.0)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        output.output(&sensor("s1"), &number_frame("value", 1.0)).await.unwrap();
        output.output(&sensor("s1"), &number_frame("value", 3.0)).await.unwrap();

        let records = broadcaster.published_to("changes/s1");
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].field("value").unwrap().last_number(), Some(3.0));
    }

    #[tokio::test]
    async fn test_document_timestamps_are_not_changes() {
        let broadcaster = Arc::new(MemoryBroadcaster::new());
        let output = change_log(None, broadcaster.clone());
        let converter = JsonAutoConverter::default();

        let payloads: [&[u8]; 4] = [
            br#"{"time": "2024-01-01T00:00:00Z", "v": 1}"#,
            br#"{"time": "2024-01-01T00:00:05Z", "v": 1}"#,
            br#"{"time": null, "v": 1}"#,
            br#"{"time": "2024-01-01T00:00:10Z", "v": 2}"#,
        ];
        for payload in payloads {
            let frames = converter
                .convert(&ConvertContext::new("sensors/s1"), payload)
                .unwrap();
            output.output(&sensor("s1"), &frames[0]).await.unwrap();
        }

        let records = broadcaster.published_to("changes/s1");
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].field("v").unwrap().last_number(), Some(2.0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_observation_records_once() {
        let broadcaster = Arc::new(MemoryBroadcaster::new());
        let output = Arc::new(change_log(Some("value"), broadcaster.clone()));

        let tasks = (0..8).map(|_| {
            let output = output.clone();
            tokio::spawn(async move {
                output.output(&sensor("s1"), &number_frame("value", 4.0)).await
            })
        });
        for result in futures::future::join_all(tasks).await {
            result.unwrap().unwrap();
        }

        assert_eq!(broadcaster.published_to("changes/s1").len(), 1);
    }

    #[tokio::test]
    async fn test_channels_are_independent() {
        let broadcaster = Arc::new(MemoryBroadcaster::new());
        let output = change_log(Some("value"), broadcaster.clone());

        output.output(&sensor("a"), &number_frame("value", 1.0)).await.unwrap();
        output.output(&sensor("b"), &number_frame("value", 1.0)).await.unwrap();
        output.output(&sensor("a"), &number_frame("value", 1.0)).await.unwrap();

        assert_eq!(broadcaster.published_to("changes/a").len(), 1);
        assert_eq!(broadcaster.published_to("changes/b").len(), 1);
    }

    #[tokio::test]
    async fn test_missing_field_is_skipped() {
        let broadcaster = Arc::new(MemoryBroadcaster::new());
        let output = change_log(Some("value"), broadcaster.clone());
        output.output(&ctx("x"), &number_frame("other", 1.0)).await.unwrap();
        assert_eq!(broadcaster.count(), 0);
    }
}
