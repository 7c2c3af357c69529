//! HTTP remote write client
//!
//! Posts `{"channel": .., "frame": ..}` JSON to the backend endpoint with
//! optional basic auth. No retries; callers bound the call with a timeout.

use async_trait::async_trait;
use live_pipeline_core::prelude::*;
use live_pipeline_core::rules::RemoteWriteBackend;
use live_pipeline_core::RemoteWriteClientConfig;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

#[derive(Serialize)]
struct WriteRequest<'a> {
    channel: &'a str,
    frame: &'a Frame,
}

/// [`RemoteWriter`] over HTTP
pub struct HttpRemoteWriter {
    client: reqwest::Client,
    default_timeout: Duration,
}

impl HttpRemoteWriter {
    pub fn new(config: &RemoteWriteClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(concat!("live-gateway/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PipelineError::config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            default_timeout: config.default_timeout,
        })
    }
}

#[async_trait]
impl RemoteWriter for HttpRemoteWriter {
    async fn write(&self, backend: &RemoteWriteBackend, channel: &str, frame: &Frame) -> Result<()> {
        let settings = &backend.settings;
        let timeout = settings.timeout.unwrap_or(self.default_timeout);

        let mut request = self
            .client
            .post(settings.endpoint.clone())
            .timeout(timeout)
            .json(&WriteRequest { channel, frame });
        if let Some(user) = &settings.user {
            request = request.basic_auth(user, settings.password.as_ref());
        }

        let response = request.send().await.map_err(|e| {
            PipelineError::remote_write_with_source(&backend.uid, "request failed", e)
        })?;
        let status = response.status();
        response.error_for_status().map_err(|e| {
            PipelineError::remote_write_with_source(
                &backend.uid,
                format!("backend answered {status}"),
                e,
            )
        })?;

        debug!(uid = %backend.uid, channel, %status, "Remote write complete");
        Ok(())
    }
}
