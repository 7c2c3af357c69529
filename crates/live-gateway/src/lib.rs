//! # Live Gateway
//!
//! Runtime for the rule-driven live channel pipeline.
//!
//! ## Features
//!
//! - Channel rules resolved into converter / processor / outputter pipelines
//! - Per-channel ordered dispatch with bounded queues
//! - Stateful threshold and change-log outputters
//! - Remote write over HTTP
//! - Admin API with all-or-nothing rule reload
//!
//! ## Transport
//!
//! Raw payloads arrive on NATS subjects `<input_prefix>.a.b.c` and are
//! dispatched on channel `a/b/c`. Broadcasts go out as frame JSON on
//! `<output_prefix>.<channel segments>`.
//!
//! ```bash
//! live-gateway --config gateway.toml --rules channel-rules.json
//! ```

pub mod admin_api;
pub mod broadcast;
pub mod builder;
pub mod dispatcher;
pub mod managed_stream;
pub mod outputter;
pub mod registry;
pub mod remote_write;
pub mod store;

pub use admin_api::*;
pub use broadcast::*;
pub use builder::*;
pub use dispatcher::*;
pub use managed_stream::*;
pub use registry::*;
pub use remote_write::*;
pub use store::*;

use bytes::Bytes;
use futures::StreamExt;
use live_pipeline_core::prelude::*;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Main gateway server
pub struct Gateway {
    config: GatewayConfig,
    client: async_nats::Client,
    registry: Arc<RuleRegistry>,
    dispatcher: Arc<Dispatcher>,
    workers: Arc<ChannelWorkers>,
    managed_stream: Arc<ManagedStream>,
    counters: Arc<IngressCounters>,
}

#[derive(Default)]
struct IngressCounters {
    received: AtomicU64,
    rejected: AtomicU64,
}

impl Gateway {
    /// Connect to NATS, wire collaborators and load the rules file
    pub async fn connect(config: GatewayConfig) -> Result<Self> {
        let client = async_nats::ConnectOptions::new()
            .name(&config.nats.connection_name)
            .connect(&config.nats.url)
            .await
            .map_err(|e| PipelineError::transport_with_source("Failed to connect to NATS", e))?;
        info!(url = %config.nats.url, "Connected to NATS");

        let broadcaster: Arc<dyn Broadcaster> = Arc::new(NatsBroadcaster::new(
            client.clone(),
            config.nats.output_prefix.clone(),
        ));
        let managed_stream = Arc::new(ManagedStream::new(broadcaster.clone()));

        let builder = RuleBuilder::new(BuilderDeps {
            broadcaster,
            managed_stream: managed_stream.clone(),
            frame_store: Arc::new(MemoryFrameStore::new()),
            locks: Arc::new(KeyedLocks::new()),
            remote_writer: Arc::new(HttpRemoteWriter::new(&config.remote_write)?),
            remote_write_timeout: config.remote_write.default_timeout,
        });

        let registry = Arc::new(RuleRegistry::new(builder).with_source(&config.rules.path));
        registry.reload().await?;

        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            config.dispatch.message_timeout,
        ));
        let workers = Arc::new(ChannelWorkers::new(dispatcher.clone(), &config.dispatch));

        Ok(Self {
            config,
            client,
            registry,
            dispatcher,
            workers,
            managed_stream,
            counters: Arc::new(IngressCounters::default()),
        })
    }

    pub fn registry(&self) -> &Arc<RuleRegistry> {
        &self.registry
    }

    /// Get statistics
    pub fn stats(&self) -> GatewayStats {
        stats_of(&self.counters, &self.dispatcher, &self.workers)
    }

    fn admin_state(&self) -> AdminState {
        let counters = self.counters.clone();
        let dispatcher = self.dispatcher.clone();
        let workers = self.workers.clone();
        AdminState {
            registry: self.registry.clone(),
            managed_stream: self.managed_stream.clone(),
            stats: Arc::new(move || stats_of(&counters, &dispatcher, &workers)),
        }
    }

    /// Consume inbound subjects until interrupted
    pub async fn run(&self) -> Result<()> {
        info!("Starting live gateway");

        let admin_handle = if self.config.admin.enabled {
            let listen = self.config.admin.listen.clone();
            let state = self.admin_state();
            Some(tokio::spawn(async move {
                if let Err(e) = run_admin_server(listen, state).await {
                    error!(error = %e, "Admin API stopped");
                }
            }))
        } else {
            None
        };

        let prefix = &self.config.nats.input_prefix;
        let mut subscriber = self
            .client
            .subscribe(format!("{prefix}.>"))
            .await
            .map_err(|e| PipelineError::transport_with_source("Subscribe failed", e))?;
        info!(subject = %format!("{prefix}.>"), "Gateway subscribed, starting message loop");

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    break;
                }
                message = subscriber.next() => {
                    let Some(message) = message else {
                        warn!("Subscription closed");
                        break;
                    };
                    self.ingest(&message.subject, message.payload);
                }
            }
        }

        if let Err(e) = subscriber.unsubscribe().await {
            debug!(error = %e, "Unsubscribe failed");
        }
        if let Some(handle) = admin_handle {
            handle.abort();
        }

        info!(stats = ?self.stats(), "Gateway stopped");
        Ok(())
    }

    fn ingest(&self, subject: &str, payload: Bytes) {
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        let Some(channel) = subject_to_channel(&self.config.nats.input_prefix, subject) else {
            debug!(subject, "Subject outside input prefix");
            return;
        };

        if let Err(e) = self.workers.submit(&channel, payload) {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(channel, error = %e, "Message rejected");
        }
    }
}

fn stats_of(
    counters: &IngressCounters,
    dispatcher: &Dispatcher,
    workers: &ChannelWorkers,
) -> GatewayStats {
    GatewayStats {
        received: counters.received.load(Ordering::Relaxed),
        rejected: counters.rejected.load(Ordering::Relaxed),
        active_channels: workers.active(),
        dispatch: dispatcher.stats(),
    }
}

/// Gateway statistics
#[derive(Debug, Clone, Copy, Serialize)]
pub struct GatewayStats {
    pub received: u64,
    pub rejected: u64,
    pub active_channels: usize,
    pub dispatch: DispatchStats,
}
