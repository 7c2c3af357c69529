//! Live Gateway CLI

use clap::Parser;
use live_gateway::Gateway;
use live_pipeline_core::GatewayConfig;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "live-gateway")]
#[command(about = "Rule-driven live channel pipeline over NATS")]
#[command(version)]
struct Args {
    /// Gateway configuration file (toml, yaml or json)
    #[arg(long, short, env = "LIVE_GATEWAY_CONFIG")]
    config: Option<String>,

    /// Channel rules document, overrides `rules.path`
    #[arg(long, env = "LIVE_GATEWAY_RULES")]
    rules: Option<String>,

    /// NATS URL, overrides `nats.url`
    #[arg(long, env = "NATS_URL")]
    nats_url: Option<String>,

    /// Log level, overrides `observability.log_level`
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = GatewayConfig::load(args.config.as_deref())?;
    if let Some(rules) = args.rules {
        config.rules.path = rules;
    }
    if let Some(url) = args.nats_url {
        config.nats.url = url;
    }
    if let Some(level) = args.log_level {
        config.observability.log_level = level;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));
    if config.observability.log_format == "json" {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().pretty())
            .with(filter)
            .init();
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        rules = %config.rules.path,
        "Starting live-gateway"
    );

    let gateway = Gateway::connect(config).await?;
    gateway.run().await?;

    info!("live-gateway stopped");
    Ok(())
}
