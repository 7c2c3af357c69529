//! Process configuration for the live pipeline gateway
//!
//! Uses the `config` crate for layered configuration from defaults, an
//! optional file and `LIVE_PIPELINE__*` environment variables. The channel
//! rules themselves live in a separate JSON document (see [`crate::rules`]).

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the gateway process
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// NATS transport configuration
    #[serde(default)]
    pub nats: NatsConfig,

    /// Channel rules document location
    #[serde(default)]
    pub rules: RulesConfig,

    /// Per-channel dispatch configuration
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Remote write client configuration
    #[serde(default)]
    pub remote_write: RemoteWriteClientConfig,

    /// Admin API configuration
    #[serde(default)]
    pub admin: AdminApiConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ============================================================================
// NATS Configuration
// ============================================================================

/// NATS connection and subject mapping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsConfig {
    /// NATS server URL
    #[serde(default = "default_nats_url")]
    pub url: String,

    /// Connection name (for monitoring)
    #[serde(default = "default_connection_name")]
    pub connection_name: String,

    /// Inbound subjects are `<input_prefix>.<channel segments>`
    #[serde(default = "default_input_prefix")]
    pub input_prefix: String,

    /// Broadcasts go to `<output_prefix>.<channel segments>`
    #[serde(default = "default_output_prefix")]
    pub output_prefix: String,
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_connection_name() -> String {
    "live-gateway".to_string()
}

fn default_input_prefix() -> String {
    "live.in".to_string()
}

fn default_output_prefix() -> String {
    "live.out".to_string()
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: default_nats_url(),
            connection_name: default_connection_name(),
            input_prefix: default_input_prefix(),
            output_prefix: default_output_prefix(),
        }
    }
}

// ============================================================================
// Component Configurations
// ============================================================================

/// Channel rules document location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Path of the JSON rules document
    #[serde(default = "default_rules_path")]
    pub path: String,
}

fn default_rules_path() -> String {
    "/etc/live-gateway/channel-rules.json".to_string()
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            path: default_rules_path(),
        }
    }
}

/// Per-channel worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Bounded queue length per channel
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Idle time after which a channel worker exits
    #[serde(with = "humantime_serde", default = "default_worker_idle_timeout")]
    pub worker_idle_timeout: Duration,

    /// Processing deadline of a single message
    #[serde(with = "humantime_serde", default = "default_message_timeout")]
    pub message_timeout: Duration,
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_worker_idle_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_message_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            worker_idle_timeout: default_worker_idle_timeout(),
            message_timeout: default_message_timeout(),
        }
    }
}

/// Remote write HTTP client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteWriteClientConfig {
    /// Request timeout when a backend declares none
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub default_timeout: Duration,

    /// Connection timeout
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(2)
}

impl Default for RemoteWriteClientConfig {
    fn default() -> Self {
        Self {
            default_timeout: default_request_timeout(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

/// Admin API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminApiConfig {
    /// Enable admin API
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Listen address
    #[serde(default = "default_admin_listen")]
    pub listen: String,
}

fn default_true() -> bool {
    true
}

fn default_admin_listen() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for AdminApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: default_admin_listen(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format: "json" or "pretty"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

// ============================================================================
// Configuration Loading
// ============================================================================

impl GatewayConfig {
    /// Load configuration from file and environment
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        // Add default values
        builder = builder.add_source(config::Config::try_from(&Self::default())?);

        // Add config file if specified
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Add environment variables with prefix LIVE_PIPELINE__
        builder = builder.add_source(
            config::Environment::with_prefix("LIVE_PIPELINE")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::load(None).unwrap();
        assert_eq!(config.dispatch.queue_capacity, 1024);
        assert_eq!(config.dispatch.message_timeout, Duration::from_secs(10));
        assert_eq!(config.nats.input_prefix, "live.in");
        assert!(config.admin.enabled);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[dispatch]\nqueue_capacity = 16\nmessage_timeout = \"250ms\"\n\n[rules]\npath = \"rules.json\""
        )
        .unwrap();

        let config = GatewayConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.dispatch.queue_capacity, 16);
        assert_eq!(config.dispatch.message_timeout, Duration::from_millis(250));
        assert_eq!(config.rules.path, "rules.json");
        assert_eq!(config.remote_write.default_timeout, Duration::from_secs(5));
    }
}
