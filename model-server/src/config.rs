//! Configuration for the model server and stream tools.

use std::path::Path;

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;

/// Which stream broker implementation to instantiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    Kafka,
    #[serde(alias = "pub_sub")]
    PubSub,
}

impl std::fmt::Display for BrokerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrokerKind::Kafka => write!(f, "kafka"),
            BrokerKind::PubSub => write!(f, "pubsub"),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub options: OptionsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub kafka: Option<KafkaConfig>,
    #[serde(default)]
    pub pubsub: Option<PubSubConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OptionsConfig {
    pub stream_broker: BrokerKind,
    /// Names of the models to serve, resolved through the predictor registry.
    #[serde(default)]
    pub models: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Kafka (log broker) connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct KafkaConfig {
    /// Comma-separated list of bootstrap servers.
    pub bootstrap_servers: String,
    #[serde(default = "default_group_id")]
    pub group_id: String,
    /// Where a new consumer group starts reading ("earliest" or "latest").
    #[serde(default = "default_offset_reset")]
    pub auto_offset_reset: String,
    #[serde(default = "default_compression")]
    pub compression_type: String,
    /// How long a send may wait in the producer queue (default: 30).
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
    /// Timeout for topic create/delete operations (default: 30).
    #[serde(default = "default_admin_timeout")]
    pub admin_timeout_secs: u64,
}

/// Google Cloud Pub/Sub (ack broker) settings.
#[derive(Debug, Clone, Deserialize)]
pub struct PubSubConfig {
    pub project: String,
    /// Service account key file. Leave unset when talking to the emulator.
    #[serde(default)]
    pub credentials_path: Option<String>,
    #[serde(default = "default_pubsub_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_subscription_suffix")]
    pub subscription_suffix: String,
    /// Delay between polls when a subscription has nothing to deliver.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

// Default values
fn default_log_level() -> String {
    "info".to_string()
}
fn default_group_id() -> String {
    "model-server".to_string()
}
fn default_offset_reset() -> String {
    "earliest".to_string()
}
fn default_compression() -> String {
    "gzip".to_string()
}
fn default_send_timeout() -> u64 {
    30
}
fn default_admin_timeout() -> u64 {
    30
}
fn default_pubsub_endpoint() -> String {
    "https://pubsub.googleapis.com".to_string()
}
fn default_subscription_suffix() -> String {
    ".sub".to_string()
}
fn default_poll_interval() -> u64 {
    100
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment variables (SERVE__SECTION__KEY format)
    /// 2. The given file, or config.toml in the working directory if present
    /// 3. Built-in defaults
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name("config").required(false),
        };

        let config = ConfigLoader::builder()
            .set_default("logging.level", default_log_level())?
            .add_source(file)
            // Override with environment variables (SERVE__SECTION__KEY format)
            .add_source(
                Environment::with_prefix("SERVE")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("options.models")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Kafka section, required when the kafka broker is selected.
    pub fn kafka(&self) -> Result<&KafkaConfig, ConfigError> {
        self.kafka
            .as_ref()
            .ok_or_else(|| ConfigError::NotFound("kafka".to_string()))
    }

    /// Pub/Sub section, required when the pubsub broker is selected.
    pub fn pubsub(&self) -> Result<&PubSubConfig, ConfigError> {
        self.pubsub
            .as_ref()
            .ok_or_else(|| ConfigError::NotFound("pubsub".to_string()))
    }
}
