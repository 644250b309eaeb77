//! Application configuration.
//!
//! One `Config` for both services. Role-specific defaults (ports, queues,
//! database) come from `Config::defaults_for`; files and environment
//! variables layer on top.

mod messaging;
mod server;

pub use messaging::{AmqpSettings, ConsumerConfig, MessagingConfig};
pub use server::{ServerConfig, StorageConfig, UsersConfig};

use serde::{Deserialize, Serialize};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "PRODUCTSYNC_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "PRODUCTSYNC";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "PRODUCTSYNC_LOG";
/// Environment variable for OpenTelemetry service name.
pub const OTEL_SERVICE_NAME_ENV_VAR: &str = "OTEL_SERVICE_NAME";
/// Legacy environment variable for the broker URL.
pub const LEGACY_AMQP_URL_ENV_VAR: &str = "RABBIT_MQ_URL";

/// Which service a process belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceRole {
    /// Catalog of record. Consumes likes.
    Catalog,
    /// Replica plus likes. Consumes product changes.
    Engagement,
}

impl ServiceRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceRole::Catalog => "catalog",
            ServiceRole::Engagement => "engagement",
        }
    }
}

/// Tracing export configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Service name reported to the collector.
    pub service_name: String,
    /// OTLP gRPC endpoint. Spans are only exported when set.
    pub otlp_endpoint: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "productsync".to_string(),
            otlp_endpoint: None,
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub messaging: MessagingConfig,
    pub consumer: ConsumerConfig,
    pub telemetry: TelemetryConfig,
    pub users: UsersConfig,
}

impl Config {
    /// Catalog defaults: port 8000, publishes to `main`, consumes `admin`.
    pub fn catalog_defaults() -> Self {
        let mut config = Self::default();
        config.server.port = 8000;
        config.storage.url = "sqlite://catalog.db?mode=rwc".to_string();
        config.messaging.amqp.publish_queue = "main".to_string();
        config.messaging.amqp.consume_queue = "admin".to_string();
        config.telemetry.service_name = "productsync-catalog".to_string();
        config
    }

    /// Engagement defaults: port 5000, publishes to `admin`, consumes `main`.
    pub fn engagement_defaults() -> Self {
        let mut config = Self::default();
        config.server.port = 5000;
        config.storage.url = "sqlite://engagement.db?mode=rwc".to_string();
        config.messaging.amqp.publish_queue = "admin".to_string();
        config.messaging.amqp.consume_queue = "main".to_string();
        config.telemetry.service_name = "productsync-engagement".to_string();
        config
    }

    pub fn defaults_for(role: ServiceRole) -> Self {
        match role {
            ServiceRole::Catalog => Self::catalog_defaults(),
            ServiceRole::Engagement => Self::engagement_defaults(),
        }
    }

    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. Role defaults
    /// 2. `config.yaml` in current directory (if exists)
    /// 3. File specified by `path` argument (if provided)
    /// 4. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 5. `RABBIT_MQ_URL` and `OTEL_SERVICE_NAME`
    /// 6. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(role: ServiceRole, path: Option<&str>) -> Result<Self, ::config::ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(ConfigLib::try_from(&Self::defaults_for(role))?)
            .add_source(File::new("config", FileFormat::Yaml).required(false))
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(Self::well_known_env()?)
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        Ok(config)
    }

    /// Unprefixed variables the deployment environment sets by convention.
    fn well_known_env() -> Result<::config::Config, ::config::ConfigError> {
        ::config::Config::builder()
            .set_override_option(
                "messaging.amqp.url",
                std::env::var(LEGACY_AMQP_URL_ENV_VAR).ok(),
            )?
            .set_override_option(
                "telemetry.service_name",
                std::env::var(OTEL_SERVICE_NAME_ENV_VAR).ok(),
            )?
            .build()
    }

    /// Create config for testing: in-memory storage, role defaults otherwise.
    pub fn for_test(role: ServiceRole) -> Self {
        let mut config = Self::defaults_for(role);
        config.storage.url = "sqlite::memory:".to_string();
        config
    }
}
