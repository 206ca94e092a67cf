// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Publisher Configuration
//!
//! `RabbitMqConfig` is read once at startup from an optional
//! `config/rabbitmq.*` file overlaid by `RABBITMQ_*` environment variables
//! (a `.env` file is honored). Every field has a default so a bare
//! environment connects to a local broker as `guest`.

use crate::{retry::RetryPolicy, topology::TopologyDescriptor};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Prefix of the environment variables overriding the configuration.
pub const ENV_PREFIX: &str = "RABBITMQ";

/// Optional configuration file, without extension.
pub const CONFIG_FILE: &str = "config/rabbitmq";

/// Flat configuration surface of the publisher.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RabbitMqConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub vhost: String,
    pub client_name: String,
    pub main_exchange: String,
    pub dead_letter_exchange: String,
    pub dead_letter_queue: String,
    pub max_retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub connection_timeout_ms: u64,
    pub publisher_confirms: bool,
}

impl Default for RabbitMqConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_owned(),
            port: 5672,
            username: "guest".to_owned(),
            password: "guest".to_owned(),
            vhost: "/".to_owned(),
            client_name: "family-hub-publisher".to_owned(),
            main_exchange: "family-hub.events".to_owned(),
            dead_letter_exchange: "family-hub.dlx".to_owned(),
            dead_letter_queue: "family-hub.dlq".to_owned(),
            max_retry_attempts: 3,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 30_000,
            connection_timeout_ms: 30_000,
            publisher_confirms: true,
        }
    }
}

/// Where and how to reach the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub vhost: String,
    pub client_name: String,
    pub connection_timeout: Duration,
}

impl RabbitMqConfig {
    /// Loads `.env`, the optional config file and the environment, then
    /// validates the result.
    pub fn load() -> Result<RabbitMqConfig, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!(path = %path.display(), "loaded .env file");
        }

        let cfg = Config::builder()
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        Self::from_config(cfg)
    }

    /// Deserializes and validates an already assembled `config::Config`.
    pub fn from_config(cfg: Config) -> Result<RabbitMqConfig, ConfigError> {
        let parsed: RabbitMqConfig = cfg.try_deserialize()?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("host", &self.host),
            ("client_name", &self.client_name),
            ("main_exchange", &self.main_exchange),
            ("dead_letter_exchange", &self.dead_letter_exchange),
            ("dead_letter_queue", &self.dead_letter_queue),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Message(format!("`{field}` must not be empty")));
            }
        }

        if self.main_exchange == self.dead_letter_exchange {
            return Err(ConfigError::Message(
                "`main_exchange` and `dead_letter_exchange` must differ".to_owned(),
            ));
        }

        if self.max_retry_attempts == 0 {
            return Err(ConfigError::Message(
                "`max_retry_attempts` must be at least 1".to_owned(),
            ));
        }

        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(ConfigError::Message(format!(
                "`retry_base_delay_ms` ({}) exceeds `retry_max_delay_ms` ({})",
                self.retry_base_delay_ms, self.retry_max_delay_ms
            )));
        }

        if self.connection_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "`connection_timeout_ms` must be positive".to_owned(),
            ));
        }

        Ok(())
    }

    /// Connection settings for the broker.
    ///
    /// # Returns
    /// The endpoint with `connection_timeout_ms` turned into a `Duration`
    pub fn endpoint(&self) -> BrokerEndpoint {
        BrokerEndpoint {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
            vhost: self.vhost.clone(),
            client_name: self.client_name.clone(),
            connection_timeout: Duration::from_millis(self.connection_timeout_ms),
        }
    }

    /// Names of the main exchange and the dead-letter resources.
    pub fn topology(&self) -> TopologyDescriptor {
        TopologyDescriptor {
            main_exchange: self.main_exchange.clone(),
            dead_letter_exchange: self.dead_letter_exchange.clone(),
            dead_letter_queue: self.dead_letter_queue.clone(),
        }
    }

    /// Retry budget for one publish call.
    ///
    /// # Returns
    /// A `RetryPolicy` built from the attempt count and the millisecond delays
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retry_attempts,
            Duration::from_millis(self.retry_base_delay_ms),
            Duration::from_millis(self.retry_max_delay_ms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn from_toml(raw: &str) -> Result<RabbitMqConfig, ConfigError> {
        let cfg = Config::builder()
            .add_source(File::from_str(raw, FileFormat::Toml))
            .build()?;
        RabbitMqConfig::from_config(cfg)
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = RabbitMqConfig::default();
        assert_eq!(cfg.port, 5672);
        assert_eq!(cfg.max_retry_attempts, 3);
        assert_eq!(cfg.retry_base_delay_ms, 1_000);
        assert_eq!(cfg.retry_max_delay_ms, 30_000);
        assert_eq!(cfg.connection_timeout_ms, 30_000);
        assert!(cfg.publisher_confirms);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg = from_toml(
            r#"
            host = "rabbit.internal"
            port = 5673
            vhost = "family"
            publisher_confirms = false
            "#,
        )
        .unwrap();

        assert_eq!(cfg.host, "rabbit.internal");
        assert_eq!(cfg.port, 5673);
        assert_eq!(cfg.vhost, "family");
        assert!(!cfg.publisher_confirms);
        assert_eq!(cfg.main_exchange, "family-hub.events");
        assert_eq!(cfg.max_retry_attempts, 3);
    }

    #[test]
    fn empty_source_yields_defaults() {
        let cfg = RabbitMqConfig::from_config(Config::builder().build().unwrap()).unwrap();
        assert_eq!(cfg, RabbitMqConfig::default());
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(from_toml("max_retry_attempts = 0").is_err());
        assert!(from_toml("main_exchange = \"\"").is_err());
        assert!(from_toml("dead_letter_exchange = \"family-hub.events\"").is_err());
        assert!(from_toml("retry_base_delay_ms = 5000\nretry_max_delay_ms = 100").is_err());
        assert!(from_toml("connection_timeout_ms = 0").is_err());
    }

    #[test]
    fn derives_component_settings() {
        let cfg = RabbitMqConfig {
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 1_000,
            connection_timeout_ms: 5_000,
            ..Default::default()
        };

        let endpoint = cfg.endpoint();
        assert_eq!(endpoint.connection_timeout, Duration::from_millis(5_000));
        assert_eq!(endpoint.client_name, "family-hub-publisher");

        let topology = cfg.topology();
        assert_eq!(topology.dead_letter_queue, "family-hub.dlq");

        let policy = cfg.retry_policy();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
    }
}
