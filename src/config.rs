use std::collections::HashMap;
use std::time::Duration;

use config::{Config as ConfigLib, ConfigBuilder, ConfigError, Environment, builder::DefaultState};
use serde::{Deserialize, Serialize};

use crate::auth::KeyEnvironment;
use crate::outbound::webhook::retry_strategy::DEFAULT_BACKOFF_SECS;
use crate::outbound::webhook::schemas::DEFAULT_USER_AGENT;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub security: SecurityConfig,
    pub delivery: DeliveryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Tag embedded in issued API keys.
    pub environment: KeyEnvironment,
    /// Server-side key for hashing partner secrets.
    pub secret_pepper: String,
    pub timestamp_tolerance_secs: u64,
    pub nonce_ttl_secs: u64,
    pub nonce_sweep_interval_secs: u64,
    pub nonce_capacity: usize,
}

// Keep the pepper out of startup logs.
impl std::fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("environment", &self.environment)
            .field("secret_pepper", &"<redacted>")
            .field("timestamp_tolerance_secs", &self.timestamp_tolerance_secs)
            .field("nonce_ttl_secs", &self.nonce_ttl_secs)
            .field("nonce_sweep_interval_secs", &self.nonce_sweep_interval_secs)
            .field("nonce_capacity", &self.nonce_capacity)
            .finish()
    }
}

impl SecurityConfig {
    pub fn timestamp_tolerance(&self) -> Duration {
        Duration::from_secs(self.timestamp_tolerance_secs)
    }

    pub fn nonce_ttl(&self) -> Duration {
        Duration::from_secs(self.nonce_ttl_secs)
    }

    pub fn nonce_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.nonce_sweep_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    pub timeout_secs: u64,
    pub retry_interval_secs: u64,
    pub retry_batch_size: usize,
    pub backoff_secs: Vec<u64>,
    pub user_agent: String,
}

impl DeliveryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_sources(None)
    }

    fn load_with_sources(env_vars: Option<HashMap<String, String>>) -> Result<Self, ConfigError> {
        let mut builder = Self::set_defaults()?;
        // If env_vars is provided, we use it instead of system environment
        // This is to avoid systems variables pollution across tests
        if let Some(vars) = env_vars {
            for (key, value) in vars {
                builder = builder.set_override(&key, value)?;
            }
        } else {
            // Should be in the format APP_SERVER__PORT or APP_DELIVERY__TIMEOUT_SECS
            builder = builder.add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("delivery.backoff_secs")
                    .try_parsing(true),
            );
        }

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()
    }

    /// Intervals, the delivery timeout and sizes must be non-zero.
    fn validate(self) -> Result<Self, ConfigError> {
        let must_be_positive = [
            ("delivery.timeout_secs", self.delivery.timeout_secs),
            ("delivery.retry_interval_secs", self.delivery.retry_interval_secs),
            ("delivery.retry_batch_size", self.delivery.retry_batch_size as u64),
            (
                "security.nonce_sweep_interval_secs",
                self.security.nonce_sweep_interval_secs,
            ),
            ("security.nonce_capacity", self.security.nonce_capacity as u64),
        ];
        if let Some((key, _)) = must_be_positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Message(format!("{key} must be greater than 0")));
        }
        Ok(self)
    }

    /// Set default values for the configuration.
    /// This is used when no environment variables or config file are provided
    fn set_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        ConfigLib::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3000)?
            .set_default("security.environment", "test")?
            .set_default("security.secret_pepper", "b2b-parking-secret-salt")?
            .set_default("security.timestamp_tolerance_secs", 300)?
            .set_default("security.nonce_ttl_secs", 600)?
            .set_default("security.nonce_sweep_interval_secs", 300)?
            .set_default("security.nonce_capacity", 100_000)?
            .set_default("delivery.timeout_secs", 30)?
            .set_default("delivery.retry_interval_secs", 30)?
            .set_default("delivery.retry_batch_size", 50)?
            .set_default("delivery.backoff_secs", DEFAULT_BACKOFF_SECS.to_vec())?
            .set_default("delivery.user_agent", DEFAULT_USER_AGENT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::load_with_sources(Some(HashMap::new())).expect("Failed to load config");

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.security.environment, KeyEnvironment::Test);
        assert_eq!(config.security.timestamp_tolerance(), Duration::from_secs(300));
        assert_eq!(config.security.nonce_ttl(), Duration::from_secs(600));
        assert_eq!(config.security.nonce_capacity, 100_000);
        assert_eq!(config.delivery.timeout(), Duration::from_secs(30));
        assert_eq!(config.delivery.retry_batch_size, 50);
        assert_eq!(config.delivery.backoff_secs, vec![1, 5, 30, 300, 900]);
        assert_eq!(config.delivery.user_agent, "B2B-Parking-Webhooks/1.0");
    }

    #[test]
    fn test_env_config() {
        let mut env_vars = HashMap::new();
        env_vars.insert("server.host".to_string(), "0.0.0.0".to_string());
        env_vars.insert("server.port".to_string(), "443".to_string());
        env_vars.insert("security.environment".to_string(), "live".to_string());
        env_vars.insert("delivery.timeout_secs".to_string(), "10".to_string());

        let config = Config::load_with_sources(Some(env_vars)).expect("Failed to load config");

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 443);
        assert_eq!(config.security.environment, KeyEnvironment::Live);
        assert_eq!(config.delivery.timeout_secs, 10);
    }

    #[test]
    fn test_partial_env_override() {
        let mut env_vars = HashMap::new();
        // We just override the host
        env_vars.insert("server.host".to_string(), "192.168.1.1".to_string());

        let config = Config::load_with_sources(Some(env_vars)).expect("Failed to load config");

        assert_eq!(config.server.host, "192.168.1.1");
        // The other values should use default
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.delivery.retry_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_zero_intervals_are_rejected() {
        for key in [
            "delivery.timeout_secs",
            "delivery.retry_interval_secs",
            "security.nonce_sweep_interval_secs",
        ] {
            let env_vars = HashMap::from([(key.to_string(), "0".to_string())]);
            let err = Config::load_with_sources(Some(env_vars)).unwrap_err();
            assert!(
                err.to_string().contains(key),
                "unexpected error for {key}: {err}"
            );
        }
    }

    #[test]
    fn test_pepper_is_not_logged() {
        let config = Config::load_with_sources(Some(HashMap::new())).expect("Failed to load config");
        let printed = format!("{config:?}");
        assert!(!printed.contains("b2b-parking-secret-salt"));
    }
}
