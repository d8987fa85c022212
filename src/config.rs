//! Configuration management for Floodgate.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Main configuration for the Floodgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FloodgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    "127.0.0.1:8080".parse().unwrap()
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Redis URL of the shared counter store. When unset, counters are
    /// kept in process memory, which only enforces limits within a
    /// single instance.
    pub redis_url: Option<String>,

    /// Bound on each store round-trip in milliseconds
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            command_timeout_ms: default_command_timeout_ms(),
        }
    }
}

fn default_command_timeout_ms() -> u64 {
    250
}

impl StoreConfig {
    /// Bound on each store round-trip.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Path to the feature rules file
    pub rules_path: Option<String>,
}

impl FloodgateConfig {
    /// Load configuration from a file path.
    pub fn from_file(path: &str) -> crate::error::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: FloodgateConfig = serde_yaml::from_str(&contents)
            .map_err(|e| crate::error::FloodgateError::Config(e.to_string()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FloodgateConfig::default();

        assert_eq!(config.server.listen_addr, default_listen_addr());
        assert!(config.store.redis_url.is_none());
        assert_eq!(config.store.command_timeout(), Duration::from_millis(250));
        assert!(config.rate_limiting.rules_path.is_none());
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r#"
server:
  listen_addr: "0.0.0.0:9000"
store:
  redis_url: "redis://cache.internal:6379"
"#;
        let config: FloodgateConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.server.listen_addr, "0.0.0.0:9000".parse().unwrap());
        assert_eq!(
            config.store.redis_url.as_deref(),
            Some("redis://cache.internal:6379")
        );
        // Unspecified sections keep their defaults.
        assert_eq!(config.store.command_timeout_ms, 250);
    }
}
