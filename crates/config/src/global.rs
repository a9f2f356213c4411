//! Global configuration settings
//!
//! These settings apply across all components and provide sensible defaults.

use std::time::Duration;

use serde::Deserialize;

/// Global configuration that applies to all components
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Host name used in the message distribution key
    /// Default: `$HOSTNAME`, else "localhost"
    pub host: String,

    /// Deployment environment (e.g. "sit", "prod")
    /// Default: "sit"
    pub env: String,

    /// Idle messages kept in the shared message pool
    /// Default: 10000
    pub pool_size: usize,

    /// How long to wait for each task group to drain on shutdown
    /// Default: 30s
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,

    /// Interval between heartbeat log lines
    /// Default: 60s
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".into()),
            env: "sit".into(),
            pool_size: 10_000,
            shutdown_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GlobalConfig::default();
        assert!(!config.host.is_empty());
        assert_eq!(config.env, "sit");
        assert_eq!(config.pool_size, 10_000);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_partial_override() {
        let config: GlobalConfig = toml::from_str("env = \"prod\"\nheartbeat_interval = \"5s\"").unwrap();
        assert_eq!(config.env, "prod");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.pool_size, 10_000);
    }
}
