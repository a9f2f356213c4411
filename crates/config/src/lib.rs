//! Sluice configuration
//!
//! One TOML file, every section optional. Parsing validates the result, so
//! a `Config` in hand is always usable.
//!
//! # Parsing
//!
//! ```
//! use sluice_config::Config;
//! use std::str::FromStr;
//!
//! let config = Config::from_str("[sinks.stdout]\ntype = \"stdout\"").unwrap();
//! ```
//!
//! # Example Minimal Config
//!
//! ```toml
//! [journal]
//! dir = "data/journal"
//!
//! [sinks.stdout]
//! type = "stdout"
//! ```

mod error;
mod global;
mod journal;
mod logging;
mod metrics;
mod pipeline;
mod sinks;
mod stages;
mod validation;

use std::fs;
use std::path::Path;
use std::str::FromStr;

pub use error::{ConfigError, Result};
pub use global::GlobalConfig;
pub use journal::JournalConfig;
pub use logging::{LogConfig, LogFormat, LogLevel};
pub use metrics::{MetricsConfig, MetricsFormat};
pub use pipeline::{
    AcceptorConfig, AcceptorFiltersConfig, DefaultFilterConfig, DispatcherConfig,
    PostFiltersConfig, TagRewriterConfig,
};
pub use sinks::{NullSinkConfig, ProducerConfig, SinkConfig, SinksConfig, StdoutSinkConfig};
pub use stages::{ConcatConfig, ConcatTagConfig, TagStagesConfig};

use serde::Deserialize;

/// Top-level configuration, one field per TOML section
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Process-wide settings (host, env, pool, shutdown)
    pub global: GlobalConfig,

    /// Logging configuration
    pub log: LogConfig,

    /// Metrics reporting configuration
    pub metrics: MetricsConfig,

    /// Durable journal
    pub journal: JournalConfig,

    /// Receiver intake channels and id generation
    pub acceptor: AcceptorConfig,

    /// Filters applied before the journal
    pub acceptor_filters: AcceptorFiltersConfig,

    /// Per-tag pipeline dispatch
    pub dispatcher: DispatcherConfig,

    /// Per-tag stages (concatenation)
    pub tag_stages: TagStagesConfig,

    /// Filters applied after the tag pipelines
    pub post_filters: PostFiltersConfig,

    /// Multi-sink fan-out
    pub producer: ProducerConfig,

    /// Downstream senders
    pub sinks: SinksConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read, contains invalid TOML or fails validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;

        Self::from_str(&contents)
    }

    fn parse(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// Checks for:
    /// - Regex patterns compile
    /// - Required fields are present for enabled components
    /// - Sizes and worker counts are positive
    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }

    /// Names of enabled sinks, sorted
    pub fn enabled_sinks(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .sinks
            .iter()
            .filter(|(_, sink)| sink.is_enabled())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use std::time::Duration;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_str("").unwrap();
        assert_eq!(config.acceptor.max_rotate_id, 372_036_854_775_807);
        assert_eq!(config.dispatcher.n_workers, 4);
        assert!(config.sinks.is_empty());
        assert!(config.tag_stages.concat.is_none());
    }

    #[test]
    fn test_full_config_parse() {
        let toml = r#"
[global]
host = "node-1"
env = "prod"

[log]
level = "debug"

[metrics]
interval = "5s"
format = "json"

[journal]
dir = "/var/lib/sluice"
segment_size_bytes = 20971520
compress = true
committed_id_ttl = "5m"

[acceptor]
max_rotate_id = 10000000

[acceptor_filters.default]
remove_unsupported_tag = true
accept_tags = ["app.prod"]

[acceptor_filters.default.add."app.prod"]
cluster = "east"

[dispatcher]
n_workers = 2
idle_timeout = "30m"

[tag_stages.concat]
max_len = 50000
lb_key = "container_id"

[tag_stages.concat.tags."app.prod"]
msg_key = "log"
identifier = "container_id"
head_pattern = "^\\d{4}-\\d{2}-\\d{2}"

[[post_filters.tag_rewriters]]
tag = "forward-app.prod"
tag_key = "tag"

[producer]
n_workers = 8

[sinks.stdout]
type = "stdout"
tags = ["app.prod"]
batch_size = 100
max_wait = "500ms"

[sinks.blackhole]
type = "null"
discard_when_blocked = true
"#;
        let config = Config::from_str(toml).unwrap();

        assert_eq!(config.global.host, "node-1");
        assert_eq!(config.log.level, LogLevel::Debug);
        assert_eq!(config.metrics.format, MetricsFormat::Json);
        assert!(config.journal.compress);
        assert_eq!(config.journal.committed_id_ttl, Duration::from_secs(300));
        assert_eq!(config.acceptor_filters.default.accept_tags, vec!["app.prod"]);
        assert_eq!(
            config.acceptor_filters.default.add["app.prod"]["cluster"],
            "east"
        );
        assert_eq!(config.dispatcher.idle_timeout, Duration::from_secs(1800));
        let concat = config.tag_stages.concat.as_ref().unwrap();
        assert_eq!(concat.max_len, 50000);
        assert_eq!(concat.tags["app.prod"].msg_key, "log");
        assert_eq!(config.post_filters.tag_rewriters.len(), 1);
        assert_eq!(config.producer.n_workers, 8);
        assert_eq!(config.enabled_sinks(), vec!["blackhole", "stdout"]);
        match config.sinks.get("stdout") {
            Some(SinkConfig::Stdout(c)) => {
                assert_eq!(c.batch_size, 100);
                assert_eq!(c.max_wait, Duration::from_millis(500));
            }
            other => panic!("unexpected sink config: {other:?}"),
        }
    }

    #[test]
    fn test_invalid_toml() {
        assert!(Config::from_str("invalid { toml").is_err());
    }

    #[test]
    fn test_from_file_missing() {
        let err = Config::from_file("/nonexistent/sluice.toml").unwrap_err();
        assert!(matches!(err, ConfigError::IoError { .. }));
    }
}
