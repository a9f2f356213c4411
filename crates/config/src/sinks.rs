//! Producer and sink configuration
//!
//! ```toml
//! [producer]
//! n_workers = 4
//!
//! [sinks.stdout]
//! type = "stdout"
//! tags = ["app.prod"]
//!
//! [sinks.blackhole]
//! type = "null"
//! discard_when_blocked = true
//! ```

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

/// Multi-sink fan-out settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    pub n_workers: usize,
    /// Capacity of the success and failure report channels
    pub report_size: usize,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            n_workers: 4,
            report_size: 10_000,
        }
    }
}

/// Named sink instances
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SinksConfig {
    #[serde(flatten)]
    sinks: HashMap<String, SinkConfig>,
}

impl SinksConfig {
    /// Get a sink by name
    pub fn get(&self, name: &str) -> Option<&SinkConfig> {
        self.sinks.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sinks.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SinkConfig)> {
        self.sinks.iter()
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

/// Configuration for a single sink instance
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkConfig {
    /// Acknowledges (or fails) every delivery without writing
    Null(NullSinkConfig),

    /// JSON lines on stdout
    Stdout(StdoutSinkConfig),
}

impl SinkConfig {
    pub fn is_enabled(&self) -> bool {
        match self {
            Self::Null(c) => c.enabled,
            Self::Stdout(c) => c.enabled,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null(_) => "null",
            Self::Stdout(_) => "stdout",
        }
    }

    /// Accepted tags; empty means every tag
    pub fn tags(&self) -> &[String] {
        match self {
            Self::Null(c) => &c.tags,
            Self::Stdout(c) => &c.tags,
        }
    }
}

/// Null sink configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NullSinkConfig {
    pub enabled: bool,
    pub tags: Vec<String>,
    pub discard_when_blocked: bool,
    pub queue_size: usize,
    /// Report every delivery as failed (keeps data in the journal)
    pub fail: bool,
}

impl Default for NullSinkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tags: Vec::new(),
            discard_when_blocked: true,
            queue_size: 1000,
            fail: false,
        }
    }
}

/// Stdout sink configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StdoutSinkConfig {
    pub enabled: bool,
    pub tags: Vec<String>,
    pub discard_when_blocked: bool,
    pub queue_size: usize,
    /// Deliveries per write
    pub batch_size: usize,
    /// Flush a partial batch after this long
    #[serde(with = "humantime_serde")]
    pub max_wait: Duration,
}

impl Default for StdoutSinkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tags: Vec::new(),
            discard_when_blocked: false,
            queue_size: 1000,
            batch_size: 500,
            max_wait: Duration::from_secs(1),
        }
    }
}
