//! Acceptor, filter chain and dispatcher configuration

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

/// Largest id before the generator wraps to zero
pub const DEFAULT_MAX_ROTATE_ID: i64 = 372_036_854_775_807;

/// Receiver intake settings
///
/// ```toml
/// [acceptor]
/// sync_out_size = 10000
/// async_out_size = 10000
/// max_rotate_id = 372036854775807
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AcceptorConfig {
    /// Intake channel for receivers with their own flow control
    pub sync_out_size: usize,
    /// Intake channel for receivers that must never block
    pub async_out_size: usize,
    /// Id generator wraps at this value
    pub max_rotate_id: i64,
}

impl Default for AcceptorConfig {
    fn default() -> Self {
        Self {
            sync_out_size: 10_000,
            async_out_size: 10_000,
            max_rotate_id: DEFAULT_MAX_ROTATE_ID,
        }
    }
}

/// Filters run between the acceptor and the journal
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AcceptorFiltersConfig {
    pub n_workers: usize,
    pub out_size: usize,
    pub reenter_size: usize,
    pub default: DefaultFilterConfig,
}

impl Default for AcceptorFiltersConfig {
    fn default() -> Self {
        Self {
            n_workers: 4,
            out_size: 1000,
            reenter_size: 1000,
            default: DefaultFilterConfig::default(),
        }
    }
}

/// Tag gatekeeping and field injection
///
/// ```toml
/// [acceptor_filters.default]
/// remove_empty_tag = true
/// remove_unsupported_tag = true
/// accept_tags = ["app.prod"]
///
/// [acceptor_filters.default.add."app.prod"]
/// source = "%{@tag}"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DefaultFilterConfig {
    pub remove_empty_tag: bool,
    pub remove_unsupported_tag: bool,
    pub accept_tags: Vec<String>,
    /// tag → field → template
    pub add: BTreeMap<String, BTreeMap<String, String>>,
}

impl Default for DefaultFilterConfig {
    fn default() -> Self {
        Self {
            remove_empty_tag: true,
            remove_unsupported_tag: false,
            accept_tags: Vec::new(),
            add: BTreeMap::new(),
        }
    }
}

/// Per-tag dispatch
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub n_workers: usize,
    /// Channel from the tag pipelines to the post filters
    pub out_size: usize,
    /// Tear down a tag pipeline after this long without messages; 0 disables
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            n_workers: 4,
            out_size: 1000,
            idle_timeout: Duration::from_secs(600),
        }
    }
}

/// Filters run between the tag pipelines and the producer
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PostFiltersConfig {
    pub n_workers: usize,
    pub out_size: usize,
    pub reenter_size: usize,
    /// Rewrite `<app>.<env>` tags of forwarded records
    pub tag_rewriters: Vec<TagRewriterConfig>,
    /// Normalise field names and types for search sinks
    pub normalize_fields: bool,
    /// Field guaranteed to exist after normalisation
    pub message_key: String,
}

impl Default for PostFiltersConfig {
    fn default() -> Self {
        Self {
            n_workers: 4,
            out_size: 1000,
            reenter_size: 1000,
            tag_rewriters: Vec::new(),
            normalize_fields: false,
            message_key: "message".into(),
        }
    }
}

/// One tag rewriter
#[derive(Debug, Clone, Deserialize)]
pub struct TagRewriterConfig {
    /// Tag to rewrite, e.g. `forward-app.sit`
    pub tag: String,
    /// Payload field holding the original `<app>.<env>` tag
    pub tag_key: String,
}
