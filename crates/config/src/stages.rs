//! Tag stage configuration
//!
//! Stages run inside per-tag pipelines, in the order declared here.
//!
//! ```toml
//! [tag_stages.concat]
//! n_workers = 2
//! max_len = 100000
//! lb_key = "container_id"
//!
//! [tag_stages.concat.tags."app.prod"]
//! msg_key = "log"
//! identifier = "container_id"
//! head_pattern = "^\\d{4}-\\d{2}-\\d{2}"
//! ```

use std::collections::BTreeMap;

use serde::Deserialize;

/// All tag stages
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TagStagesConfig {
    /// Capacity of channels between stage workers
    pub internal_size: usize,
    /// Multi-line concatenation, disabled when absent
    pub concat: Option<ConcatConfig>,
}

impl Default for TagStagesConfig {
    fn default() -> Self {
        Self {
            internal_size: 10_000,
            concat: None,
        }
    }
}

/// Multi-line concatenation stage
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConcatConfig {
    /// Workers per tag; lines are routed by `lb_key`
    pub n_workers: usize,
    /// Force flush once content reaches this many bytes
    pub max_len: usize,
    /// Field used to pick a worker
    pub lb_key: String,
    /// Tags handled by the stage
    pub tags: BTreeMap<String, ConcatTagConfig>,
}

impl Default for ConcatConfig {
    fn default() -> Self {
        Self {
            n_workers: 1,
            max_len: 100_000,
            lb_key: "container_id".into(),
            tags: BTreeMap::new(),
        }
    }
}

/// Concatenation rule for one tag
#[derive(Debug, Clone, Deserialize)]
pub struct ConcatTagConfig {
    /// Field holding the line content
    #[serde(default = "default_msg_key")]
    pub msg_key: String,
    /// Field identifying the stream (e.g. container id)
    #[serde(default = "default_identifier")]
    pub identifier: String,
    /// Regex matching the first line of a record
    pub head_pattern: String,
}

fn default_msg_key() -> String {
    "log".into()
}

fn default_identifier() -> String {
    "container_id".into()
}
