//! Journal configuration
//!
//! ```toml
//! [journal]
//! dir = "data/journal"
//! segment_size_bytes = 104857600
//! compress = false
//! committed_id_ttl = "10m"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Smallest segment size we accept before rotating
pub const MIN_SEGMENT_SIZE_BYTES: u64 = 10 * 1024 * 1024;

/// Durable per-tag journal settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    /// Root directory; one subdirectory per tag
    pub dir: PathBuf,

    /// Rotate a segment once it reaches this size
    /// Default: 100MB, minimum 10MB
    pub segment_size_bytes: u64,

    /// LZ4-compress segments
    pub compress: bool,

    /// How long committed ids are remembered in memory for replay filtering
    #[serde(with = "humantime_serde")]
    pub committed_id_ttl: Duration,

    /// Per-tag data writer queue
    pub data_queue_size: usize,

    /// Per-tag commit writer queue
    pub commit_queue_size: usize,

    /// Shared commit queue fed by the producer
    pub shared_commit_queue_size: usize,

    /// Journal output channel
    pub output_size: usize,

    /// Attempts per segment write
    pub max_write_retries: usize,

    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,

    /// Buffered writers are flushed at this interval
    #[serde(with = "humantime_serde")]
    pub flush_interval: Duration,

    /// Interval between legacy replay attempts
    #[serde(with = "humantime_serde")]
    pub legacy_interval: Duration,

    /// Sleep before retrying a push into a full replay sink
    #[serde(with = "humantime_serde")]
    pub legacy_retry_interval: Duration,

    /// Interval of committed-id pruning and pool trimming
    #[serde(with = "humantime_serde")]
    pub hygiene_interval: Duration,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data/journal"),
            segment_size_bytes: 100 * 1024 * 1024,
            compress: false,
            committed_id_ttl: Duration::from_secs(600),
            data_queue_size: 10_000,
            commit_queue_size: 50_000,
            shared_commit_queue_size: 50_000,
            output_size: 10_000,
            max_write_retries: 3,
            retry_delay: Duration::from_millis(10),
            flush_interval: Duration::from_secs(1),
            legacy_interval: Duration::from_secs(3),
            legacy_retry_interval: Duration::from_secs(1),
            hygiene_interval: Duration::from_secs(60),
        }
    }
}

impl JournalConfig {
    /// Segment size with the 10MB floor applied
    pub fn effective_segment_size(&self) -> u64 {
        if self.segment_size_bytes < MIN_SEGMENT_SIZE_BYTES {
            tracing::warn!(
                configured = self.segment_size_bytes,
                minimum = MIN_SEGMENT_SIZE_BYTES,
                "journal segment size too small, using minimum"
            );
            MIN_SEGMENT_SIZE_BYTES
        } else {
            self.segment_size_bytes
        }
    }
}
