//! Common types for senders
//!
//! Errors and the counters every sender keeps.

use serde::Serialize;
use sluice_metrics::{Counter, Throughput, ThroughputSnapshot};
use thiserror::Error;

/// Metrics shared by all sender types
#[derive(Debug, Default)]
pub struct SinkMetrics {
    /// Deliveries taken off the sender's channel
    pub received: Throughput,

    /// Batches written successfully
    pub batches_written: Counter,

    /// Deliveries reported as succeeded
    pub succeeded: Counter,

    /// Deliveries reported as failed
    pub failed: Counter,

    /// Individual write attempts that returned an error
    pub write_errors: Counter,
}

impl SinkMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successfully written batch of `count` deliveries
    #[inline]
    pub fn batch_written(&self, count: u64) {
        self.batches_written.inc();
        self.succeeded.add(count);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            received: self.received.snapshot(),
            batches_written: self.batches_written.get(),
            succeeded: self.succeeded.get(),
            failed: self.failed.get(),
            write_errors: self.write_errors.get(),
        }
    }
}

/// Point-in-time snapshot of sender metrics
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricsSnapshot {
    pub received: ThroughputSnapshot,
    pub batches_written: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub write_errors: u64,
}

/// Sender errors
#[derive(Debug, Error)]
pub enum SinkError {
    /// Failed to write data
    #[error("write failed: {0}")]
    Write(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error for sink {sink}: {message}")]
    Config { sink: String, message: String },

    /// A sender's workers can only be started once
    #[error("sender {0} already spawned")]
    AlreadySpawned(String),

    /// All write attempts failed
    #[error("all {attempts} write attempts failed: {last_error}")]
    RetriesExhausted { attempts: usize, last_error: String },
}

impl SinkError {
    pub fn write(msg: impl Into<String>) -> Self {
        Self::Write(msg.into())
    }

    pub fn config(sink: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            sink: sink.into(),
            message: message.into(),
        }
    }
}

/// Result type for sender operations
pub type Result<T> = std::result::Result<T, SinkError>;

#[cfg(test)]
#[path = "common_test.rs"]
mod common_test;
