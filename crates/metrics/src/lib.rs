//! Sluice - Metrics
//!
//! Internal metrics collection and reporting for observability.
//!
//! # Overview
//!
//! This crate provides:
//! - Atomic counters and a throughput meter for hot-path accounting
//! - `ChannelStats` for queue depth reporting
//! - A pull-style `MetricsRegistry`: each component registers a
//!   name → snapshot function, the registry calls them on demand
//! - A `Reporter` that logs registry snapshots at an interval (human, JSON)
//!
//! # Registry Pattern
//!
//! Components keep their counters in an `Arc` and register a closure that
//! reads them. The closure stays valid after `run()` consumes the component.
//!
//! ```text
//! Component (owns Arc<Metrics>)
//!     │
//!     ├──► registry.register("journal", move || metrics.snapshot_json())
//!     │
//!     └──► run() [consumes self, Arc keeps metrics alive]
//!
//! Reporter
//!     └──► every interval: registry.snapshot() → tracing::info!
//! ```

mod registry;
mod reporter;

pub use registry::{MetricsRegistry, SnapshotFn};
pub use reporter::{ReportFormat, Reporter, ReporterConfig};

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;

/// Atomic counter wrapper for convenient metric operations
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Create a new counter initialized to 0
    #[inline]
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Increment the counter by `val` (relaxed ordering for performance)
    #[inline]
    pub fn add(&self, val: u64) {
        self.0.fetch_add(val, Ordering::Relaxed);
    }

    /// Increment the counter by 1
    #[inline]
    pub fn inc(&self) {
        self.add(1);
    }

    /// Get the current value (relaxed ordering)
    #[inline]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    /// Reset the counter to 0 and return the previous value
    #[inline]
    pub fn take(&self) -> u64 {
        self.0.swap(0, Ordering::Relaxed)
    }
}

/// Total count plus a per-second rate measured between reads
#[derive(Debug)]
pub struct Throughput {
    total: Counter,
    last: Mutex<(Instant, u64)>,
}

/// Point-in-time throughput reading
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct ThroughputSnapshot {
    pub total: u64,
    pub per_sec: f64,
}

impl Throughput {
    pub fn new() -> Self {
        Self {
            total: Counter::new(),
            last: Mutex::new((Instant::now(), 0)),
        }
    }

    #[inline]
    pub fn inc(&self) {
        self.total.inc();
    }

    #[inline]
    pub fn add(&self, n: u64) {
        self.total.add(n);
    }

    #[inline]
    pub fn total(&self) -> u64 {
        self.total.get()
    }

    /// Read the total and the rate since the previous snapshot
    pub fn snapshot(&self) -> ThroughputSnapshot {
        let total = self.total.get();
        let now = Instant::now();
        let mut last = self.last.lock();
        let elapsed = now.duration_since(last.0).as_secs_f64();
        let per_sec = if elapsed > 0.0 {
            total.saturating_sub(last.1) as f64 / elapsed
        } else {
            0.0
        };
        *last = (now, total);
        ThroughputSnapshot { total, per_sec }
    }
}

impl Default for Throughput {
    fn default() -> Self {
        Self::new()
    }
}

/// Queue depth of one channel
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct ChannelStats {
    pub len: usize,
    pub capacity: usize,
}

impl ChannelStats {
    #[inline]
    pub const fn new(len: usize, capacity: usize) -> Self {
        Self { len, capacity }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let c = Counter::new();
        c.inc();
        c.add(4);
        assert_eq!(c.get(), 5);
        assert_eq!(c.take(), 5);
        assert_eq!(c.get(), 0);
    }

    #[test]
    fn test_throughput_total_and_rate() {
        let t = Throughput::new();
        t.add(10);
        t.inc();
        let snap = t.snapshot();
        assert_eq!(snap.total, 11);
        assert!(snap.per_sec >= 0.0);

        // No new events since last read
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(t.snapshot().per_sec, 0.0);
    }

    #[test]
    fn test_channel_stats_serialize() {
        let json = serde_json::to_value(ChannelStats::new(3, 10)).unwrap();
        assert_eq!(json, serde_json::json!({"len": 3, "capacity": 10}));
    }
}
