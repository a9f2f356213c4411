//! Pipeline metrics
//!
//! Drop paths are hot under overload, so each one reports through a
//! [`DropLog`]: drops are counted on every call but logged at most once per
//! second, aggregated.

use std::sync::atomic::{AtomicU64, Ordering};

use sluice_metrics::Counter;

/// Log interval in milliseconds
const LOG_INTERVAL_MS: u64 = 1000;
/// Drops per interval that escalate the log to ERROR
const CRITICAL_DROP_THRESHOLD: u64 = 100;

/// Rate-limited logging for one drop path
pub struct DropLog {
    /// What is being dropped, used as the log message context
    what: &'static str,
    /// Drops since the process started
    total: Counter,
    /// Drops in the current interval
    interval_drops: AtomicU64,
    /// Last log time (epoch milliseconds)
    last_log_ms: AtomicU64,
}

impl DropLog {
    pub fn new(what: &'static str) -> Self {
        Self {
            what,
            total: Counter::new(),
            interval_drops: AtomicU64::new(0),
            last_log_ms: AtomicU64::new(Self::now_ms()),
        }
    }

    /// Count one dropped message. Returns true if a log line was emitted.
    pub fn record(&self, tag: &str) -> bool {
        self.total.inc();
        self.interval_drops.fetch_add(1, Ordering::Relaxed);
        self.maybe_log(tag)
    }

    #[inline]
    pub fn total(&self) -> u64 {
        self.total.get()
    }

    fn maybe_log(&self, tag: &str) -> bool {
        let now = Self::now_ms();
        let last = self.last_log_ms.load(Ordering::Relaxed);
        if now.saturating_sub(last) < LOG_INTERVAL_MS {
            return false;
        }

        // one caller wins the slot
        if self
            .last_log_ms
            .compare_exchange(last, now, Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {
            return false;
        }

        let drops = self.interval_drops.swap(0, Ordering::Relaxed);
        if drops == 0 {
            return false;
        }

        if drops > CRITICAL_DROP_THRESHOLD {
            tracing::error!(
                dropped = drops,
                last_tag = %tag,
                threshold = CRITICAL_DROP_THRESHOLD,
                "{}: sustained drops, downstream cannot keep up",
                self.what
            );
        } else {
            tracing::warn!(dropped = drops, last_tag = %tag, "{}: messages dropped in last second", self.what);
        }
        true
    }

    #[inline]
    fn now_ms() -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    #[cfg(test)]
    pub fn current_drops(&self) -> u64 {
        self.interval_drops.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for DropLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DropLog")
            .field("what", &self.what)
            .field("total", &self.total.get())
            .field("interval_drops", &self.interval_drops.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_counts_without_logging_early() {
        let log = DropLog::new("dispatcher");
        assert!(!log.record("app"));
        assert!(!log.record("app"));
        assert_eq!(log.current_drops(), 2);
        assert_eq!(log.total(), 2);
    }

    #[test]
    fn test_logs_after_interval() {
        let log = DropLog::new("dispatcher");
        log.last_log_ms.store(0, Ordering::Relaxed);
        assert!(log.record("app"));
        assert_eq!(log.current_drops(), 0);
        assert_eq!(log.total(), 1);
    }

    #[test]
    fn test_debug() {
        let log = DropLog::new("acceptor");
        log.record("app");
        let debug = format!("{log:?}");
        assert!(debug.contains("DropLog"));
        assert!(debug.contains("acceptor"));
    }
}
