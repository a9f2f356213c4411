//! Lock-free message pool
//!
//! Messages are allocated at ingress and recycled once the completion tracker
//! decides nobody else can still hold them. Uses a lock-free queue for O(1)
//! get/put operations.
//!
//! # Example
//!
//! ```ignore
//! let pool = MessagePool::new(10_000);
//!
//! let mut msg = pool.get();
//! msg.tag.push_str("app.prod");
//!
//! // After the last sink responded
//! pool.put(msg);
//! ```

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::Message;

/// Lock-free pool of reusable `Message` values
///
/// Starts empty and fills up as messages are returned. When the pool is
/// exhausted, new messages are allocated on demand.
pub struct MessagePool {
    /// Lock-free queue of available messages
    queue: ArrayQueue<Message>,

    /// Metrics
    metrics: PoolMetrics,
}

/// Metrics for message pool monitoring
#[derive(Debug, Default)]
pub struct PoolMetrics {
    /// Messages reused from the free list
    pub hits: AtomicU64,

    /// Fresh allocations (free list empty)
    pub misses: AtomicU64,

    /// Messages returned to the free list
    pub returns: AtomicU64,

    /// Messages dropped on return (free list full) or trimmed
    pub drops: AtomicU64,
}

impl PoolMetrics {
    /// Create new metrics instance
    pub const fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            returns: AtomicU64::new(0),
            drops: AtomicU64::new(0),
        }
    }

    /// Get snapshot of metrics
    pub fn snapshot(&self) -> PoolMetricsSnapshot {
        PoolMetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            returns: self.returns.load(Ordering::Relaxed),
            drops: self.drops.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of pool metrics
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct PoolMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub returns: u64,
    pub drops: u64,
}

impl PoolMetricsSnapshot {
    /// Calculate hit rate from snapshot
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            1.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl MessagePool {
    /// Create an empty pool holding at most `capacity` idle messages
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            metrics: PoolMetrics::new(),
        }
    }

    /// Take a cleared message from the pool, allocating on a miss
    #[inline]
    pub fn get(&self) -> Message {
        match self.queue.pop() {
            Some(msg) => {
                self.metrics.hits.fetch_add(1, Ordering::Relaxed);
                msg
            }
            None => {
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                Message::default()
            }
        }
    }

    /// Return a message to the pool
    ///
    /// The message is reset before it is queued. If the pool is full, the
    /// message is dropped.
    #[inline]
    pub fn put(&self, mut msg: Message) {
        msg.reset();
        match self.queue.push(msg) {
            Ok(()) => {
                self.metrics.returns.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.metrics.drops.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Release idle messages until at most `keep` remain; returns how many were freed
    pub fn trim(&self, keep: usize) -> usize {
        let mut freed = 0;
        while self.queue.len() > keep {
            if self.queue.pop().is_none() {
                break;
            }
            freed += 1;
        }
        self.metrics
            .drops
            .fetch_add(freed as u64, Ordering::Relaxed);
        freed
    }

    /// Number of idle messages currently pooled
    #[inline]
    pub fn available(&self) -> usize {
        self.queue.len()
    }

    /// Maximum number of idle messages
    #[inline]
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    #[inline]
    pub fn metrics(&self) -> &PoolMetrics {
        &self.metrics
    }
}

impl std::fmt::Debug for MessagePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessagePool")
            .field("available", &self.available())
            .field("capacity", &self.capacity())
            .finish()
    }
}
