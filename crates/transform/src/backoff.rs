//! Adaptive idle sleep
//!
//! Workers with pending state poll their input instead of blocking on it.
//! The timer keeps that polling cheap: the wait doubles every
//! `WAITS_TO_DOUBLE` idle rounds up to `max`, and drops back to `initial`
//! as soon as work arrives.

use std::time::Duration;

/// Idle rounds before the wait doubles
const WAITS_TO_DOUBLE: u32 = 2;

#[derive(Debug, Clone)]
pub struct BackoffTimer {
    initial: Duration,
    max: Duration,
    wait: Duration,
    idle_rounds: u32,
}

impl BackoffTimer {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            wait: initial,
            idle_rounds: 0,
        }
    }

    /// Wait used by the next `sleep`, before any doubling
    #[inline]
    pub fn current(&self) -> Duration {
        self.wait
    }

    /// Count an idle round and return how long to sleep for it
    pub fn next_wait(&mut self) -> Duration {
        self.idle_rounds += 1;
        if self.idle_rounds == WAITS_TO_DOUBLE {
            self.wait = (self.wait * 2).min(self.max);
            self.idle_rounds = 0;
        }
        self.wait
    }

    pub async fn sleep(&mut self) {
        let wait = self.next_wait();
        tokio::time::sleep(wait).await;
    }

    /// Work arrived; restart from the initial wait
    pub fn reset(&mut self) {
        self.wait = self.initial;
        self.idle_rounds = 0;
    }
}
