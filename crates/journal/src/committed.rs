//! Recently committed ids
//!
//! Legacy replay consults this index so records whose commit has not yet
//! reached a sealed commit segment are still skipped. Entries expire after
//! a TTL; the hygiene loop prunes them.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug)]
pub struct CommittedIds {
    ttl: Duration,
    ids: Mutex<HashMap<i64, Instant>>,
}

impl CommittedIds {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            ids: Mutex::new(HashMap::new()),
        }
    }

    pub fn extend(&self, ids: impl IntoIterator<Item = i64>) {
        let now = Instant::now();
        let mut guard = self.ids.lock();
        for id in ids {
            guard.insert(id, now);
        }
    }

    pub fn contains(&self, id: i64) -> bool {
        self.ids.lock().contains_key(&id)
    }

    /// Drop entries older than the TTL. Returns how many were removed.
    pub fn prune(&self) -> usize {
        self.prune_at(Instant::now())
    }

    fn prune_at(&self, now: Instant) -> usize {
        let mut guard = self.ids.lock();
        let before = guard.len();
        guard.retain(|_, at| now.saturating_duration_since(*at) < self.ttl);
        before - guard.len()
    }

    pub fn len(&self) -> usize {
        self.ids.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_contains() {
        let ids = CommittedIds::new(Duration::from_secs(60));
        ids.extend([1]);
        ids.extend([2, 3]);
        assert!(ids.contains(1));
        assert!(ids.contains(3));
        assert!(!ids.contains(4));
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn test_prune_expired() {
        let ids = CommittedIds::new(Duration::from_secs(10));
        ids.extend([1, 2]);

        assert_eq!(ids.prune(), 0);
        assert_eq!(ids.prune_at(Instant::now() + Duration::from_secs(11)), 2);
        assert_eq!(ids.len(), 0);
    }
}
