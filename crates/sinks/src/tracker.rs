//! Completion tracking
//!
//! Counts reports per in-flight delivery until every required sender has
//! answered. Records are keyed by the address of the shared `Arc<Delivery>`
//! allocation, never by message id: a replayed record can be in flight at
//! the same time as the original with the same id.
//!
//! Each pending record keeps one handle to its delivery, so the allocation
//! (and with it the key) stays alive until the record is removed.

use std::collections::HashMap;
use std::sync::Arc;

use sluice_protocol::Message;
use tracing::error;

use crate::delivery::Delivery;

/// What to do with a finished message
#[derive(Debug)]
pub enum Completion {
    /// Every sender succeeded; commit the id
    Commit(Message),
    /// At least one sender failed; return the message to the pool
    Recycle(Message),
}

struct Pending {
    /// Keeps the allocation alive while the record exists
    _delivery: Arc<Delivery>,
    responded: usize,
    all_succeeded: bool,
}

/// Pending-completion records, owned by the collector task
#[derive(Default)]
pub struct CompletionTracker {
    pending: HashMap<usize, Pending>,
}

impl CompletionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records awaiting more reports
    #[inline]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Count one report. Returns the message once the last one arrives.
    ///
    /// Returns `None` while reports are outstanding, and also when another
    /// handle to a finished delivery is still alive somewhere; that is
    /// logged and the message is left to journal replay.
    pub fn record(&mut self, delivery: Arc<Delivery>, succeeded: bool) -> Option<Completion> {
        let key = Arc::as_ptr(&delivery) as usize;
        let required = delivery.sinks_required();

        let (responded, all_succeeded) = match self.pending.get_mut(&key) {
            Some(pending) => {
                pending.responded += 1;
                pending.all_succeeded &= succeeded;
                (pending.responded, pending.all_succeeded)
            }
            None => (1, succeeded),
        };

        if responded < required {
            if responded == 1 {
                self.pending.insert(
                    key,
                    Pending {
                        _delivery: Arc::clone(&delivery),
                        responded,
                        all_succeeded,
                    },
                );
            }
            return None;
        }

        self.pending.remove(&key);
        match Arc::try_unwrap(delivery) {
            Ok(delivery) => {
                let msg = delivery.into_message();
                Some(if all_succeeded {
                    Completion::Commit(msg)
                } else {
                    Completion::Recycle(msg)
                })
            }
            Err(delivery) => {
                error!(
                    tag = %delivery.tag(),
                    id = delivery.message().id,
                    strong = Arc::strong_count(&delivery),
                    "delivery still shared after all reports"
                );
                None
            }
        }
    }
}

impl std::fmt::Debug for CompletionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionTracker")
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
#[path = "tracker_test.rs"]
mod tracker_test;
