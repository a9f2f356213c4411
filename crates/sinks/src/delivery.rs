//! Delivery envelope and completion reports
//!
//! The producer wraps each message in one [`Delivery`] and hands every
//! accepting sender its own `Arc` handle. A sender reports each handle back
//! exactly once, as a success or a failure, through the
//! [`CompletionReporter`]. Senders never recycle or commit messages
//! themselves.

use std::sync::Arc;

use sluice_protocol::{Inlet, Message, Outlet, inlet};

/// A message in flight to `sinks_required` senders
#[derive(Debug)]
pub struct Delivery {
    message: Message,
    sinks_required: usize,
}

impl Delivery {
    pub fn new(message: Message, sinks_required: usize) -> Self {
        Self {
            message,
            sinks_required: sinks_required.max(1),
        }
    }

    #[inline]
    pub fn message(&self) -> &Message {
        &self.message
    }

    #[inline]
    pub fn tag(&self) -> &str {
        &self.message.tag
    }

    /// Reports needed before the message is complete
    #[inline]
    pub fn sinks_required(&self) -> usize {
        self.sinks_required
    }

    pub fn into_message(self) -> Message {
        self.message
    }
}

/// Outcome of one sender's attempt
#[derive(Debug)]
pub struct Report {
    pub delivery: Arc<Delivery>,
    pub succeeded: bool,
}

/// Where senders report outcomes
#[derive(Clone)]
pub struct CompletionReporter {
    tx: Arc<Inlet<Report>>,
}

impl CompletionReporter {
    /// Report channel holding up to `capacity` outcomes
    pub fn channel(capacity: usize) -> (Self, Outlet<Report>) {
        let (tx, rx) = inlet("producer.reports", capacity);
        (Self { tx }, rx)
    }

    pub async fn success(&self, delivery: Arc<Delivery>) {
        self.report(delivery, true).await;
    }

    pub async fn failure(&self, delivery: Arc<Delivery>) {
        self.report(delivery, false).await;
    }

    /// Waits for room. A closed channel means shutdown; the report is lost
    /// and the message stays uncommitted in the journal.
    pub async fn report(&self, delivery: Arc<Delivery>, succeeded: bool) {
        let _ = self.tx.send(Report { delivery, succeeded }).await;
    }

    /// Report without waiting; hands the report back when the channel is full
    pub fn try_report(&self, delivery: Arc<Delivery>, succeeded: bool) -> Result<(), Report> {
        self.tx
            .try_send(Report { delivery, succeeded })
            .map_err(|f| f.into_inner())
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn capacity(&self) -> usize {
        self.tx.capacity()
    }
}

#[cfg(test)]
mod tests {
    use sluice_protocol::Payload;

    use super::*;

    #[test]
    fn test_sinks_required_is_at_least_one() {
        let delivery = Delivery::new(Message::new("app", Payload::new()), 0);
        assert_eq!(delivery.sinks_required(), 1);
        assert_eq!(delivery.tag(), "app");
    }

    #[tokio::test]
    async fn test_reports_arrive_in_order() {
        let (reporter, rx) = CompletionReporter::channel(4);
        let delivery = Arc::new(Delivery::new(Message::new("app", Payload::new()), 2));

        reporter.success(Arc::clone(&delivery)).await;
        reporter.failure(delivery).await;

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(first.succeeded);
        assert!(!second.succeeded);
        assert!(Arc::ptr_eq(&first.delivery, &second.delivery));
    }

    #[test]
    fn test_try_report_full() {
        let (reporter, _rx) = CompletionReporter::channel(1);
        let delivery = Arc::new(Delivery::new(Message::new("app", Payload::new()), 2));

        assert!(reporter.try_report(Arc::clone(&delivery), true).is_ok());
        let back = reporter.try_report(delivery, false).unwrap_err();
        assert!(!back.succeeded);
        assert_eq!(reporter.len(), 1);
    }
}
