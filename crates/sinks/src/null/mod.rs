//! Null sink - acknowledges deliveries without writing them
//!
//! Reports every delivery as succeeded, or as failed when `fail` is set.
//! A succeeding null sink commits whatever it receives, which makes it the
//! way to discard a tag; a failing one keeps records in the journal.

use std::sync::Arc;

use sluice_config::NullSinkConfig;
use sluice_protocol::{Inlet, inlet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::common::{Result, SinkMetrics};
use crate::delivery::{CompletionReporter, Delivery};
use crate::{Sender, accepts_tag};

pub struct NullSender {
    name: String,
    config: NullSinkConfig,
    metrics: Arc<SinkMetrics>,
}

impl NullSender {
    pub fn new(name: &str, config: &NullSinkConfig) -> Self {
        info!(sink = name, fail = config.fail, tags = ?config.tags, "null sender created");
        Self {
            name: name.to_string(),
            config: config.clone(),
            metrics: Arc::new(SinkMetrics::new()),
        }
    }

    pub fn sink_metrics(&self) -> &Arc<SinkMetrics> {
        &self.metrics
    }
}

impl Sender for NullSender {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_tag_supported(&self, tag: &str) -> bool {
        accepts_tag(&self.config.tags, tag)
    }

    fn discard_when_blocked(&self) -> bool {
        self.config.discard_when_blocked
    }

    fn spawn(
        &self,
        cancel: CancellationToken,
        reporter: CompletionReporter,
    ) -> Result<Arc<Inlet<Arc<Delivery>>>> {
        let (tx, rx) = inlet(format!("sink.{}", self.name), self.config.queue_size);
        let succeed = !self.config.fail;
        let metrics = Arc::clone(&self.metrics);
        let name = self.name.clone();

        tokio::spawn(async move {
            loop {
                let delivery = tokio::select! {
                    _ = cancel.cancelled() => break,
                    d = rx.recv() => match d {
                        Some(d) => d,
                        None => break,
                    },
                };
                metrics.received.inc();
                if succeed {
                    metrics.succeeded.inc();
                } else {
                    metrics.failed.inc();
                }
                reporter.report(delivery, succeed).await;
            }
            debug!(sink = %name, "null sender stopped");
        });
        Ok(tx)
    }

    fn metrics(&self) -> Option<serde_json::Value> {
        serde_json::to_value(self.metrics.snapshot()).ok()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use sluice_protocol::{Message, Payload};
    use tokio::time::timeout;

    use super::*;

    async fn round_trip(fail: bool) -> bool {
        let sender = NullSender::new(
            "blackhole",
            &NullSinkConfig {
                fail,
                ..Default::default()
            },
        );
        let (reporter, reports) = CompletionReporter::channel(4);
        let input = sender.spawn(CancellationToken::new(), reporter).unwrap();

        let delivery = Arc::new(Delivery::new(Message::new("app", Payload::new()), 1));
        input.try_send(delivery).unwrap();
        let report = timeout(Duration::from_secs(2), reports.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sender.sink_metrics().received.total(), 1);
        report.succeeded
    }

    #[tokio::test]
    async fn test_reports_success() {
        assert!(round_trip(false).await);
    }

    #[tokio::test]
    async fn test_reports_failure_when_configured() {
        assert!(!round_trip(true).await);
    }

    #[test]
    fn test_accepts_every_tag_by_default() {
        let sender = NullSender::new("blackhole", &NullSinkConfig::default());
        assert!(sender.is_tag_supported("anything"));
        assert!(sender.discard_when_blocked());
    }
}
