//! Batching sender driver
//!
//! [`BatchSender`] turns any [`BatchWrite`] into a [`Sender`]: deliveries
//! are collected until `batch_size` is reached or `max_wait` has passed
//! since the first one, then written in one call.
//!
//! A failed write is retried up to [`MAX_WRITE_ATTEMPTS`] times in total.
//! Success is reported for every delivery in the batch; after the last
//! failed attempt every delivery is reported as failed, which leaves the
//! message uncommitted for journal replay.
//!
//! On cancellation the worker takes whatever is still queued, writes it,
//! and reports without waiting on a full report channel.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sluice_protocol::{Inlet, Outlet, inlet};
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::common::{Result, SinkError, SinkMetrics};
use crate::delivery::{CompletionReporter, Delivery};
use crate::{Sender, accepts_tag};

/// Write attempts per batch, including the first
pub const MAX_WRITE_ATTEMPTS: usize = 3;

/// Destination of a batching sender
pub trait BatchWrite: Send + 'static {
    /// Write one batch. An error triggers a retry of the whole batch.
    fn write(&mut self, batch: &[Arc<Delivery>]) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Debug, Clone)]
pub struct BatchSenderConfig {
    pub name: String,
    /// Accepted tags; empty means every tag
    pub tags: Vec<String>,
    pub discard_when_blocked: bool,
    pub queue_size: usize,
    pub batch_size: usize,
    pub max_wait: Duration,
    /// Pause between write attempts
    pub retry_delay: Duration,
}

impl Default for BatchSenderConfig {
    fn default() -> Self {
        Self {
            name: "batch".into(),
            tags: Vec::new(),
            discard_when_blocked: false,
            queue_size: 1000,
            batch_size: 500,
            max_wait: Duration::from_secs(1),
            retry_delay: Duration::from_millis(100),
        }
    }
}

/// A [`Sender`] that writes deliveries in batches
pub struct BatchSender<W: BatchWrite> {
    config: BatchSenderConfig,
    /// Taken by the first spawn
    writer: Mutex<Option<W>>,
    metrics: Arc<SinkMetrics>,
}

impl<W: BatchWrite> BatchSender<W> {
    pub fn new(config: BatchSenderConfig, writer: W) -> Self {
        info!(
            sink = %config.name,
            batch_size = config.batch_size,
            max_wait = ?config.max_wait,
            queue_size = config.queue_size,
            "batch sender created"
        );
        Self {
            config,
            writer: Mutex::new(Some(writer)),
            metrics: Arc::new(SinkMetrics::new()),
        }
    }

    pub fn sink_metrics(&self) -> &Arc<SinkMetrics> {
        &self.metrics
    }
}

impl<W: BatchWrite> Sender for BatchSender<W> {
    fn name(&self) -> &str {
        &self.config.name
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
        let writer = self
            .writer
            .lock()
            .take()
            .ok_or_else(|| SinkError::AlreadySpawned(self.config.name.clone()))?;
        let (tx, rx) = inlet(format!("sink.{}", self.config.name), self.config.queue_size);

        let worker = BatchWorker {
            batch: Vec::with_capacity(self.config.batch_size),
            config: self.config.clone(),
            writer,
            metrics: Arc::clone(&self.metrics),
            reporter,
        };
        tokio::spawn(worker.run(cancel, rx));
        Ok(tx)
    }

    fn metrics(&self) -> Option<serde_json::Value> {
        serde_json::to_value(self.metrics.snapshot()).ok()
    }
}

struct BatchWorker<W> {
    config: BatchSenderConfig,
    writer: W,
    metrics: Arc<SinkMetrics>,
    reporter: CompletionReporter,
    batch: Vec<Arc<Delivery>>,
}

impl<W: BatchWrite> BatchWorker<W> {
    async fn run(mut self, cancel: CancellationToken, rx: Outlet<Arc<Delivery>>) {
        let mut deadline: Option<Instant> = None;
        loop {
            let flush_at = async move {
                match deadline {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = flush_at => {
                    self.flush(true).await;
                    deadline = None;
                }
                delivery = rx.recv() => {
                    let Some(delivery) = delivery else { break };
                    if self.batch.is_empty() {
                        deadline = Some(Instant::now() + self.config.max_wait);
                    }
                    self.push(delivery);
                    if self.batch.len() >= self.config.batch_size {
                        self.flush(true).await;
                        deadline = None;
                    }
                }
            }
        }

        while let Some(delivery) = rx.try_recv() {
            self.push(delivery);
            if self.batch.len() >= self.config.batch_size {
                self.flush(false).await;
            }
        }
        self.flush(false).await;
        debug!(sink = %self.config.name, "batch sender stopped");
    }

    fn push(&mut self, delivery: Arc<Delivery>) {
        self.metrics.received.inc();
        self.batch.push(delivery);
    }

    /// Write the batch and report every delivery in it
    async fn flush(&mut self, wait: bool) {
        if self.batch.is_empty() {
            return;
        }
        let succeeded = self.write().await;
        let count = self.batch.len() as u64;
        if succeeded {
            self.metrics.batch_written(count);
        } else {
            self.metrics.failed.add(count);
        }

        for delivery in self.batch.drain(..) {
            if wait {
                self.reporter.report(delivery, succeeded).await;
            } else if self.reporter.try_report(delivery, succeeded).is_err() {
                debug!(sink = %self.config.name, "report channel full during shutdown");
            }
        }
    }

    async fn write(&mut self) -> bool {
        let mut last_error = String::new();
        for attempt in 0..MAX_WRITE_ATTEMPTS {
            if attempt > 0 {
                sleep(self.config.retry_delay).await;
            }
            match self.writer.write(&self.batch).await {
                Ok(()) => return true,
                Err(e) => {
                    self.metrics.write_errors.inc();
                    debug!(
                        sink = %self.config.name,
                        attempt = attempt + 1,
                        max_attempts = MAX_WRITE_ATTEMPTS,
                        error = %e,
                        "write attempt failed"
                    );
                    last_error = e.to_string();
                }
            }
        }

        let err = SinkError::RetriesExhausted {
            attempts: MAX_WRITE_ATTEMPTS,
            last_error,
        };
        error!(
            sink = %self.config.name,
            count = self.batch.len(),
            error = %err,
            "batch not delivered"
        );
        false
    }
}
