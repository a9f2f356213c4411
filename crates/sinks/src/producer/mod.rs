//! Producer - multi-sink fan-out with completion tracking
//!
//! Each message is offered to every sender that accepts its tag. The
//! message is committed to the journal only after all of them reported
//! success; any failure returns it to the pool instead, leaving the journal
//! record to be replayed.
//!
//! # Design
//!
//! - The sink set of a tag is resolved once and cached. Each sender is
//!   spawned at most once per run, on the first tag that needs it
//! - A tag no sender accepts is marked unsupported and its messages are
//!   committed straight away
//! - Offers never block. A full sender channel counts as success when the
//!   sender discards on block, otherwise as failure
//! - One collector task owns the [`CompletionTracker`]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use sluice_config::ProducerConfig;
use sluice_metrics::{ChannelStats, Counter, Throughput, ThroughputSnapshot};
use sluice_protocol::{Inlet, Message, MessagePool, Outlet};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use xxhash_rust::xxh3::xxh3_64;

use crate::Sender;
use crate::delivery::{CompletionReporter, Delivery, Report};
use crate::tracker::{Completion, CompletionTracker};

/// Payload field holding the message's global id
pub const MSGID_KEY: &str = "msgid";

/// Lowercase hex of `xxh3_64("<host>-<env>")`, the prefix of every msgid
pub fn distribution_key(host: &str, env: &str) -> String {
    format!("{:x}", xxh3_64(format!("{host}-{env}").as_bytes()))
}

/// A spawned sender's inbound channel
struct SinkHandle {
    name: String,
    inlet: Arc<Inlet<Arc<Delivery>>>,
    discard_when_blocked: bool,
}

enum SinkSet {
    Unsupported,
    Sinks(Vec<Arc<SinkHandle>>),
}

#[derive(Debug, Default)]
pub struct ProducerMetrics {
    pub received: Throughput,
    /// Messages of tags no sender accepts
    pub unsupported: Counter,
    /// Offers refused by a full sender channel
    pub blocked: Counter,
    pub committed: Counter,
    pub recycled: Counter,
    /// Pending-completion records
    pub pending: AtomicUsize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProducerSnapshot {
    pub received: ThroughputSnapshot,
    pub unsupported: u64,
    pub blocked: u64,
    pub committed: u64,
    pub recycled: u64,
    pub pending: usize,
    pub reports: ChannelStats,
    pub sinks: Vec<(String, ChannelStats)>,
    pub senders: serde_json::Value,
}

pub struct Producer {
    config: ProducerConfig,
    distribution_key: String,
    senders: Vec<Arc<dyn Sender>>,
    pool: Arc<MessagePool>,
    commit: Arc<Inlet<Message>>,
    cancel: CancellationToken,
    reporter: CompletionReporter,
    reports: Outlet<Report>,
    tag_sinks: DashMap<String, Arc<SinkSet>>,
    /// Spawned senders by index; the lock also guards sink-set creation
    spawned: Mutex<HashMap<usize, Arc<SinkHandle>>>,
    metrics: ProducerMetrics,
}

impl Producer {
    /// `commit` receives messages every sender delivered
    pub fn new(
        config: &ProducerConfig,
        distribution_key: String,
        senders: Vec<Arc<dyn Sender>>,
        pool: Arc<MessagePool>,
        commit: Arc<Inlet<Message>>,
        cancel: CancellationToken,
    ) -> Self {
        let (reporter, reports) = CompletionReporter::channel(config.report_size);
        let names: Vec<&str> = senders.iter().map(|s| s.name()).collect();
        info!(
            n_workers = config.n_workers,
            distribution_key = %distribution_key,
            senders = ?names,
            "producer ready"
        );
        Self {
            config: config.clone(),
            distribution_key,
            senders,
            pool,
            commit,
            cancel,
            reporter,
            reports,
            tag_sinks: DashMap::new(),
            spawned: Mutex::new(HashMap::new()),
            metrics: ProducerMetrics::default(),
        }
    }

    pub fn metrics(&self) -> &ProducerMetrics {
        &self.metrics
    }

    /// Start the completion collector and `n_workers` producer workers
    pub fn run(self: &Arc<Self>, input: Outlet<Message>) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::with_capacity(self.config.n_workers + 1);
        let this = Arc::clone(self);
        tasks.push(tokio::spawn(async move { this.run_collector().await }));
        for _ in 0..self.config.n_workers.max(1) {
            let this = Arc::clone(self);
            let input = input.clone();
            tasks.push(tokio::spawn(async move { this.run_worker(input).await }));
        }
        tasks
    }

    async fn run_worker(&self, input: Outlet<Message>) {
        loop {
            let msg = tokio::select! {
                _ = self.cancel.cancelled() => break,
                msg = input.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };
            self.produce(msg).await;
        }
        debug!("producer worker stopped");
    }

    async fn produce(&self, mut msg: Message) {
        self.metrics.received.inc();
        let set = self.sink_set(&msg.tag);
        let sinks = match &*set {
            SinkSet::Sinks(sinks) => sinks,
            SinkSet::Unsupported => {
                self.metrics.unsupported.inc();
                debug!(tag = %msg.tag, "no sink for tag, committing");
                self.reporter.success(Arc::new(Delivery::new(msg, 1))).await;
                return;
            }
        };

        let msgid = format!("{}-{}", self.distribution_key, msg.id);
        msg.payload.insert(MSGID_KEY, msgid);
        let delivery = Arc::new(Delivery::new(msg, sinks.len()));

        // the last sink takes the original handle
        let Some((last, rest)) = sinks.split_last() else {
            return;
        };
        for sink in rest {
            self.offer(sink, Arc::clone(&delivery)).await;
        }
        self.offer(last, delivery).await;
    }

    async fn offer(&self, sink: &SinkHandle, delivery: Arc<Delivery>) {
        let Err(failure) = sink.inlet.try_send(delivery) else {
            return;
        };
        let delivery = failure.into_inner();
        self.metrics.blocked.inc();
        if sink.discard_when_blocked {
            warn!(sink = %sink.name, tag = %delivery.tag(), "sink channel full, skipping sink");
            self.reporter.success(delivery).await;
        } else {
            debug!(sink = %sink.name, tag = %delivery.tag(), "sink channel full");
            self.reporter.failure(delivery).await;
        }
    }

    fn sink_set(&self, tag: &str) -> Arc<SinkSet> {
        if let Some(set) = self.tag_sinks.get(tag) {
            return Arc::clone(set.value());
        }

        let mut spawned = self.spawned.lock();
        if let Some(set) = self.tag_sinks.get(tag) {
            return Arc::clone(set.value());
        }

        let mut sinks = Vec::new();
        for (idx, sender) in self.senders.iter().enumerate() {
            if !sender.is_tag_supported(tag) {
                continue;
            }
            if let Some(handle) = spawned.get(&idx) {
                sinks.push(Arc::clone(handle));
                continue;
            }
            match sender.spawn(self.cancel.clone(), self.reporter.clone()) {
                Ok(inlet) => {
                    info!(sink = sender.name(), tag, "spawned sender");
                    let handle = Arc::new(SinkHandle {
                        name: sender.name().to_string(),
                        inlet,
                        discard_when_blocked: sender.discard_when_blocked(),
                    });
                    spawned.insert(idx, Arc::clone(&handle));
                    sinks.push(handle);
                }
                Err(e) => {
                    error!(sink = sender.name(), tag, error = %e, "failed to spawn sender");
                }
            }
        }

        let set = if sinks.is_empty() {
            warn!(tag, "no sink accepts tag, its messages are committed undelivered");
            SinkSet::Unsupported
        } else {
            let names: Vec<&str> = sinks.iter().map(|s| s.name.as_str()).collect();
            info!(tag, sinks = ?names, "resolved sinks for tag");
            SinkSet::Sinks(sinks)
        };
        let set = Arc::new(set);
        self.tag_sinks.insert(tag.to_string(), Arc::clone(&set));
        set
    }

    async fn run_collector(&self) {
        let mut tracker = CompletionTracker::new();
        loop {
            let report = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                report = self.reports.recv() => match report {
                    Some(report) => report,
                    None => break,
                },
            };
            self.complete(&mut tracker, report, true).await;
        }

        while let Some(report) = self.reports.try_recv() {
            self.complete(&mut tracker, report, false).await;
        }
        if !tracker.is_empty() {
            info!(pending = tracker.len(), "collector stopped with incomplete deliveries");
        }
    }

    async fn complete(&self, tracker: &mut CompletionTracker, report: Report, wait: bool) {
        let done = tracker.record(report.delivery, report.succeeded);
        self.metrics.pending.store(tracker.len(), Ordering::Relaxed);
        match done {
            Some(Completion::Commit(msg)) => {
                self.metrics.committed.inc();
                let result = if wait {
                    self.commit.send(msg).await
                } else {
                    self.commit.try_send(msg).map_err(|f| f.into_inner())
                };
                if let Err(msg) = result {
                    debug!(id = msg.id, "commit channel unavailable");
                    self.pool.put(msg);
                }
            }
            Some(Completion::Recycle(msg)) => {
                self.metrics.recycled.inc();
                self.pool.put(msg);
            }
            None => {}
        }
    }

    pub fn snapshot(&self) -> ProducerSnapshot {
        let mut sinks: Vec<(String, ChannelStats)> = self
            .spawned
            .lock()
            .values()
            .map(|h| (h.name.clone(), ChannelStats::new(h.inlet.len(), h.inlet.capacity())))
            .collect();
        sinks.sort_by(|a, b| a.0.cmp(&b.0));

        let senders = self
            .senders
            .iter()
            .filter_map(|s| s.metrics().map(|m| (s.name().to_string(), m)))
            .collect::<serde_json::Map<_, _>>();

        ProducerSnapshot {
            received: self.metrics.received.snapshot(),
            unsupported: self.metrics.unsupported.get(),
            blocked: self.metrics.blocked.get(),
            committed: self.metrics.committed.get(),
            recycled: self.metrics.recycled.get(),
            pending: self.metrics.pending.load(Ordering::Relaxed),
            reports: ChannelStats::new(self.reporter.len(), self.reporter.capacity()),
            sinks,
            senders: serde_json::Value::Object(senders),
        }
    }
}

#[cfg(test)]
#[path = "producer_test.rs"]
mod producer_test;
