//! Dispatcher - per-tag fan-out
//!
//! Journaled messages are routed by tag. The first message of a tag builds
//! that tag's stage chain through the [`TagPipeline`]; later messages go
//! straight to the chain's inlet. Every chain writes into the dispatcher's
//! single output, which feeds the post filters.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use sluice_config::DispatcherConfig;
use sluice_metrics::{ChannelStats, Throughput, ThroughputSnapshot};
use sluice_protocol::{Inlet, Message, MessagePool, Outlet, inlet};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{PipelineError, Result};
use crate::metrics::DropLog;
use crate::tag_pipeline::{TagPipeline, TagPipelineSnapshot};

/// Called with the tag after its pipeline has stopped
pub type CloseHook = Arc<dyn Fn(String) + Send + Sync>;

/// Lower bound for the idle sweep period
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// One running tag pipeline
struct TagEntry {
    inlet: Arc<Inlet<Message>>,
    cancel: CancellationToken,
    received: Throughput,
    /// Milliseconds since the dispatcher started
    last_seen: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TagSnapshot {
    pub tag: String,
    pub received: ThroughputSnapshot,
    pub queue: ChannelStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatcherSnapshot {
    pub received: ThroughputSnapshot,
    pub dropped: u64,
    pub out: ChannelStats,
    pub tags: Vec<TagSnapshot>,
    pub pipelines: TagPipelineSnapshot,
}

/// Routes messages to per-tag pipelines, creating them on first sight
///
/// # Design
///
/// - Lookups go through a `DashMap`; creation is serialised by a mutex and
///   re-checked under it, so concurrent first messages build one pipeline
/// - Each pipeline runs under a child token of the dispatcher's token. A
///   watcher task removes the entry once the token fires, whether by
///   [`close_tag`](Self::close_tag), the idle sweep, or shutdown
/// - Sends never block: a full tag inlet drops the message uncommitted,
///   leaving it for journal replay
pub struct Dispatcher {
    config: DispatcherConfig,
    pipeline: Arc<TagPipeline>,
    pool: Arc<MessagePool>,
    cancel: CancellationToken,
    tags: DashMap<String, Arc<TagEntry>>,
    create: Mutex<()>,
    out_tx: Arc<Inlet<Message>>,
    out_rx: Outlet<Message>,
    close_hook: Option<CloseHook>,
    received: Throughput,
    drops: DropLog,
    started: Instant,
}

impl Dispatcher {
    pub fn new(
        config: &DispatcherConfig,
        pipeline: Arc<TagPipeline>,
        pool: Arc<MessagePool>,
        cancel: CancellationToken,
    ) -> Self {
        let (out_tx, out_rx) = inlet("dispatcher.out", config.out_size);
        info!(
            n_workers = config.n_workers,
            out_size = config.out_size,
            idle_timeout = ?config.idle_timeout,
            stages = ?pipeline.stage_names(),
            "dispatcher ready"
        );
        Self {
            config: config.clone(),
            pipeline,
            pool,
            cancel,
            tags: DashMap::new(),
            create: Mutex::new(()),
            out_tx,
            out_rx,
            close_hook: None,
            received: Throughput::new(),
            drops: DropLog::new("dispatcher"),
            started: Instant::now(),
        }
    }

    /// Run `hook` whenever a tag pipeline stops before shutdown
    pub fn with_close_hook(mut self, hook: CloseHook) -> Self {
        self.close_hook = Some(hook);
        self
    }

    /// Merged output of every tag pipeline
    pub fn output(&self) -> Outlet<Message> {
        self.out_rx.clone()
    }

    /// Tags with a running pipeline, sorted
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.tags.iter().map(|e| e.key().clone()).collect();
        tags.sort();
        tags
    }

    /// Stop the pipeline of `tag`
    pub fn close_tag(&self, tag: &str) -> Result<()> {
        let entry = self
            .tags
            .get(tag)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| PipelineError::UnknownTag(tag.to_string()))?;
        info!(tag, "closing tag pipeline");
        entry.cancel.cancel();
        Ok(())
    }

    /// Start the dispatch workers, plus the idle sweeper when enabled
    pub fn run(self: &Arc<Self>, input: Outlet<Message>) -> Vec<JoinHandle<()>> {
        let mut tasks: Vec<JoinHandle<()>> = (0..self.config.n_workers.max(1))
            .map(|_| {
                let this = Arc::clone(self);
                let input = input.clone();
                tokio::spawn(async move { this.run_worker(input).await })
            })
            .collect();
        if !self.config.idle_timeout.is_zero() {
            let this = Arc::clone(self);
            tasks.push(tokio::spawn(async move { this.run_sweeper().await }));
        }
        tasks
    }

    async fn run_worker(self: Arc<Self>, input: Outlet<Message>) {
        loop {
            let msg = tokio::select! {
                _ = self.cancel.cancelled() => break,
                msg = input.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };
            self.dispatch(msg);
        }
        debug!("dispatch worker stopped");
    }

    fn dispatch(self: &Arc<Self>, msg: Message) {
        self.received.inc();
        let entry = match self.entry(&msg.tag) {
            Ok(entry) => entry,
            Err(e) => {
                error!(tag = %msg.tag, error = %e, "failed to start tag pipeline");
                self.pool.put(msg);
                return;
            }
        };

        entry.received.inc();
        entry.last_seen.store(self.now_ms(), Ordering::Relaxed);
        if let Err(failure) = entry.inlet.try_send(msg) {
            let msg = failure.into_inner();
            self.drops.record(&msg.tag);
            self.pool.put(msg);
        }
    }

    fn live(&self, tag: &str) -> Option<Arc<TagEntry>> {
        self.tags
            .get(tag)
            .filter(|e| !e.cancel.is_cancelled())
            .map(|e| Arc::clone(e.value()))
    }

    fn entry(self: &Arc<Self>, tag: &str) -> Result<Arc<TagEntry>> {
        if let Some(entry) = self.live(tag) {
            return Ok(entry);
        }

        let _guard = self.create.lock();
        if let Some(entry) = self.live(tag) {
            return Ok(entry);
        }

        let cancel = self.cancel.child_token();
        let inlet = match self.pipeline.spawn(&cancel, tag, Arc::clone(&self.out_tx)) {
            Ok(inlet) => inlet,
            Err(e) => {
                cancel.cancel();
                return Err(e);
            }
        };
        let entry = Arc::new(TagEntry {
            inlet,
            cancel,
            received: Throughput::new(),
            last_seen: AtomicU64::new(self.now_ms()),
        });
        self.tags.insert(tag.to_string(), Arc::clone(&entry));
        self.watch(tag.to_string(), Arc::clone(&entry));
        info!(tag, "tag pipeline started");
        Ok(entry)
    }

    /// Remove the entry once its token fires
    fn watch(self: &Arc<Self>, tag: String, entry: Arc<TagEntry>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            entry.cancel.cancelled().await;
            let removed = this
                .tags
                .remove_if(&tag, |_, current| Arc::ptr_eq(current, &entry))
                .is_some();
            if !removed {
                return;
            }
            this.pipeline.forget(&tag);
            debug!(tag = %tag, "tag pipeline stopped");
            if this.cancel.is_cancelled() {
                return;
            }
            if let Some(hook) = &this.close_hook {
                hook(tag);
            }
        });
    }

    async fn run_sweeper(self: Arc<Self>) {
        let timeout = self.config.idle_timeout;
        let period = (timeout / 2).max(MIN_SWEEP_INTERVAL);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => self.close_idle(timeout),
            }
        }
    }

    fn close_idle(&self, timeout: Duration) {
        let now = self.now_ms();
        let limit = timeout.as_millis() as u64;
        for e in self.tags.iter() {
            let idle = now.saturating_sub(e.last_seen.load(Ordering::Relaxed));
            if idle > limit && !e.cancel.is_cancelled() {
                info!(tag = %e.key(), idle_ms = idle, "closing idle tag pipeline");
                e.cancel.cancel();
            }
        }
    }

    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn snapshot(&self) -> DispatcherSnapshot {
        let mut tags: Vec<TagSnapshot> = self
            .tags
            .iter()
            .map(|e| TagSnapshot {
                tag: e.key().clone(),
                received: e.received.snapshot(),
                queue: ChannelStats::new(e.inlet.len(), e.inlet.capacity()),
            })
            .collect();
        tags.sort_by(|a, b| a.tag.cmp(&b.tag));
        DispatcherSnapshot {
            received: self.received.snapshot(),
            dropped: self.drops.total(),
            out: ChannelStats::new(self.out_tx.len(), self.out_tx.capacity()),
            tags,
            pipelines: self.pipeline.snapshot(),
        }
    }
}
