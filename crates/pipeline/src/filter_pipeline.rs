//! Filter pipelines
//!
//! Worker pools that run a [`FilterChain`] over a stream. Each pool owns a
//! re-enter channel that filters can push messages back into; workers read
//! it alongside their normal input.
//!
//! - [`AcceptorPipeline`] sits between intake and the journal. The async
//!   path never blocks: a full output falls back to the skip channel (which
//!   bypasses the journal), then drops. The sync path waits.
//! - [`PostPipeline`] sits between the tag pipelines and the producer and
//!   waits on a full output.

use std::sync::Arc;

use serde::Serialize;
use sluice_config::{AcceptorFiltersConfig, PostFiltersConfig};
use sluice_metrics::{ChannelStats, Counter, Throughput, ThroughputSnapshot};
use sluice_protocol::{Inlet, Message, MessagePool, Outlet, inlet};
use sluice_transform::{FilterChain, FilterContext};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::metrics::DropLog;

/// Counters shared by one pool's workers
#[derive(Debug)]
pub struct FilterPipelineMetrics {
    pub received: Throughput,
    /// Messages a filter consumed
    pub consumed: Counter,
    /// Async messages diverted to the skip channel
    pub skipped: Counter,
    dropped: DropLog,
}

impl FilterPipelineMetrics {
    fn new(what: &'static str) -> Self {
        Self {
            received: Throughput::new(),
            consumed: Counter::new(),
            skipped: Counter::new(),
            dropped: DropLog::new(what),
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.total()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FilterPipelineSnapshot {
    pub received: ThroughputSnapshot,
    pub consumed: u64,
    pub skipped: u64,
    pub dropped: u64,
    pub out: ChannelStats,
    pub reenter: ChannelStats,
    pub filters: serde_json::Value,
}

/// What both pipelines share: chain, channels, metrics
struct Stage {
    chain: FilterChain,
    ctx: FilterContext,
    reenter_rx: Outlet<Message>,
    out_tx: Arc<Inlet<Message>>,
    out_rx: Outlet<Message>,
    metrics: FilterPipelineMetrics,
}

impl Stage {
    fn new(
        name: &'static str,
        chain: FilterChain,
        pool: Arc<MessagePool>,
        out_size: usize,
        reenter_size: usize,
    ) -> Self {
        let (reenter_tx, reenter_rx) = inlet(format!("{name}.reenter"), reenter_size);
        let (out_tx, out_rx) = inlet(format!("{name}.out"), out_size);
        Self {
            chain,
            ctx: FilterContext::new(reenter_tx, pool),
            reenter_rx,
            out_tx,
            out_rx,
            metrics: FilterPipelineMetrics::new(name),
        }
    }

    /// Next message from the re-enter channel or `input`; `None` on shutdown
    async fn next(&self, cancel: &CancellationToken, input: &Outlet<Message>) -> Option<Message> {
        tokio::select! {
            _ = cancel.cancelled() => None,
            Some(msg) = self.reenter_rx.recv() => Some(msg),
            msg = input.recv() => msg,
        }
    }

    fn apply(&self, msg: Message) -> Option<Message> {
        self.metrics.received.inc();
        let out = self.chain.apply(msg, &self.ctx);
        if out.is_none() {
            self.metrics.consumed.inc();
        }
        out
    }

    /// Blocking send to the output; `false` once the pipeline should stop
    async fn send(&self, cancel: &CancellationToken, msg: Message) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            res = self.out_tx.send(msg) => match res {
                Ok(()) => true,
                Err(msg) => {
                    self.ctx.pool.put(msg);
                    false
                }
            },
        }
    }

    fn snapshot(&self) -> FilterPipelineSnapshot {
        let reenter = &self.ctx.upstream;
        FilterPipelineSnapshot {
            received: self.metrics.received.snapshot(),
            consumed: self.metrics.consumed.get(),
            skipped: self.metrics.skipped.get(),
            dropped: self.metrics.dropped(),
            out: ChannelStats::new(self.out_tx.len(), self.out_tx.capacity()),
            reenter: ChannelStats::new(reenter.len(), reenter.capacity()),
            filters: self.chain.metrics(),
        }
    }
}

/// Filters between intake and the journal
pub struct AcceptorPipeline {
    stage: Stage,
    skip_tx: Arc<Inlet<Message>>,
    skip_rx: Outlet<Message>,
    n_workers: usize,
}

impl AcceptorPipeline {
    pub fn new(config: &AcceptorFiltersConfig, chain: FilterChain, pool: Arc<MessagePool>) -> Self {
        let (skip_tx, skip_rx) = inlet("acceptor_filters.skip", config.out_size);
        info!(
            n_workers = config.n_workers,
            out_size = config.out_size,
            reenter_size = config.reenter_size,
            filters = ?chain.names(),
            "acceptor pipeline ready"
        );
        Self {
            stage: Stage::new(
                "acceptor_filters",
                chain,
                pool,
                config.out_size,
                config.reenter_size,
            ),
            skip_tx,
            skip_rx,
            n_workers: config.n_workers.max(1),
        }
    }

    /// Filtered messages bound for the journal
    pub fn output(&self) -> Outlet<Message> {
        self.stage.out_rx.clone()
    }

    /// Overflow from the async path, bypassing the journal
    pub fn skip(&self) -> Outlet<Message> {
        self.skip_rx.clone()
    }

    pub fn metrics(&self) -> &FilterPipelineMetrics {
        &self.stage.metrics
    }

    pub fn snapshot(&self) -> FilterPipelineSnapshot {
        self.stage.snapshot()
    }

    /// Start `n_workers` async and `n_workers` sync workers
    pub fn run(
        self: &Arc<Self>,
        cancel: CancellationToken,
        async_in: Outlet<Message>,
        sync_in: Outlet<Message>,
    ) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::with_capacity(self.n_workers * 2);
        for _ in 0..self.n_workers {
            let this = Arc::clone(self);
            let (cancel_a, input) = (cancel.clone(), async_in.clone());
            tasks.push(tokio::spawn(async move { this.run_async(cancel_a, input).await }));

            let this = Arc::clone(self);
            let (cancel_s, input) = (cancel.clone(), sync_in.clone());
            tasks.push(tokio::spawn(async move { this.run_sync(cancel_s, input).await }));
        }
        tasks
    }

    async fn run_async(&self, cancel: CancellationToken, input: Outlet<Message>) {
        while let Some(msg) = self.stage.next(&cancel, &input).await {
            let Some(msg) = self.stage.apply(msg) else {
                continue;
            };
            let Err(failure) = self.stage.out_tx.try_send(msg) else {
                continue;
            };
            if let Err(failure) = self.skip_tx.try_send(failure.into_inner()) {
                let msg = failure.into_inner();
                self.stage.metrics.dropped.record(&msg.tag);
                self.stage.ctx.pool.put(msg);
            } else {
                self.stage.metrics.skipped.inc();
            }
        }
        debug!("acceptor pipeline async worker stopped");
    }

    async fn run_sync(&self, cancel: CancellationToken, input: Outlet<Message>) {
        loop {
            let msg = tokio::select! {
                _ = cancel.cancelled() => break,
                msg = input.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };
            let Some(msg) = self.stage.apply(msg) else {
                continue;
            };
            if !self.stage.send(&cancel, msg).await {
                break;
            }
        }
        debug!("acceptor pipeline sync worker stopped");
    }
}

/// Filters between the tag pipelines and the producer
pub struct PostPipeline {
    stage: Stage,
    n_workers: usize,
}

impl PostPipeline {
    /// `wait_commit` receives messages a filter discards
    pub fn new(
        config: &PostFiltersConfig,
        chain: FilterChain,
        pool: Arc<MessagePool>,
        wait_commit: Arc<Inlet<Message>>,
    ) -> Self {
        info!(
            n_workers = config.n_workers,
            out_size = config.out_size,
            filters = ?chain.names(),
            "post pipeline ready"
        );
        let mut stage = Stage::new("post_filters", chain, pool, config.out_size, config.reenter_size);
        stage.ctx = stage.ctx.with_wait_commit(wait_commit);
        Self {
            stage,
            n_workers: config.n_workers.max(1),
        }
    }

    /// Messages bound for the producer
    pub fn output(&self) -> Outlet<Message> {
        self.stage.out_rx.clone()
    }

    pub fn metrics(&self) -> &FilterPipelineMetrics {
        &self.stage.metrics
    }

    pub fn snapshot(&self) -> FilterPipelineSnapshot {
        self.stage.snapshot()
    }

    pub fn run(self: &Arc<Self>, cancel: CancellationToken, input: Outlet<Message>) -> Vec<JoinHandle<()>> {
        (0..self.n_workers)
            .map(|_| {
                let this = Arc::clone(self);
                let (cancel, input) = (cancel.clone(), input.clone());
                tokio::spawn(async move { this.run_worker(cancel, input).await })
            })
            .collect()
    }

    async fn run_worker(&self, cancel: CancellationToken, input: Outlet<Message>) {
        while let Some(msg) = self.stage.next(&cancel, &input).await {
            let Some(msg) = self.stage.apply(msg) else {
                continue;
            };
            if !self.stage.send(&cancel, msg).await {
                break;
            }
        }
        debug!("post pipeline worker stopped");
    }
}
