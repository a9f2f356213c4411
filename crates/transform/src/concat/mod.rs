//! Concat stage - join multi-line records
//!
//! Stack traces and other multi-line output arrive as one message per line.
//! This stage holds the first line of a record (the head) per stream and
//! appends continuation lines to it until the next head, a length cap or a
//! quiet period ends the record.
//!
//! # Semantics
//!
//! - The merged record keeps the head's id and collects every absorbed id in
//!   `extra_ids`, so committing it acknowledges all physical lines.
//! - An absorbed continuation is committed at once; it never travels on.
//! - Flushes never block. A full downstream drops the record uncommitted
//!   and it comes back through journal replay.
//!
//! # Example
//!
//! ```toml
//! [tag_stages.concat]
//! n_workers = 2
//! lb_key = "container_id"
//!
//! [tag_stages.concat.tags."app.prod"]
//! head_pattern = "^\\d{4}-\\d{2}-\\d{2}"
//! ```

mod state;

pub use state::{ConcatRule, Concatenator, FlushReason, Step};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use regex::bytes::Regex;
use serde::Serialize;
use sluice_config::ConcatConfig;
use sluice_metrics::Counter;
use sluice_protocol::{Inlet, Message, MessagePool, Outlet, inlet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::BackoffTimer;
use crate::balancer::spawn_balancer;
use crate::{Result, StageContext, TagStage, TransformError, discard_with_commit};

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;

/// Idle time after which a pending record is flushed
pub const CONCAT_TIMEOUT: Duration = Duration::from_secs(5);

const BACKOFF_INITIAL: Duration = Duration::from_millis(1);
const BACKOFF_MAX: Duration = Duration::from_millis(40);

/// `max_len` below this is accepted with a warning
const SHORT_MAX_LEN: usize = 10_000;

/// Counters shared by every concat worker
#[derive(Debug, Default)]
pub struct ConcatMetrics {
    /// Lines received
    pub received: Counter,
    /// Lines emitted untouched
    pub passed: Counter,
    /// Continuations merged into a pending record
    pub absorbed: Counter,
    pub flushed_next_head: Counter,
    pub flushed_max_len: Counter,
    pub flushed_timeout: Counter,
    pub flushed_shutdown: Counter,
    /// Records lost to a full downstream (replayed later)
    pub dropped: Counter,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConcatMetricsSnapshot {
    pub received: u64,
    pub passed: u64,
    pub absorbed: u64,
    pub flushed_next_head: u64,
    pub flushed_max_len: u64,
    pub flushed_timeout: u64,
    pub flushed_shutdown: u64,
    pub dropped: u64,
}

impl ConcatMetrics {
    pub fn snapshot(&self) -> ConcatMetricsSnapshot {
        ConcatMetricsSnapshot {
            received: self.received.get(),
            passed: self.passed.get(),
            absorbed: self.absorbed.get(),
            flushed_next_head: self.flushed_next_head.get(),
            flushed_max_len: self.flushed_max_len.get(),
            flushed_timeout: self.flushed_timeout.get(),
            flushed_shutdown: self.flushed_shutdown.get(),
            dropped: self.dropped.get(),
        }
    }

    fn count_flush(&self, reason: FlushReason) {
        match reason {
            FlushReason::NextHead => self.flushed_next_head.inc(),
            FlushReason::MaxLen => self.flushed_max_len.inc(),
            FlushReason::Timeout => self.flushed_timeout.inc(),
            FlushReason::Shutdown => self.flushed_shutdown.inc(),
        }
    }
}

/// Multi-line concatenation stage factory
pub struct ConcatStage {
    rules: HashMap<String, ConcatRule>,
    n_workers: usize,
    max_len: usize,
    lb_key: String,
    timeout: Duration,
    metrics: Arc<ConcatMetrics>,
}

impl ConcatStage {
    /// Compile every tag's head pattern
    pub fn new(config: &ConcatConfig) -> Result<Self> {
        if config.max_len == 0 {
            return Err(TransformError::config("concat max_len must be greater than 0"));
        }
        if config.max_len < SHORT_MAX_LEN {
            warn!(max_len = config.max_len, "concat max_len may be too short");
        }
        if config.n_workers == 0 {
            return Err(TransformError::config("concat n_workers must be at least 1"));
        }

        let mut rules = HashMap::with_capacity(config.tags.len());
        for (tag, rule) in &config.tags {
            let head = Regex::new(&rule.head_pattern).map_err(|source| {
                TransformError::InvalidPattern {
                    tag: tag.clone(),
                    source,
                }
            })?;
            rules.insert(
                tag.clone(),
                ConcatRule {
                    msg_key: rule.msg_key.clone(),
                    identifier: rule.identifier.clone(),
                    head,
                },
            );
        }

        info!(
            tags = rules.len(),
            n_workers = config.n_workers,
            max_len = config.max_len,
            "concat stage configured"
        );
        Ok(Self {
            rules,
            n_workers: config.n_workers,
            max_len: config.max_len,
            lb_key: config.lb_key.clone(),
            timeout: CONCAT_TIMEOUT,
            metrics: Arc::new(ConcatMetrics::default()),
        })
    }

    /// Override the idle flush timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn metrics(&self) -> Arc<ConcatMetrics> {
        Arc::clone(&self.metrics)
    }
}

impl TagStage for ConcatStage {
    fn name(&self) -> &'static str {
        "concat"
    }

    fn is_tag_supported(&self, tag: &str) -> bool {
        self.rules.contains_key(tag)
    }

    fn spawn(
        &self,
        cancel: CancellationToken,
        tag: &str,
        downstream: Arc<Inlet<Message>>,
        ctx: &StageContext,
    ) -> Result<Arc<Inlet<Message>>> {
        let rule = self
            .rules
            .get(tag)
            .ok_or_else(|| TransformError::unsupported(self.name(), tag))?;
        info!(tag, n_workers = self.n_workers, "spawning concat stage");

        let mut inlets = Vec::with_capacity(self.n_workers);
        for i in 0..self.n_workers {
            let (tx, rx) = inlet(format!("concat.{tag}.{i}"), ctx.internal_size);
            let worker = ConcatWorker {
                state: Concatenator::new(rule.clone(), self.max_len, self.timeout),
                input: rx,
                downstream: Arc::clone(&downstream),
                wait_commit: Arc::clone(&ctx.wait_commit),
                pool: Arc::clone(&ctx.pool),
                metrics: Arc::clone(&self.metrics),
                timer: BackoffTimer::new(BACKOFF_INITIAL, BACKOFF_MAX),
            };
            tokio::spawn(worker.run(cancel.clone()));
            inlets.push(tx);
        }

        if let [single] = inlets.as_slice() {
            return Ok(Arc::clone(single));
        }
        Ok(spawn_balancer(
            &format!("concat.{tag}"),
            cancel,
            self.lb_key.clone(),
            inlets,
            Arc::clone(&ctx.pool),
            ctx.internal_size,
        ))
    }

    fn metrics(&self) -> Option<serde_json::Value> {
        serde_json::to_value(self.metrics.snapshot()).ok()
    }
}

/// One worker: owns the state for the streams routed to it
struct ConcatWorker {
    state: Concatenator,
    input: Outlet<Message>,
    downstream: Arc<Inlet<Message>>,
    wait_commit: Arc<Inlet<Message>>,
    pool: Arc<MessagePool>,
    metrics: Arc<ConcatMetrics>,
    timer: BackoffTimer,
}

impl ConcatWorker {
    async fn run(mut self, cancel: CancellationToken) {
        loop {
            // Nothing pending: block on input. Otherwise poll so idle records
            // can be swept between lines.
            let msg = if self.state.is_empty() {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    msg = self.input.recv() => match msg {
                        Some(msg) => msg,
                        None => break,
                    },
                }
            } else if let Some(msg) = self.input.try_recv() {
                msg
            } else {
                for msg in self.state.sweep(Instant::now()) {
                    self.emit(msg, Some(FlushReason::Timeout));
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = self.timer.sleep() => continue,
                }
            };

            self.timer.reset();
            self.accept(msg);
        }

        // lines already queued still join their records
        let mut queued = 0usize;
        while let Some(msg) = self.input.try_recv() {
            self.accept(msg);
            queued += 1;
        }
        let pending = self.state.drain();
        debug!(queued, pending = pending.len(), "concat worker stopping");
        for msg in pending {
            self.emit(msg, Some(FlushReason::Shutdown));
        }
    }

    fn accept(&mut self, msg: Message) {
        self.metrics.received.inc();
        let step = self.state.push(msg, Instant::now());
        if let Some(absorbed) = step.absorbed {
            self.metrics.absorbed.inc();
            discard_with_commit(&self.wait_commit, &self.pool, absorbed);
        }
        if let Some((msg, reason)) = step.emit {
            self.emit(msg, reason);
        }
    }

    fn emit(&self, msg: Message, reason: Option<FlushReason>) {
        match reason {
            Some(reason) => self.metrics.count_flush(reason),
            None => self.metrics.passed.inc(),
        }
        if let Err(failure) = self.downstream.try_send(msg) {
            let msg = failure.into_inner();
            self.metrics.dropped.inc();
            warn!(
                tag = %msg.tag,
                id = msg.id,
                channel = self.downstream.name(),
                "concat downstream full, record will be replayed"
            );
            self.pool.put(msg);
        }
    }
}
