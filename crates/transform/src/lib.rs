//! Sluice - Transform
//!
//! Message filters and per-tag stages.
//!
//! # Overview
//!
//! Two kinds of processing sit between intake and delivery:
//!
//! - **Filters** run inside a shared worker pool (acceptor and post
//!   pipelines). Each call sees one message and forwards it, re-enters it
//!   upstream or consumes it.
//! - **Tag stages** are spawned once per tag by the dispatcher. A stage
//!   owns its workers and channels and keeps per-tag state, such as the
//!   multi-line concatenator.
//!
//! ```text
//! acceptor → [FilterChain] → journal → dispatcher ─┬→ [TagStage…] ─→ [FilterChain] → producer
//!                                                  └→ (one chain per tag)
//! ```
//!
//! # Outcomes
//!
//! Nothing here returns a runtime error. A message is either forwarded,
//! discarded with commit (its id is acknowledged, so it is not replayed) or
//! discarded without commit (returned to the pool, replayed later from the
//! journal). Only construction from configuration can fail.
//!
//! # Modules
//!
//! - `chain` - Sequential filter execution
//! - `concat` - Multi-line concatenation stage
//! - `defaults` - Tag gatekeeping and field injection at intake
//! - `rewrite` - `<app>.<env>` tag rewriting for forwarded records
//! - `normalize` - Field name and type normalisation for search sinks
//! - `registry` - Builds chains and stages from configuration

mod backoff;
mod balancer;
mod chain;
mod error;
pub mod concat;
pub mod defaults;
pub mod normalize;
pub mod registry;
pub mod rewrite;

pub use backoff::BackoffTimer;
pub use balancer::{spawn_balancer, worker_index};
pub use chain::FilterChain;
pub use concat::{ConcatMetrics, ConcatMetricsSnapshot, ConcatStage, Concatenator};
pub use defaults::DefaultFilter;
pub use error::{Result, TransformError};
pub use normalize::FieldNormalizer;
pub use registry::{acceptor_filters, post_filters, tag_stages};
pub use rewrite::TagRewriter;

use std::sync::Arc;

use sluice_protocol::{Inlet, Message, MessagePool};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// A single-message filter
///
/// Implementors are shared across the workers of a pipeline and must not
/// block.
pub trait Filter: Send + Sync {
    /// Name for logging and metrics
    fn name(&self) -> &'static str;

    /// Whether the filter applies to `tag`; unsupported tags skip it
    fn is_tag_supported(&self, _tag: &str) -> bool {
        true
    }

    /// Process one message.
    ///
    /// `Some` passes the message to the next filter. `None` means the filter
    /// consumed it: re-entered it, discarded it through the context, or
    /// handed it elsewhere.
    fn filter(&self, msg: Message, ctx: &FilterContext) -> Option<Message>;

    /// Counters for the monitor registry, if the filter keeps any
    fn metrics(&self) -> Option<serde_json::Value> {
        None
    }
}

/// Channels a filter may route consumed messages to
#[derive(Clone)]
pub struct FilterContext {
    /// Re-enter channel feeding the start of the chain
    pub upstream: Arc<Inlet<Message>>,
    pub pool: Arc<MessagePool>,
    /// Commit path for discarded messages; absent before the journal
    pub wait_commit: Option<Arc<Inlet<Message>>>,
}

impl FilterContext {
    pub fn new(upstream: Arc<Inlet<Message>>, pool: Arc<MessagePool>) -> Self {
        Self {
            upstream,
            pool,
            wait_commit: None,
        }
    }

    pub fn with_wait_commit(mut self, wait_commit: Arc<Inlet<Message>>) -> Self {
        self.wait_commit = Some(wait_commit);
        self
    }

    /// Drop a message for good.
    ///
    /// After the journal this commits its ids so it is not replayed. Before
    /// the journal there is nothing to acknowledge and it goes to the pool.
    pub fn discard(&self, msg: Message) {
        match &self.wait_commit {
            Some(commit) => discard_with_commit(commit, &self.pool, msg),
            None => self.pool.put(msg),
        }
    }

    /// Send a message back to the start of the chain.
    ///
    /// Returns `false` when the re-enter channel is full; the message then
    /// goes back to the pool.
    pub fn reenter(&self, msg: Message) -> bool {
        match self.upstream.try_send(msg) {
            Ok(()) => true,
            Err(failure) => {
                let msg = failure.into_inner();
                warn!(tag = %msg.tag, id = msg.id, channel = self.upstream.name(), "re-enter channel full, dropping");
                self.pool.put(msg);
                false
            }
        }
    }
}

/// Commit a consumed message, falling back to the pool when the commit
/// channel is full. An uncommitted message is replayed later.
pub(crate) fn discard_with_commit(commit: &Inlet<Message>, pool: &MessagePool, msg: Message) {
    if let Err(failure) = commit.try_send(msg) {
        let msg = failure.into_inner();
        warn!(tag = %msg.tag, id = msg.id, "commit channel full, message will be replayed");
        pool.put(msg);
    }
}

/// Shared resources handed to every stage spawn
#[derive(Clone)]
pub struct StageContext {
    pub pool: Arc<MessagePool>,
    /// Commit path for messages a stage absorbs
    pub wait_commit: Arc<Inlet<Message>>,
    /// Capacity of channels a stage creates
    pub internal_size: usize,
}

/// Factory for per-tag processing stages
///
/// The dispatcher asks every configured stage, last to first, whether it
/// handles a tag. Each supporting stage is spawned with the previous inlet
/// as its downstream, so the first stage in configuration order receives
/// messages first.
pub trait TagStage: Send + Sync {
    fn name(&self) -> &'static str;

    fn is_tag_supported(&self, tag: &str) -> bool;

    /// Start the stage's workers for `tag`, writing results to `downstream`.
    ///
    /// Workers stop when `cancel` fires. Returns the stage's inbound inlet.
    fn spawn(
        &self,
        cancel: CancellationToken,
        tag: &str,
        downstream: Arc<Inlet<Message>>,
        ctx: &StageContext,
    ) -> Result<Arc<Inlet<Message>>>;

    /// Counters for the monitor registry, if the stage keeps any
    fn metrics(&self) -> Option<serde_json::Value> {
        None
    }
}
