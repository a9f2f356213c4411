//! Sluice - Sinks
//!
//! The producer and the senders it fans out to.
//!
//! # Architecture
//!
//! ```text
//!                            ┌─ Arc<Delivery> ─→ [Sender] ─┐
//! post filters → [Producer] ─┼─ Arc<Delivery> ─→ [Sender] ─┼─ reports ─→ collector ─┬→ journal commit
//!                            └─ Arc<Delivery> ─→ [Sender] ─┘                        └→ pool
//! ```
//!
//! # Available Senders
//!
//! | Sender | Purpose |
//! |--------|---------|
//! | `stdout` | JSON lines through the batching driver |
//! | `null` | Acknowledge or fail without writing |
//!
//! Other destinations plug in by implementing [`BatchWrite`] for the
//! batching driver, or [`Sender`] directly.

use std::sync::Arc;

use sluice_protocol::Inlet;
use tokio_util::sync::CancellationToken;

mod common;
mod delivery;
mod tracker;

/// Batching driver for sinks that write in bulk
pub mod batch;

/// Null sink - acknowledges without writing
pub mod null;

/// Multi-sink fan-out
pub mod producer;

/// Sender construction from configuration
pub mod registry;

/// Stdout sink - JSON lines
pub mod stdout;

pub use batch::{BatchSender, BatchSenderConfig, BatchWrite};
pub use common::{MetricsSnapshot, Result, SinkError, SinkMetrics};
pub use delivery::{CompletionReporter, Delivery, Report};
pub use producer::{Producer, ProducerSnapshot, distribution_key};
pub use registry::build_senders;
pub use tracker::{Completion, CompletionTracker};

/// A downstream destination
///
/// Every delivery a sender receives must be reported exactly once through
/// the [`CompletionReporter`], and the sender must not keep its handle
/// after reporting.
pub trait Sender: Send + Sync {
    fn name(&self) -> &str;

    fn is_tag_supported(&self, tag: &str) -> bool;

    /// Whether a full channel counts as delivered
    fn discard_when_blocked(&self) -> bool;

    /// Start the sender's workers; they stop when `cancel` fires
    fn spawn(
        &self,
        cancel: CancellationToken,
        reporter: CompletionReporter,
    ) -> Result<Arc<Inlet<Arc<Delivery>>>>;

    /// Counters for the monitor registry, if the sender keeps any
    fn metrics(&self) -> Option<serde_json::Value> {
        None
    }
}

/// Tag filter shared by the built-in senders: an empty list accepts every tag
pub(crate) fn accepts_tag(tags: &[String], tag: &str) -> bool {
    tags.is_empty() || tags.iter().any(|t| t == tag)
}
