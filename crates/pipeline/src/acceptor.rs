//! Acceptor - intake for receivers
//!
//! Receivers hand decoded messages to an [`Intake`], which stamps each one
//! with the next id and queues it on one of two channels:
//!
//! - **sync**: for receivers with their own flow control (a TCP reader can
//!   stop reading). `send_sync` waits for space.
//! - **async**: for receivers that must never stall (UDP, HTTP handlers).
//!   `send_async` drops to the pool when the channel is full.
//!
//! Ids increase by one per message and wrap to zero at `max_rotate_id`. At
//! startup the generator is seeded above the highest id in the journal so a
//! restart never reuses an id that may still be pending.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use serde::Serialize;
use sluice_config::AcceptorConfig;
use sluice_metrics::{ChannelStats, Throughput, ThroughputSnapshot};
use sluice_protocol::{Inlet, Message, MessagePool, Outlet, inlet};
use tracing::info;

use crate::error::{PipelineError, Result};
use crate::metrics::DropLog;

/// Wrapping id sequence
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicI64,
    max_rotate_id: i64,
}

impl IdGenerator {
    /// Start right after `max_id`, modulo `max_rotate_id`
    pub fn new(max_id: i64, max_rotate_id: i64) -> Self {
        let max_rotate_id = max_rotate_id.max(1);
        Self {
            next: AtomicI64::new(max_id.saturating_add(1).rem_euclid(max_rotate_id)),
            max_rotate_id,
        }
    }

    /// Take the next id
    pub fn next_id(&self) -> i64 {
        let max = self.max_rotate_id;
        let advance = |cur: i64| Some((cur + 1) % max);
        match self.next.fetch_update(Ordering::Relaxed, Ordering::Relaxed, advance) {
            Ok(id) | Err(id) => id,
        }
    }

    /// Id the next call will return
    pub fn peek(&self) -> i64 {
        self.next.load(Ordering::Relaxed)
    }
}

/// Receiving ends of the intake channels
pub struct IntakeStreams {
    pub sync_rx: Outlet<Message>,
    pub async_rx: Outlet<Message>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntakeSnapshot {
    pub received: ThroughputSnapshot,
    pub dropped: u64,
    pub next_id: i64,
    pub sync_out: ChannelStats,
    pub async_out: ChannelStats,
}

/// Shared entry point for every receiver
pub struct Intake {
    sync_tx: Arc<Inlet<Message>>,
    async_tx: Arc<Inlet<Message>>,
    ids: IdGenerator,
    pool: Arc<MessagePool>,
    received: Throughput,
    drops: DropLog,
}

impl Intake {
    /// `max_id` is the highest id recorded in the journal
    pub fn new(
        config: &AcceptorConfig,
        pool: Arc<MessagePool>,
        max_id: i64,
    ) -> (Arc<Self>, IntakeStreams) {
        let (sync_tx, sync_rx) = inlet("acceptor.sync", config.sync_out_size);
        let (async_tx, async_rx) = inlet("acceptor.async", config.async_out_size);
        let ids = IdGenerator::new(max_id, config.max_rotate_id);
        info!(
            first_id = ids.peek(),
            max_rotate_id = config.max_rotate_id,
            sync_out_size = config.sync_out_size,
            async_out_size = config.async_out_size,
            "acceptor ready"
        );

        let intake = Arc::new(Self {
            sync_tx,
            async_tx,
            ids,
            pool,
            received: Throughput::new(),
            drops: DropLog::new("acceptor"),
        });
        (intake, IntakeStreams { sync_rx, async_rx })
    }

    /// Pool receivers allocate messages from
    pub fn pool(&self) -> &Arc<MessagePool> {
        &self.pool
    }

    fn stamp(&self, msg: &mut Message) {
        msg.id = self.ids.next_id();
        msg.extra_ids.clear();
        self.received.inc();
    }

    /// Queue a message, waiting while the sync channel is full
    pub async fn send_sync(&self, mut msg: Message) -> Result<()> {
        self.stamp(&mut msg);
        match self.sync_tx.send(msg).await {
            Ok(()) => Ok(()),
            Err(msg) => {
                self.pool.put(msg);
                Err(PipelineError::Closed(self.sync_tx.name().to_string()))
            }
        }
    }

    /// Queue a message without waiting.
    ///
    /// Returns `false` if it was dropped because the async channel is full.
    pub fn send_async(&self, mut msg: Message) -> bool {
        self.stamp(&mut msg);
        match self.async_tx.try_send(msg) {
            Ok(()) => true,
            Err(failure) => {
                let msg = failure.into_inner();
                self.drops.record(&msg.tag);
                self.pool.put(msg);
                false
            }
        }
    }

    pub fn snapshot(&self) -> IntakeSnapshot {
        IntakeSnapshot {
            received: self.received.snapshot(),
            dropped: self.drops.total(),
            next_id: self.ids.peek(),
            sync_out: ChannelStats::new(self.sync_tx.len(), self.sync_tx.capacity()),
            async_out: ChannelStats::new(self.async_tx.len(), self.async_tx.capacity()),
        }
    }
}
