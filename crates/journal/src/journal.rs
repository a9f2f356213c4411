//! Journal front: tag routing, commit routing, replay and background loops

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use sluice_config::JournalConfig;
use sluice_metrics::ChannelStats;
use sluice_protocol::{Inlet, Message, MessagePool, Outlet, SendFailure, inlet};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{JournalError, Result};
use crate::metrics::{JournalMetrics, JournalSnapshot};
use crate::replay::{ReplayJob, ReplayTarget, Replayer};
use crate::segment::{DataReader, SegmentKind, list_segments};
use crate::sub_journal::{SubJournal, SubJournalContext, tag_dirs};

/// Durable per-tag write-ahead journal
pub struct Journal {
    config: Arc<JournalConfig>,
    root: PathBuf,
    ctx: SubJournalContext,
    subs: DashMap<String, Arc<SubJournal>>,
    create_lock: Mutex<()>,
    output_rx: Outlet<Message>,
    commit_tx: Arc<Inlet<Message>>,
    commit_rx: Outlet<Message>,
    cancel: CancellationToken,
    replaying: AtomicBool,
}

/// Clears the replay flag when a pass ends, however it ends
struct ReplayGuard<'a>(&'a AtomicBool);

impl Drop for ReplayGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Journal {
    /// Open the journal root. Existing tag directories are left untouched
    /// until the first replay pass or the first write for their tag.
    pub fn open(
        config: JournalConfig,
        pool: Arc<MessagePool>,
        cancel: CancellationToken,
    ) -> Result<Arc<Self>> {
        let root = config.dir.clone();
        fs::create_dir_all(&root).map_err(|e| JournalError::io(&root, e))?;

        let segment_size = config.effective_segment_size();
        let config = Arc::new(config);
        let (output_tx, output_rx) = inlet("journal.output", config.output_size);
        let (commit_tx, commit_rx) = inlet("journal.commit", config.shared_commit_queue_size);

        let ctx = SubJournalContext {
            config: Arc::clone(&config),
            segment_size,
            pool,
            output: output_tx,
            metrics: Arc::new(JournalMetrics::default()),
        };

        info!(
            dir = %root.display(),
            segment_size,
            compress = config.compress,
            "journal opened"
        );

        Ok(Arc::new(Self {
            config,
            root,
            ctx,
            subs: DashMap::new(),
            create_lock: Mutex::new(()),
            output_rx,
            commit_tx,
            commit_rx,
            cancel,
            replaying: AtomicBool::new(false),
        }))
    }

    /// Open sub-journal for `tag`, creating it on first use.
    ///
    /// A sub-journal whose writers stopped is only left in the map after the
    /// journal itself was cancelled; no new one is opened then.
    fn sub_journal(&self, tag: &str) -> Result<Arc<SubJournal>> {
        if let Some(sub) = self.subs.get(tag) {
            if sub.value().is_open() {
                return Ok(Arc::clone(sub.value()));
            }
        }

        let _guard = self.create_lock.lock();
        if self.cancel.is_cancelled() {
            return Err(JournalError::Cancelled);
        }
        if let Some(sub) = self.subs.get(tag) {
            if sub.value().is_open() {
                return Ok(Arc::clone(sub.value()));
            }
        }
        let sub = SubJournal::open(tag, &self.root, &self.ctx, &self.cancel)?;
        self.subs.insert(tag.to_string(), Arc::clone(&sub));
        Ok(sub)
    }

    /// Journal a message. Never blocks.
    ///
    /// A full tag queue skips the journal and forwards straight to the
    /// output; a full output drops the message.
    pub fn write(&self, msg: Message) {
        let msg = match self.try_write(msg) {
            Ok(()) => return,
            Err(failure) => {
                debug!(full = failure.is_full(), "journal busy, skipping");
                failure.into_inner()
            }
        };

        self.ctx.metrics.diverted.inc();
        if let Err(failure) = self.ctx.output.try_send(msg) {
            self.ctx.metrics.dropped.inc();
            let msg = failure.into_inner();
            warn!(tag = %msg.tag, id = msg.id, "journal output full, dropping message");
            self.ctx.pool.put(msg);
        }
    }

    /// Record that every id of `msg` was delivered. Never blocks.
    ///
    /// A full tag commit queue pushes the message back onto the shared
    /// commit queue; if that is full as well the commit is dropped.
    pub fn commit(&self, msg: Message) {
        let msg = match self.route(msg, SubJournal::try_commit) {
            Ok(()) => return,
            Err(SendFailure::Full(msg)) => msg,
            Err(SendFailure::Closed(msg)) => {
                self.ctx.metrics.commit_dropped.inc();
                debug!(tag = %msg.tag, id = msg.id, "journal closed, commit dropped");
                self.ctx.pool.put(msg);
                return;
            }
        };

        match self.commit_tx.try_send(msg) {
            Ok(()) => self.ctx.metrics.commit_requeued.inc(),
            Err(failure) => {
                self.ctx.metrics.commit_dropped.inc();
                let msg = failure.into_inner();
                warn!(tag = %msg.tag, id = msg.id, "commit queue full, dropping commit");
                self.ctx.pool.put(msg);
            }
        }
    }

    /// Queue `msg` on its tag's data writer.
    ///
    /// Once accepted the record is written even if the tag is closed right
    /// after. `Closed` means no sub-journal could take it.
    pub(crate) fn try_write(&self, msg: Message) -> std::result::Result<(), SendFailure<Message>> {
        self.route(msg, SubJournal::try_write)
    }

    /// Hand `msg` to its tag's sub-journal through `send`. A sub-journal
    /// closed between lookup and send is replaced once.
    fn route(
        &self,
        mut msg: Message,
        send: fn(&SubJournal, Message) -> std::result::Result<(), SendFailure<Message>>,
    ) -> std::result::Result<(), SendFailure<Message>> {
        for _ in 0..2 {
            let sub = match self.sub_journal(&msg.tag) {
                Ok(sub) => sub,
                Err(JournalError::Cancelled) => return Err(SendFailure::Closed(msg)),
                Err(e) => {
                    error!(tag = %msg.tag, error = %e, "cannot open sub-journal");
                    return Err(SendFailure::Closed(msg));
                }
            };
            match send(&sub, msg) {
                Err(SendFailure::Closed(back)) => msg = back,
                sent => return sent,
            }
        }
        Err(SendFailure::Closed(msg))
    }

    /// Shared commit queue; stages and the producer send delivered or
    /// discarded messages here
    pub fn commit_inlet(&self) -> Arc<Inlet<Message>> {
        Arc::clone(&self.commit_tx)
    }

    /// Journaled and replayed messages, in order of arrival
    pub fn output(&self) -> Outlet<Message> {
        self.output_rx.clone()
    }

    /// Highest id on disk or written since startup; 0 when empty
    pub fn load_max_id(&self) -> Result<i64> {
        let mut max_id = self
            .subs
            .iter()
            .map(|sub| sub.value().active().max_id())
            .max()
            .unwrap_or(0);

        for (tag, dir) in tag_dirs(&self.root)? {
            for segment in list_segments(&dir, SegmentKind::Data)? {
                let mut reader = DataReader::open(&segment)?;
                loop {
                    match reader.next_record() {
                        Ok(Some(record)) => max_id = max_id.max(record.id),
                        Ok(None) => break,
                        Err(e) => {
                            warn!(tag = %tag, error = %e, "stopping max id scan of segment");
                            break;
                        }
                    }
                }
            }
        }
        Ok(max_id.max(0))
    }

    /// Replay every sealed segment into `sink`. One pass at a time.
    ///
    /// Tags are replayed concurrently. A full sink is retried until it
    /// accepts or the journal is cancelled. Returns the highest id seen.
    pub async fn replay_legacy(&self, sink: Arc<Inlet<Message>>) -> Result<i64> {
        self.replay_into(ReplayTarget::Sink(sink)).await
    }

    /// Replay sealed segments back through the tag data writers, so each
    /// record lands in an active segment before its sealed one is deleted.
    /// The writers forward them to the output as usual.
    pub async fn rejournal_legacy(self: &Arc<Self>) -> Result<i64> {
        self.replay_into(ReplayTarget::Journal(Arc::clone(self))).await
    }

    async fn replay_into(&self, target: ReplayTarget) -> Result<i64> {
        if self
            .replaying
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(JournalError::ReplayInProgress);
        }
        let _guard = ReplayGuard(&self.replaying);
        self.ctx.metrics.replay_runs.inc();

        let replayer = Replayer {
            target,
            pool: Arc::clone(&self.ctx.pool),
            metrics: Arc::clone(&self.ctx.metrics),
            config: Arc::clone(&self.config),
            cancel: self.cancel.clone(),
        };

        let mut tasks = JoinSet::new();
        for (tag, dir) in tag_dirs(&self.root)? {
            let listed = (
                list_segments(&dir, SegmentKind::Data)?,
                list_segments(&dir, SegmentKind::Ids)?,
            );
            let live = self.subs.get(&tag).map(|sub| {
                (
                    Arc::clone(sub.value().active()),
                    Arc::clone(sub.value().committed()),
                )
            });
            let job = ReplayJob::capture(tag, dir, live, listed, self.config.committed_id_ttl);
            if job.is_empty() {
                continue;
            }
            tasks.spawn(replayer.clone().replay(job));
        }

        let mut max_id = 0i64;
        let mut failure = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(id)) => max_id = max_id.max(id),
                Ok(Err(e)) => failure = Some(e),
                Err(e) => error!(error = %e, "legacy replay task panicked"),
            }
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(max_id),
        }
    }

    /// Stop accepting writes for a tag, drain its queues and close its
    /// segments. The files stay on disk as legacy data.
    pub async fn close_tag(&self, tag: &str) -> Result<()> {
        let Some((_, sub)) = self.subs.remove(tag) else {
            return Err(JournalError::UnknownTag(tag.to_string()));
        };
        sub.shutdown().await;
        info!(tag, dir = %sub.dir().display(), "closed sub-journal");
        Ok(())
    }

    /// Close every sub-journal
    pub async fn close_all(&self) {
        let tags: Vec<String> = self.subs.iter().map(|e| e.key().clone()).collect();
        for tag in tags {
            if let Some((_, sub)) = self.subs.remove(&tag) {
                sub.shutdown().await;
            }
        }
    }

    /// Tags with an open sub-journal
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.subs.iter().map(|e| e.key().clone()).collect();
        tags.sort();
        tags
    }

    pub fn pool(&self) -> &Arc<MessagePool> {
        &self.ctx.pool
    }

    pub fn snapshot(&self) -> JournalSnapshot {
        let tags: BTreeMap<_, _> = self
            .subs
            .iter()
            .map(|e| (e.key().clone(), e.value().snapshot()))
            .collect();
        self.ctx.metrics.snapshot(
            ChannelStats::new(self.ctx.output.len(), self.ctx.output.capacity()),
            ChannelStats::new(self.commit_tx.len(), self.commit_tx.capacity()),
            tags,
        )
    }

    /// Start the background loops.
    ///
    /// - dump: journal every message from `async_in`
    /// - skip: forward `skip_in` straight to the output, blocking
    /// - legacy: periodic replay of sealed segments through the data writers
    /// - commit: route the shared commit queue to sub-journals
    /// - hygiene: prune committed ids and trim the message pool
    pub fn run(
        self: &Arc<Self>,
        async_in: Outlet<Message>,
        skip_in: Outlet<Message>,
    ) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(Arc::clone(self).dump_loop(async_in)),
            tokio::spawn(Arc::clone(self).skip_loop(skip_in)),
            tokio::spawn(Arc::clone(self).legacy_loop()),
            tokio::spawn(Arc::clone(self).commit_loop()),
            tokio::spawn(Arc::clone(self).hygiene_loop()),
        ]
    }

    async fn dump_loop(self: Arc<Self>, rx: Outlet<Message>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                msg = rx.recv() => match msg {
                    Some(msg) => self.write(msg),
                    None => break,
                },
            }
        }
        debug!("journal dump loop stopped");
    }

    async fn skip_loop(self: Arc<Self>, rx: Outlet<Message>) {
        loop {
            let msg = tokio::select! {
                _ = self.cancel.cancelled() => break,
                msg = rx.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                sent = self.ctx.output.send(msg) => {
                    if let Err(msg) = sent {
                        self.ctx.pool.put(msg);
                        break;
                    }
                }
            }
        }
        debug!("journal skip loop stopped");
    }

    async fn legacy_loop(self: Arc<Self>) {
        let mut ticker = interval(self.config.legacy_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match self.rejournal_legacy().await {
                Ok(max_id) if max_id > 0 => debug!(max_id, "legacy replay pass finished"),
                Ok(_) => {}
                Err(JournalError::ReplayInProgress) => debug!("legacy replay already running"),
                Err(JournalError::Cancelled) => break,
                Err(e) => warn!(error = %e, "legacy replay failed"),
            }
        }
        debug!("journal legacy loop stopped");
    }

    async fn commit_loop(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                msg = self.commit_rx.recv() => match msg {
                    Some(msg) => self.commit(msg),
                    None => break,
                },
            }
        }
        debug!("journal commit loop stopped");
    }

    async fn hygiene_loop(self: Arc<Self>) {
        let mut ticker = interval(self.config.hygiene_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let pruned: usize = self
                .subs
                .iter()
                .map(|sub| sub.value().committed().prune())
                .sum();
            let trimmed = self.ctx.pool.trim(self.ctx.pool.capacity() / 2);
            debug!(pruned, trimmed, "journal hygiene pass");
        }
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("root", &self.root)
            .field("tags", &self.subs.len())
            .finish()
    }
}

#[cfg(test)]
#[path = "journal_test.rs"]
mod journal_test;
