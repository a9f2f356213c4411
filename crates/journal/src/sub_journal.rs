//! Per-tag journal
//!
//! Each tag owns a directory and two writer tasks: one appends records to
//! data segments and forwards them to the journal output, the other appends
//! committed ids to commit segments. Each queue sits behind a [`WriteGate`]:
//! a writer closes its gate before the final drain, so every accepted send
//! is either written or was never accepted.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::SystemTime;

use bytes::BytesMut;
use parking_lot::{Mutex, RwLock};
use sluice_config::JournalConfig;
use sluice_metrics::ChannelStats;
use sluice_protocol::{Inlet, Message, MessagePool, Outlet, SendFailure, inlet};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use xxhash_rust::xxh3::xxh3_64;

use crate::chain::SegmentFormat;
use crate::committed::CommittedIds;
use crate::error::{JournalError, Result};
use crate::metrics::{JournalMetrics, TagSnapshot};
use crate::record::{encode_ids, encode_record};
use crate::segment::{SegmentKind, SegmentWriter};

/// File holding the original tag inside a tag directory
pub const TAG_FILE: &str = "TAG";

/// Directory name for a tag: a readable prefix plus a hash of the full tag
pub fn tag_dir_name(tag: &str) -> String {
    let readable: String = tag
        .chars()
        .take(64)
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect();
    format!("{}-{:016x}", readable, xxh3_64(tag.as_bytes()))
}

/// Read the tag stored in a tag directory
pub fn read_tag(dir: &Path) -> Option<String> {
    fs::read_to_string(dir.join(TAG_FILE)).ok()
}

/// Active segment positions, shared with legacy replay
#[derive(Debug)]
pub struct ActiveSegments {
    data_seq: AtomicU64,
    ids_seq: AtomicU64,
    data_opened_at: Mutex<SystemTime>,
    max_id: AtomicI64,
}

impl ActiveSegments {
    fn new(data: &SegmentWriter, ids: &SegmentWriter) -> Self {
        Self {
            data_seq: AtomicU64::new(data.seq()),
            ids_seq: AtomicU64::new(ids.seq()),
            data_opened_at: Mutex::new(data.opened_at()),
            max_id: AtomicI64::new(0),
        }
    }

    /// Data segments below this sequence are sealed
    pub fn data_seq(&self) -> u64 {
        self.data_seq.load(Ordering::Acquire)
    }

    /// Commit segments below this sequence are sealed
    pub fn ids_seq(&self) -> u64 {
        self.ids_seq.load(Ordering::Acquire)
    }

    /// Start time of the active data segment
    pub fn data_opened_at(&self) -> SystemTime {
        *self.data_opened_at.lock()
    }

    /// Highest id written since the sub-journal opened
    pub fn max_id(&self) -> i64 {
        self.max_id.load(Ordering::Relaxed)
    }

    fn track_data(&self, writer: &SegmentWriter) {
        if writer.seq() != self.data_seq.load(Ordering::Relaxed) {
            *self.data_opened_at.lock() = writer.opened_at();
            self.data_seq.store(writer.seq(), Ordering::Release);
        }
    }

    fn track_ids(&self, writer: &SegmentWriter) {
        self.ids_seq.store(writer.seq(), Ordering::Release);
    }
}

/// Admission to a writer queue.
///
/// Sends happen under the read lock after checking the gate is open; the
/// writer takes the write lock to close it. Once `close` returns, nothing
/// more can enter the queue.
#[derive(Debug)]
pub(crate) struct WriteGate {
    open: RwLock<bool>,
}

impl WriteGate {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            open: RwLock::new(true),
        })
    }

    fn send(&self, tx: &Inlet<Message>, msg: Message) -> std::result::Result<(), SendFailure<Message>> {
        let open = self.open.read();
        if !*open {
            return Err(SendFailure::Closed(msg));
        }
        tx.try_send(msg)
    }

    fn close(&self) {
        *self.open.write() = false;
    }

    pub fn is_open(&self) -> bool {
        *self.open.read()
    }
}

/// Shared handles a sub-journal needs from its journal
#[derive(Clone)]
pub(crate) struct SubJournalContext {
    pub config: Arc<JournalConfig>,
    pub segment_size: u64,
    pub pool: Arc<MessagePool>,
    pub output: Arc<Inlet<Message>>,
    pub metrics: Arc<JournalMetrics>,
}

pub(crate) struct SubJournal {
    tag: Arc<str>,
    dir: PathBuf,
    data_tx: Arc<Inlet<Message>>,
    data_gate: Arc<WriteGate>,
    commit_tx: Arc<Inlet<Message>>,
    commit_gate: Arc<WriteGate>,
    committed: Arc<CommittedIds>,
    active: Arc<ActiveSegments>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SubJournal {
    /// Create the tag directory, open fresh active segments and start the
    /// writer tasks. Must be called within a tokio runtime.
    pub fn open(
        tag: &str,
        root: &Path,
        ctx: &SubJournalContext,
        parent: &CancellationToken,
    ) -> Result<Arc<Self>> {
        let dir = root.join(tag_dir_name(tag));
        fs::create_dir_all(&dir).map_err(|e| JournalError::io(&dir, e))?;
        let tag_file = dir.join(TAG_FILE);
        if !tag_file.exists() {
            fs::write(&tag_file, tag).map_err(|e| JournalError::io(&tag_file, e))?;
        }

        let format = SegmentFormat::new(ctx.config.compress);
        let data = SegmentWriter::create(&dir, SegmentKind::Data, format, ctx.segment_size)?;
        let ids = SegmentWriter::create(&dir, SegmentKind::Ids, format, ctx.segment_size)?;
        let active = Arc::new(ActiveSegments::new(&data, &ids));

        let (data_tx, data_rx) = inlet(format!("journal.{tag}.data"), ctx.config.data_queue_size);
        let (commit_tx, commit_rx) =
            inlet(format!("journal.{tag}.commit"), ctx.config.commit_queue_size);

        let tag: Arc<str> = Arc::from(tag);
        let committed = Arc::new(CommittedIds::new(ctx.config.committed_id_ttl));
        let cancel = parent.child_token();
        let data_gate = WriteGate::new();
        let commit_gate = WriteGate::new();

        let data_task = DataWriter {
            tag: Arc::clone(&tag),
            gate: Arc::clone(&data_gate),
            writer: data,
            active: Arc::clone(&active),
            ctx: ctx.clone(),
            buf: BytesMut::with_capacity(4096),
        };
        let commit_task = CommitWriter {
            tag: Arc::clone(&tag),
            gate: Arc::clone(&commit_gate),
            writer: ids,
            active: Arc::clone(&active),
            committed: Arc::clone(&committed),
            ctx: ctx.clone(),
            buf: BytesMut::with_capacity(64),
        };
        let tasks = vec![
            tokio::spawn(data_task.run(data_rx, cancel.clone())),
            tokio::spawn(commit_task.run(commit_rx, cancel.clone())),
        ];

        info!(tag = %tag, dir = %dir.display(), "opened sub-journal");

        Ok(Arc::new(Self {
            tag,
            dir,
            data_tx,
            data_gate,
            commit_tx,
            commit_gate,
            committed,
            active,
            cancel,
            tasks: Mutex::new(tasks),
        }))
    }

    /// Queue a record for the data writer. `Closed` once teardown began.
    pub fn try_write(&self, msg: Message) -> std::result::Result<(), SendFailure<Message>> {
        self.data_gate.send(&self.data_tx, msg)
    }

    /// Queue ids for the commit writer. `Closed` once teardown began.
    pub fn try_commit(&self, msg: Message) -> std::result::Result<(), SendFailure<Message>> {
        self.commit_gate.send(&self.commit_tx, msg)
    }

    /// Whether both writers still accept work
    pub fn is_open(&self) -> bool {
        self.data_gate.is_open() && self.commit_gate.is_open()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn committed(&self) -> &Arc<CommittedIds> {
        &self.committed
    }

    pub fn active(&self) -> &Arc<ActiveSegments> {
        &self.active
    }

    /// Stop the writers after they drain their queues
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                error!(tag = %self.tag, error = %e, "sub-journal writer panicked");
            }
        }
        debug!(tag = %self.tag, "sub-journal closed");
    }

    pub fn snapshot(&self) -> TagSnapshot {
        TagSnapshot {
            data: ChannelStats::new(self.data_tx.len(), self.data_tx.capacity()),
            commit: ChannelStats::new(self.commit_tx.len(), self.commit_tx.capacity()),
            committed_ids: self.committed.len(),
            max_id: self.active.max_id(),
            data_seq: self.active.data_seq(),
            ids_seq: self.active.ids_seq(),
        }
    }
}

/// Append with bounded retries, sleeping between attempts
async fn append_with_retry(
    writer: &mut SegmentWriter,
    frame: &[u8],
    config: &JournalConfig,
    tag: &str,
) -> Result<()> {
    let mut attempt = 1;
    loop {
        match writer.append(frame) {
            Ok(_) => return Ok(()),
            Err(e) if attempt < config.max_write_retries => {
                warn!(tag, attempt, error = %e, "journal write failed, retrying");
                attempt += 1;
                sleep(config.retry_delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

fn flush(writer: &mut SegmentWriter, tag: &str) {
    if let Err(e) = writer.flush() {
        warn!(tag, error = %e, "journal flush failed");
    }
}

fn finish(writer: SegmentWriter, tag: &str) {
    let path = writer.path();
    if let Err(e) = writer.finish() {
        error!(tag, path = %path.display(), error = %e, "failed to close journal segment");
    }
}

struct DataWriter {
    tag: Arc<str>,
    gate: Arc<WriteGate>,
    writer: SegmentWriter,
    active: Arc<ActiveSegments>,
    ctx: SubJournalContext,
    buf: BytesMut,
}

impl DataWriter {
    async fn run(mut self, rx: Outlet<Message>, cancel: CancellationToken) {
        let mut ticker = interval(self.ctx.config.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => flush(&mut self.writer, &self.tag),
                msg = rx.recv() => match msg {
                    Some(msg) => self.write(msg).await,
                    None => break,
                },
            }
        }

        self.gate.close();
        let mut drained = 0usize;
        while let Some(msg) = rx.try_recv() {
            self.write(msg).await;
            drained += 1;
        }
        if drained > 0 {
            debug!(tag = %self.tag, drained, "drained data queue");
        }
        finish(self.writer, &self.tag);
    }

    async fn write(&mut self, msg: Message) {
        let result = match encode_record(&msg, &mut self.buf) {
            Ok(()) => {
                append_with_retry(&mut self.writer, &self.buf, &self.ctx.config, &self.tag).await
            }
            Err(e) => Err(e),
        };
        self.active.track_data(&self.writer);

        match result {
            Ok(()) => {
                self.ctx.metrics.written.inc();
                self.active.max_id.fetch_max(msg.id, Ordering::Relaxed);
            }
            Err(e) => {
                self.ctx.metrics.write_errors.inc();
                error!(tag = %self.tag, id = msg.id, error = %e, "failed to journal message");
            }
        }

        if let Err(failure) = self.ctx.output.try_send(msg) {
            // journaled records come back through legacy replay
            self.ctx.metrics.output_full.inc();
            let msg = failure.into_inner();
            warn!(tag = %self.tag, id = msg.id, "journal output full, record left for replay");
            self.ctx.pool.put(msg);
        }
    }
}

struct CommitWriter {
    tag: Arc<str>,
    gate: Arc<WriteGate>,
    writer: SegmentWriter,
    active: Arc<ActiveSegments>,
    committed: Arc<CommittedIds>,
    ctx: SubJournalContext,
    buf: BytesMut,
}

impl CommitWriter {
    async fn run(mut self, rx: Outlet<Message>, cancel: CancellationToken) {
        let mut ticker = interval(self.ctx.config.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => flush(&mut self.writer, &self.tag),
                msg = rx.recv() => match msg {
                    Some(msg) => self.commit(msg).await,
                    None => break,
                },
            }
        }

        self.gate.close();
        while let Some(msg) = rx.try_recv() {
            self.commit(msg).await;
        }
        finish(self.writer, &self.tag);
    }

    async fn commit(&mut self, msg: Message) {
        encode_ids(&msg, &mut self.buf);
        let n = (self.buf.len() / 8) as u64;
        let result =
            append_with_retry(&mut self.writer, &self.buf, &self.ctx.config, &self.tag).await;
        self.active.track_ids(&self.writer);

        if let Err(e) = result {
            error!(tag = %self.tag, id = msg.id, error = %e, "failed to persist commit");
        }
        self.committed.extend(msg.committed_ids());
        self.ctx.metrics.committed.add(n);
        self.ctx.pool.put(msg);
    }
}

impl std::fmt::Debug for SubJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubJournal")
            .field("tag", &self.tag)
            .field("dir", &self.dir)
            .finish()
    }
}

/// Existing tag directories under the journal root, with their tags
pub(crate) fn tag_dirs(root: &Path) -> Result<Vec<(String, PathBuf)>> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(JournalError::io(root, e)),
    };

    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| JournalError::io(root, e))?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        match read_tag(&path) {
            Some(tag) => dirs.push((tag, path)),
            None => warn!(dir = %path.display(), "journal directory without tag file, skipping"),
        }
    }
    dirs.sort();
    Ok(dirs)
}
