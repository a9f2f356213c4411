//! Legacy replay
//!
//! Sealed data segments are read back in sequence order. Records whose id
//! is known to be committed are skipped; everything else is pushed into the
//! replay target, retrying while it is full. A segment is deleted once every
//! record in it has been pushed.
//!
//! The background pass targets the tag data writers, so a replayed record is
//! journaled again before its sealed segment goes away.

use std::sync::Arc;
use std::time::SystemTime;

use sluice_protocol::{Inlet, Message, MessagePool, SendFailure};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sluice_config::JournalConfig;

use crate::committed::CommittedIds;
use crate::error::{JournalError, Result};
use crate::journal::Journal;
use crate::metrics::JournalMetrics;
use crate::segment::{DataReader, SegmentFile, SegmentKind, list_segments, read_ids};
use crate::sub_journal::ActiveSegments;

/// Work for one tag directory, captured before replay starts
pub(crate) struct ReplayJob {
    pub tag: String,
    pub dir: std::path::PathBuf,
    pub data: Vec<SegmentFile>,
    pub ids: Vec<SegmentFile>,
    pub committed: Arc<CommittedIds>,
    /// Writer positions when the tag has an open sub-journal
    pub active: Option<Arc<ActiveSegments>>,
}

impl ReplayJob {
    /// Snapshot the sealed segments of a tag directory.
    ///
    /// Segments are listed before the sub-journal lookup, so a sub-journal
    /// opened afterwards always starts above every listed sequence.
    pub fn capture(
        tag: String,
        dir: std::path::PathBuf,
        live: Option<(Arc<ActiveSegments>, Arc<CommittedIds>)>,
        listed: (Vec<SegmentFile>, Vec<SegmentFile>),
        ttl: std::time::Duration,
    ) -> Self {
        let (mut data, mut ids) = listed;
        let (active, committed) = match live {
            Some((active, committed)) => {
                let data_seq = active.data_seq();
                let ids_seq = active.ids_seq();
                data.retain(|s| s.seq < data_seq);
                ids.retain(|s| s.seq < ids_seq);
                (Some(active), committed)
            }
            None => (None, Arc::new(CommittedIds::new(ttl))),
        };
        Self {
            tag,
            dir,
            data,
            ids,
            committed,
            active,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && self.ids.is_empty()
    }
}

/// Where replayed records go
#[derive(Clone)]
pub(crate) enum ReplayTarget {
    /// Straight into a channel; a closed channel ends the pass
    Sink(Arc<Inlet<Message>>),
    /// Back through the tag data writers
    Journal(Arc<Journal>),
}

/// Pushes legacy records for one replay pass
#[derive(Clone)]
pub(crate) struct Replayer {
    pub target: ReplayTarget,
    pub pool: Arc<MessagePool>,
    pub metrics: Arc<JournalMetrics>,
    pub config: Arc<JournalConfig>,
    pub cancel: CancellationToken,
}

impl Replayer {
    /// Replay one tag. Returns the highest id seen.
    pub async fn replay(self, job: ReplayJob) -> Result<i64> {
        for segment in &job.ids {
            match read_ids(segment) {
                Ok(ids) => job.committed.extend(ids),
                Err(e) => warn!(tag = %job.tag, error = %e, "failed to load committed ids"),
            }
        }

        let mut max_id = 0i64;
        for segment in &job.data {
            let (pushed, seen) = self.replay_segment(&job, segment).await?;
            max_id = max_id.max(seen);
            segment.remove()?;
            self.metrics.segments_replayed.inc();
            info!(
                tag = %job.tag,
                segment = %segment.path.display(),
                pushed,
                "replayed legacy segment"
            );
        }

        self.remove_commit_segments(&job)?;
        Ok(max_id)
    }

    async fn replay_segment(&self, job: &ReplayJob, segment: &SegmentFile) -> Result<(u64, i64)> {
        let mut reader = match DataReader::open(segment) {
            Ok(reader) => reader,
            Err(e) => {
                warn!(tag = %job.tag, error = %e, "cannot open legacy segment");
                return Ok((0, 0));
            }
        };

        let mut pushed = 0u64;
        let mut max_id = 0i64;
        loop {
            let record = match reader.next_record() {
                Ok(Some(record)) => record,
                Ok(None) => break,
                Err(e) => {
                    warn!(tag = %job.tag, error = %e, "stopping at unreadable record");
                    break;
                }
            };
            max_id = max_id.max(record.id);

            if job.committed.contains(record.id) {
                self.metrics.replay_skipped.inc();
                continue;
            }
            if record.payload.is_empty() {
                self.metrics.replay_lost.inc();
                warn!(tag = %job.tag, id = record.id, "legacy record has no payload");
                continue;
            }

            let mut msg = self.pool.get();
            record.fill(&mut msg);
            self.push(msg).await?;
            self.metrics.replayed.inc();
            pushed += 1;
        }
        Ok((pushed, max_id))
    }

    /// Push into the target, retrying while it is full.
    ///
    /// A journal that cannot take the record yet is retried like a full sink
    /// until cancel.
    async fn push(&self, mut msg: Message) -> Result<()> {
        loop {
            let sent = match &self.target {
                ReplayTarget::Sink(sink) => sink.try_send(msg),
                ReplayTarget::Journal(journal) => journal.try_write(msg),
            };
            msg = match sent {
                Ok(()) => return Ok(()),
                Err(SendFailure::Full(back)) => back,
                Err(SendFailure::Closed(back)) => match self.target {
                    ReplayTarget::Sink(_) => {
                        self.pool.put(back);
                        return Err(JournalError::SinkClosed);
                    }
                    ReplayTarget::Journal(_) => back,
                },
            };
            self.metrics.replay_blocked.inc();
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.pool.put(msg);
                    return Err(JournalError::Cancelled);
                }
                _ = sleep(self.config.legacy_retry_interval) => {}
            }
        }
    }

    /// Delete sealed commit segments that can no longer match a record on
    /// disk: no sealed data is left and the segment predates the active
    /// data segment.
    fn remove_commit_segments(&self, job: &ReplayJob) -> Result<()> {
        if job.ids.is_empty() {
            return Ok(());
        }

        let cutoff = match &job.active {
            Some(active) => {
                let data_seq = active.data_seq();
                let sealed_left = list_segments(&job.dir, SegmentKind::Data)?
                    .iter()
                    .any(|s| s.seq < data_seq);
                if sealed_left {
                    return Ok(());
                }
                active.data_opened_at()
            }
            None => SystemTime::now(),
        };

        let mut removed = 0usize;
        for segment in &job.ids {
            let stale = segment.modified().is_some_and(|at| at < cutoff);
            if stale {
                segment.remove()?;
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(tag = %job.tag, removed, "removed sealed commit segments");
        }
        Ok(())
    }
}
