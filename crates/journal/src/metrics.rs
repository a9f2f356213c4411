//! Journal counters and snapshots

use std::collections::BTreeMap;

use serde::Serialize;
use sluice_metrics::{ChannelStats, Counter};

/// Counters shared by every sub-journal and the replay loop
#[derive(Debug, Default)]
pub struct JournalMetrics {
    /// Records persisted to a data segment
    pub written: Counter,
    /// Records that exhausted their write retries
    pub write_errors: Counter,
    /// Journaled records whose output push found the channel full
    pub output_full: Counter,
    /// Records forwarded without journaling because the tag queue was full
    pub diverted: Counter,
    /// Records dropped because both the tag queue and output were full
    pub dropped: Counter,
    /// Ids persisted to commit segments
    pub committed: Counter,
    /// Commits pushed back onto the shared commit queue
    pub commit_requeued: Counter,
    pub commit_dropped: Counter,
    pub replay_runs: Counter,
    pub replayed: Counter,
    /// Legacy records skipped because they were already committed
    pub replay_skipped: Counter,
    /// Legacy records without payload
    pub replay_lost: Counter,
    /// Pushes into a full replay sink
    pub replay_blocked: Counter,
    pub segments_replayed: Counter,
}

/// Point-in-time view of one sub-journal
#[derive(Debug, Clone, Serialize)]
pub struct TagSnapshot {
    pub data: ChannelStats,
    pub commit: ChannelStats,
    pub committed_ids: usize,
    pub max_id: i64,
    pub data_seq: u64,
    pub ids_seq: u64,
}

/// Point-in-time view of the whole journal
#[derive(Debug, Clone, Serialize)]
pub struct JournalSnapshot {
    pub written: u64,
    pub write_errors: u64,
    pub output_full: u64,
    pub diverted: u64,
    pub dropped: u64,
    pub committed: u64,
    pub commit_requeued: u64,
    pub commit_dropped: u64,
    pub replay_runs: u64,
    pub replayed: u64,
    pub replay_skipped: u64,
    pub replay_lost: u64,
    pub replay_blocked: u64,
    pub segments_replayed: u64,
    pub output: ChannelStats,
    pub shared_commit: ChannelStats,
    pub tags: BTreeMap<String, TagSnapshot>,
}

impl JournalMetrics {
    pub(crate) fn snapshot(
        &self,
        output: ChannelStats,
        shared_commit: ChannelStats,
        tags: BTreeMap<String, TagSnapshot>,
    ) -> JournalSnapshot {
        JournalSnapshot {
            written: self.written.get(),
            write_errors: self.write_errors.get(),
            output_full: self.output_full.get(),
            diverted: self.diverted.get(),
            dropped: self.dropped.get(),
            committed: self.committed.get(),
            commit_requeued: self.commit_requeued.get(),
            commit_dropped: self.commit_dropped.get(),
            replay_runs: self.replay_runs.get(),
            replayed: self.replayed.get(),
            replay_skipped: self.replay_skipped.get(),
            replay_lost: self.replay_lost.get(),
            replay_blocked: self.replay_blocked.get(),
            segments_replayed: self.segments_replayed.get(),
            output,
            shared_commit,
            tags,
        }
    }
}
