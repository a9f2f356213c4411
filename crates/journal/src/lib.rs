//! Sluice Journal - Durable per-tag write-ahead journal
//!
//! Every accepted message is appended to its tag's data segment before it
//! moves on. Delivered messages are committed by id. Whatever was journaled
//! but never committed is replayed from sealed segments, so a message is
//! delivered at least once across crashes and downstream outages.
//!
//! # Layout
//!
//! ```text
//! <dir>/
//!   app.prod-1f2e3d4c5b6a7988/
//!     TAG
//!     data.0000000000.log
//!     ids.0000000000.log
//! ```
//!
//! # Flow
//!
//! ```text
//! async intake ──► dump loop ──► tag data queue ──► data writer ──► output
//!                      │ (queue full)                                 ▲
//!                      └──────────────────────────────────────────────┤
//! skip intake ────────────────────────────────────────────────────────┘
//! sealed segments ──► legacy replay ──► tag data queue
//!
//! producer ──► shared commit queue ──► tag commit queue ──► commit writer
//! ```

mod chain;
mod committed;
mod error;
mod journal;
mod metrics;
mod record;
mod replay;
mod segment;
mod sub_journal;

pub use error::{JournalError, Result};
pub use journal::Journal;
pub use metrics::{JournalSnapshot, TagSnapshot};
pub use record::StoredRecord;
pub use segment::{SegmentFile, SegmentKind};
pub use sub_journal::tag_dir_name;
