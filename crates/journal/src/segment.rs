//! Segment files: naming, listing, rotation and reading
//!
//! Each tag directory holds two series of segments:
//!
//! ```text
//! <tag-dir>/
//!   TAG                      original tag name
//!   data.0000000003.log      [u32 len][json record]...
//!   data.0000000004.log.lz4  (active)
//!   ids.0000000001.log       [i64 id]...
//!   ids.0000000002.log       (active)
//! ```
//!
//! The highest sequence of a series is the active segment while a writer is
//! open. Every lower sequence is sealed and is legacy data.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use lz4_flex::frame::FrameDecoder;

use crate::chain::{ChainWrite, SegmentFormat};
use crate::error::{JournalError, Result};
use crate::record::{LEN_PREFIX, MAX_RECORD_BYTES, StoredRecord};

/// Segment series within a tag directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// Journaled records
    Data,
    /// Committed ids
    Ids,
}

impl SegmentKind {
    fn prefix(self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::Ids => "ids",
        }
    }
}

/// A segment found on disk
#[derive(Debug, Clone)]
pub struct SegmentFile {
    pub kind: SegmentKind,
    pub seq: u64,
    pub path: PathBuf,
    pub compressed: bool,
}

impl SegmentFile {
    /// Parse `<kind>.<seq>.log[.lz4]`
    pub fn parse(dir: &Path, name: &str) -> Option<Self> {
        let (rest, compressed) = match name.strip_suffix(".log.lz4") {
            Some(rest) => (rest, true),
            None => (name.strip_suffix(".log")?, false),
        };
        let (prefix, seq) = rest.split_once('.')?;
        let kind = match prefix {
            "data" => SegmentKind::Data,
            "ids" => SegmentKind::Ids,
            _ => return None,
        };
        Some(Self {
            kind,
            seq: seq.parse().ok()?,
            path: dir.join(name),
            compressed,
        })
    }

    /// Last modification time, if the file still exists
    pub fn modified(&self) -> Option<SystemTime> {
        fs::metadata(&self.path).and_then(|m| m.modified()).ok()
    }

    /// Remove the file; a missing file is not an error
    pub fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(JournalError::io(&self.path, e)),
        }
    }
}

/// Build the path of a segment
pub fn segment_path(dir: &Path, kind: SegmentKind, seq: u64, format: SegmentFormat) -> PathBuf {
    dir.join(format!("{}.{:010}{}", kind.prefix(), seq, format.extension()))
}

/// List the segments of one series, sorted by sequence
pub fn list_segments(dir: &Path, kind: SegmentKind) -> Result<Vec<SegmentFile>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(JournalError::io(dir, e)),
    };

    let mut segments = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| JournalError::io(dir, e))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(segment) = SegmentFile::parse(dir, name) {
            if segment.kind == kind {
                segments.push(segment);
            }
        }
    }
    segments.sort_by_key(|s| s.seq);
    Ok(segments)
}

/// Next unused sequence of a series
pub fn next_seq(dir: &Path, kind: SegmentKind) -> Result<u64> {
    Ok(list_segments(dir, kind)?
        .last()
        .map(|s| s.seq + 1)
        .unwrap_or(0))
}

/// Appends frames to the active segment of one series, rotating by size
pub struct SegmentWriter {
    dir: PathBuf,
    kind: SegmentKind,
    format: SegmentFormat,
    max_bytes: u64,
    seq: u64,
    opened_at: SystemTime,
    writer: Option<Box<dyn ChainWrite>>,
}

impl SegmentWriter {
    /// Open a new active segment after every existing one
    pub fn create(
        dir: impl Into<PathBuf>,
        kind: SegmentKind,
        format: SegmentFormat,
        max_bytes: u64,
    ) -> Result<Self> {
        let dir = dir.into();
        let seq = next_seq(&dir, kind)?;
        let writer = open_segment(&segment_path(&dir, kind, seq, format), format)?;
        Ok(Self {
            dir,
            kind,
            format,
            max_bytes,
            seq,
            opened_at: SystemTime::now(),
            writer: Some(writer),
        })
    }

    /// Sequence of the active segment
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// When the active segment was started
    pub fn opened_at(&self) -> SystemTime {
        self.opened_at
    }

    pub fn path(&self) -> PathBuf {
        segment_path(&self.dir, self.kind, self.seq, self.format)
    }

    /// Append one complete frame. Returns true if the segment rotated.
    ///
    /// A failed write abandons the active segment so a retry never lands
    /// behind a partial frame.
    pub fn append(&mut self, frame: &[u8]) -> Result<bool> {
        let path = self.path();
        let mut writer = match self.writer.take() {
            Some(writer) => writer,
            None => open_segment(&path, self.format)?,
        };

        if let Err(e) = writer.write_all(frame) {
            let _ = writer.finish();
            self.seq += 1;
            self.opened_at = SystemTime::now();
            return Err(JournalError::io(&path, e));
        }

        let full = writer.bytes_written() >= self.max_bytes;
        self.writer = Some(writer);
        if full {
            self.rotate()?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Seal the active segment and start the next one
    pub fn rotate(&mut self) -> Result<()> {
        let sealed = self.path();
        let finished = match self.writer.take() {
            Some(writer) => writer.finish(),
            None => Ok(()),
        };
        self.seq += 1;
        self.opened_at = SystemTime::now();
        finished.map_err(|e| JournalError::io(&sealed, e))?;

        let path = self.path();
        tracing::debug!(
            sealed = %sealed.display(),
            active = %path.display(),
            "rotated journal segment"
        );
        self.writer = Some(open_segment(&path, self.format)?);
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        let path = self.path();
        match &mut self.writer {
            Some(writer) => writer.flush_all().map_err(|e| JournalError::io(path, e)),
            None => Ok(()),
        }
    }

    /// Flush and close the active segment. It becomes sealed.
    pub fn finish(mut self) -> Result<()> {
        let path = self.path();
        match self.writer.take() {
            Some(writer) => writer.finish().map_err(|e| JournalError::io(path, e)),
            None => Ok(()),
        }
    }
}

fn open_segment(path: &Path, format: SegmentFormat) -> Result<Box<dyn ChainWrite>> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| JournalError::io(path, e))?;
    Ok(format.wrap(file))
}

fn open_read(segment: &SegmentFile) -> Result<Box<dyn Read + Send>> {
    let file = File::open(&segment.path).map_err(|e| JournalError::io(&segment.path, e))?;
    let reader = BufReader::new(file);
    if segment.compressed {
        Ok(Box::new(FrameDecoder::new(reader)))
    } else {
        Ok(Box::new(reader))
    }
}

/// Sequential reader over a data segment
pub struct DataReader {
    path: PathBuf,
    inner: Box<dyn Read + Send>,
    buf: Vec<u8>,
}

impl DataReader {
    pub fn open(segment: &SegmentFile) -> Result<Self> {
        Ok(Self {
            path: segment.path.clone(),
            inner: open_read(segment)?,
            buf: Vec::new(),
        })
    }

    /// Next record, or `None` at the end of the segment.
    ///
    /// A partial length prefix counts as the end; a partial body is
    /// reported as corruption.
    pub fn next_record(&mut self) -> Result<Option<StoredRecord>> {
        let mut len = [0u8; LEN_PREFIX];
        match self.inner.read_exact(&mut len) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(JournalError::corrupt(&self.path, e.to_string())),
        }

        let len = u32::from_be_bytes(len) as usize;
        if len > MAX_RECORD_BYTES {
            return Err(JournalError::corrupt(
                &self.path,
                format!("record length {len} exceeds limit"),
            ));
        }

        self.buf.resize(len, 0);
        self.inner
            .read_exact(&mut self.buf)
            .map_err(|e| JournalError::corrupt(&self.path, format!("truncated record: {e}")))?;

        serde_json::from_slice(&self.buf)
            .map(Some)
            .map_err(|e| JournalError::corrupt(&self.path, e.to_string()))
    }
}

/// Read every id of a commit segment. A partial trailing id is ignored.
pub fn read_ids(segment: &SegmentFile) -> Result<Vec<i64>> {
    let mut reader = open_read(segment)?;
    let mut ids = Vec::new();
    let mut raw = [0u8; 8];
    loop {
        match reader.read_exact(&mut raw) {
            Ok(()) => ids.push(i64::from_be_bytes(raw)),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(JournalError::corrupt(&segment.path, e.to_string())),
        }
    }
    Ok(ids)
}

#[cfg(test)]
#[path = "segment_test.rs"]
mod segment_test;
