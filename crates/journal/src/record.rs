//! On-disk record encoding
//!
//! Data segments hold `[u32 BE length][JSON record]` frames. Commit
//! segments hold raw big-endian `i64` ids.

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use sluice_protocol::{Message, Payload};

use crate::error::Result;

/// Length prefix size
pub const LEN_PREFIX: usize = 4;

/// Upper bound for a single record; larger frames are treated as corruption
pub const MAX_RECORD_BYTES: usize = 64 * 1024 * 1024;

#[derive(Serialize)]
struct RecordRef<'a> {
    id: i64,
    tag: &'a str,
    payload: &'a Payload,
}

/// A record read back from a data segment
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StoredRecord {
    pub id: i64,
    pub tag: String,
    #[serde(default)]
    pub payload: Payload,
}

impl StoredRecord {
    /// Move the record into a (pooled) message
    pub fn fill(self, msg: &mut Message) {
        msg.id = self.id;
        msg.tag = self.tag;
        msg.payload = self.payload;
    }
}

/// Encode one data frame into `buf`, replacing its contents
pub fn encode_record(msg: &Message, buf: &mut BytesMut) -> Result<()> {
    buf.clear();
    buf.put_u32(0);
    let record = RecordRef {
        id: msg.id,
        tag: &msg.tag,
        payload: &msg.payload,
    };
    serde_json::to_writer((&mut *buf).writer(), &record)?;
    let len = (buf.len() - LEN_PREFIX) as u32;
    buf[..LEN_PREFIX].copy_from_slice(&len.to_be_bytes());
    Ok(())
}

/// Encode every id a commit acknowledges
pub fn encode_ids(msg: &Message, buf: &mut BytesMut) {
    buf.clear();
    for id in msg.committed_ids() {
        buf.put_i64(id);
    }
}
