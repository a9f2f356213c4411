//! The in-flight unit of work

use crate::{Payload, ProtocolError, Value};

/// One log record moving through the pipeline.
///
/// `extra_ids` holds the ids of records merged into this one (multi-line
/// concatenation). It is owned by the message, so committing a merged record
/// commits every physical line it absorbed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    /// Routing key for per-tag pipelines and sink selection
    pub tag: String,
    /// Record fields
    pub payload: Payload,
    /// Sequence id, unique within a rotation epoch
    pub id: i64,
    /// Ids of records merged into this one
    pub extra_ids: Vec<i64>,
}

impl Message {
    pub fn new(tag: impl Into<String>, payload: Payload) -> Self {
        Self {
            tag: tag.into(),
            payload,
            id: 0,
            extra_ids: Vec::new(),
        }
    }

    /// Builder-style id setter
    #[inline]
    pub fn with_id(mut self, id: i64) -> Self {
        self.id = id;
        self
    }

    /// Clear all fields while keeping allocations for reuse
    pub fn reset(&mut self) {
        self.tag.clear();
        self.payload.clear();
        self.id = 0;
        self.extra_ids.clear();
    }

    /// Every id that committing this message acknowledges
    pub fn committed_ids(&self) -> impl Iterator<Item = i64> + '_ {
        std::iter::once(self.id).chain(self.extra_ids.iter().copied())
    }

    /// Textual field lookup (string or bytes)
    #[inline]
    pub fn text_field(&self, key: &str) -> Option<&[u8]> {
        self.payload.get(key).and_then(Value::as_text_bytes)
    }

    /// Decode a JSON line of the form `{"tag": "...", "payload": {...}}`.
    ///
    /// A record without a `payload` object uses every field except `tag`.
    pub fn from_json_line(line: &str) -> crate::Result<Self> {
        let value: serde_json::Value = serde_json::from_str(line)?;
        let serde_json::Value::Object(mut object) = value else {
            return Err(ProtocolError::unsupported("<root>", "non-object"));
        };
        let tag = match object.remove("tag") {
            Some(serde_json::Value::String(tag)) => tag,
            _ => return Err(ProtocolError::missing_field("tag")),
        };
        let payload = match object.remove("payload") {
            Some(serde_json::Value::Object(map)) => Payload::from_json_object(map)?,
            Some(_) => return Err(ProtocolError::unsupported("payload", "non-object")),
            None => Payload::from_json_object(object)?,
        };
        Ok(Self::new(tag, payload))
    }
}
