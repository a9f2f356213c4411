//! Payload values
//!
//! Upstream receivers hand us loosely typed key/value records. `Value` is the
//! closed set of shapes a payload field can take; every accessor is fallible
//! so stages treat "absent" and "wrong type" as ordinary branches.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::collections::btree_map;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// A single payload field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    /// Raw bytes (receivers that do not decode text)
    Bytes(Bytes),
    /// UTF-8 text
    Str(String),
    /// Signed integer
    Int(i64),
    /// Floating point number
    Float(f64),
    /// Nested map
    Map(Payload),
}

impl Value {
    /// Short name of the variant, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bytes(_) => "bytes",
            Self::Str(_) => "string",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Map(_) => "map",
        }
    }

    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    #[inline]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Raw bytes of a textual value (either `Str` or `Bytes`)
    #[inline]
    pub fn as_text_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Str(s) => Some(s.as_bytes()),
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Textual value as a string, lossily decoding bytes
    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            Self::Str(s) => Some(Cow::Borrowed(s)),
            Self::Bytes(b) => Some(String::from_utf8_lossy(b)),
            _ => None,
        }
    }

    #[inline]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    #[inline]
    pub fn as_map(&self) -> Option<&Payload> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    #[inline]
    pub fn as_map_mut(&mut self) -> Option<&mut Payload> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Length in bytes of a textual value
    #[inline]
    pub fn text_len(&self) -> Option<usize> {
        self.as_text_bytes().map(<[u8]>::len)
    }

    /// Append `line` after a newline, keeping the current variant.
    ///
    /// Returns `false` (and leaves the value untouched) for non-textual values.
    pub fn append_line(&mut self, line: &[u8]) -> bool {
        match self {
            Self::Str(s) => {
                s.reserve(line.len() + 1);
                s.push('\n');
                s.push_str(&String::from_utf8_lossy(line));
                true
            }
            Self::Bytes(b) => {
                let mut buf = BytesMut::with_capacity(b.len() + line.len() + 1);
                buf.extend_from_slice(b);
                buf.put_u8(b'\n');
                buf.extend_from_slice(line);
                *b = buf.freeze();
                true
            }
            _ => false,
        }
    }

    /// Convert a JSON value. `null` maps to `None` (field omitted).
    pub fn from_json(field: &str, value: serde_json::Value) -> crate::Result<Option<Self>> {
        let converted = match value {
            serde_json::Value::Null => return Ok(None),
            serde_json::Value::Bool(b) => Self::Str(b.to_string()),
            serde_json::Value::String(s) => Self::Str(s),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => match n.as_f64() {
                    Some(f) => Self::Float(f),
                    None => return Err(ProtocolError::unsupported(field, "number")),
                },
            },
            serde_json::Value::Object(map) => Self::Map(Payload::from_json_object(map)?),
            serde_json::Value::Array(_) => return Err(ProtocolError::unsupported(field, "array")),
        };
        Ok(Some(converted))
    }

    /// Render as JSON for text sinks; bytes are decoded lossily
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Bytes(b) => serde_json::Value::String(String::from_utf8_lossy(b).into_owned()),
            Self::Str(s) => serde_json::Value::String(s.clone()),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::Map(m) => m.to_json(),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Self::Bytes(b)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(b))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<Payload> for Value {
    fn from(m: Payload) -> Self {
        Self::Map(m)
    }
}

/// Ordered `String -> Value` mapping carried by every message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(BTreeMap<String, Value>);

impl Payload {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    #[inline]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    #[inline]
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.0.get_mut(key)
    }

    /// Look up a dotted path (`a.b.c`) through nested maps.
    ///
    /// A top-level key that literally contains dots wins over the nested walk.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        if let Some(v) = self.0.get(path) {
            return Some(v);
        }
        let mut parts = path.split('.');
        let mut current = self.0.get(parts.next()?)?;
        for part in parts {
            current = current.as_map()?.get(part)?;
        }
        Some(current)
    }

    #[inline]
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    #[inline]
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    #[inline]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.0.iter()
    }

    pub fn keys(&self) -> btree_map::Keys<'_, String, Value> {
        self.0.keys()
    }

    pub fn retain(&mut self, f: impl FnMut(&String, &mut Value) -> bool) {
        self.0.retain(f);
    }

    /// Build a payload from a decoded JSON object
    pub fn from_json_object(map: serde_json::Map<String, serde_json::Value>) -> crate::Result<Self> {
        let mut payload = Self::new();
        for (key, value) in map {
            if let Some(v) = Value::from_json(&key, value)? {
                payload.0.insert(key, v);
            }
        }
        Ok(payload)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Payload {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl IntoIterator for Payload {
    type Item = (String, Value);
    type IntoIter = btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Payload {
    type Item = (&'a String, &'a Value);
    type IntoIter = btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
