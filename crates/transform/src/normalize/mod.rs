//! Field normaliser for search sinks
//!
//! Search backends reject or mangle some field shapes. Before delivery:
//!
//! - empty keys are dropped
//! - `.` in keys becomes `__` (dots would be read as object paths)
//! - raw bytes become strings
//! - the message field always exists, possibly empty
//!
//! Nested maps are normalised recursively.

use sluice_protocol::{Message, Payload, Value};

use crate::{Filter, FilterContext};

pub struct FieldNormalizer {
    message_key: String,
}

impl FieldNormalizer {
    pub fn new(message_key: impl Into<String>) -> Self {
        Self {
            message_key: message_key.into(),
        }
    }
}

fn normalize(payload: Payload) -> Payload {
    payload
        .into_iter()
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| {
            let key = if key.contains('.') {
                key.replace('.', "__")
            } else {
                key
            };
            let value = match value {
                Value::Bytes(b) => Value::Str(String::from_utf8_lossy(&b).into_owned()),
                Value::Map(m) => Value::Map(normalize(m)),
                other => other,
            };
            (key, value)
        })
        .collect()
}

impl Filter for FieldNormalizer {
    fn name(&self) -> &'static str {
        "normalize"
    }

    fn filter(&self, mut msg: Message, _ctx: &FilterContext) -> Option<Message> {
        msg.payload = normalize(std::mem::take(&mut msg.payload));
        if !msg.payload.contains_key(&self.message_key) {
            msg.payload.insert(self.message_key.as_str(), "");
        }
        Some(msg)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sluice_protocol::{Bytes, MessagePool, inlet};

    use super::*;

    #[test]
    fn test_normalizes_keys_and_values() {
        let (upstream, _rx) = inlet("reenter", 1);
        let ctx = FilterContext::new(upstream, Arc::new(MessagePool::new(1)));

        let mut nested = Payload::new();
        nested.insert("a.b", Bytes::from_static(b"x"));
        let mut payload = Payload::new();
        payload.insert("", "dropped");
        payload.insert("kubernetes.pod", "web");
        payload.insert("raw", Bytes::from_static(b"line"));
        payload.insert("meta", nested);
        payload.insert("count", 2i64);

        let out = FieldNormalizer::new("message")
            .filter(Message::new("app", payload), &ctx)
            .unwrap();

        assert!(!out.payload.contains_key(""));
        assert_eq!(out.payload.get("kubernetes__pod"), Some(&Value::from("web")));
        assert_eq!(out.payload.get("raw"), Some(&Value::from("line")));
        assert_eq!(out.payload.get_path("meta.a__b"), Some(&Value::from("x")));
        assert_eq!(out.payload.get("count"), Some(&Value::Int(2)));
        assert_eq!(out.payload.get("message"), Some(&Value::from("")));
    }

    #[test]
    fn test_existing_message_kept() {
        let (upstream, _rx) = inlet("reenter", 1);
        let ctx = FilterContext::new(upstream, Arc::new(MessagePool::new(1)));
        let mut payload = Payload::new();
        payload.insert("message", "hello");

        let out = FieldNormalizer::new("message")
            .filter(Message::new("app", payload), &ctx)
            .unwrap();
        assert_eq!(out.payload.get("message"), Some(&Value::from("hello")));
    }
}
