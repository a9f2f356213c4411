//! Field templates
//!
//! A template is literal text with `%{...}` placeholders:
//!
//! | Placeholder      | Value                                  |
//! |------------------|----------------------------------------|
//! | `%{key}`         | payload field                          |
//! | `%{a.b}`         | nested payload field                   |
//! | `%{@tag}`        | message tag                            |
//! | `%{@id}`         | message id                             |
//! | `%{@now}`        | current UTC time, RFC 3339             |
//! | `%{@unix}`       | current unix time in seconds           |
//! | `%{@lower:key}`  | payload field, lowercased              |
//! | `%{@upper:key}`  | payload field, uppercased              |
//!
//! Missing or non-text fields render as the empty string.

use std::fmt::Write;
use std::sync::LazyLock;

use chrono::{SecondsFormat, Utc};
use regex::Regex;
use sluice_protocol::{Message, Value};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"%\{(@?[\w\-.]+(?::[^\s}]+)?)\}").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
enum Var {
    Tag,
    Id,
    Now,
    Unix,
    Lower(String),
    Upper(String),
    Field(String),
}

impl Var {
    fn parse(key: &str) -> Self {
        match key {
            "@tag" => Self::Tag,
            "@id" => Self::Id,
            "@now" => Self::Now,
            "@unix" => Self::Unix,
            _ => match key.split_once(':') {
                Some(("@lower", field)) => Self::Lower(field.to_string()),
                Some(("@upper", field)) => Self::Upper(field.to_string()),
                _ => Self::Field(key.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Text(String),
    Var(Var),
}

/// A parsed field template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    parts: Vec<Part>,
}

impl Template {
    pub fn parse(source: &str) -> Self {
        let mut parts = Vec::new();
        let mut last = 0;
        for caps in PLACEHOLDER.captures_iter(source) {
            let (Some(whole), Some(key)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if whole.start() > last {
                parts.push(Part::Text(source[last..whole.start()].to_string()));
            }
            parts.push(Part::Var(Var::parse(key.as_str())));
            last = whole.end();
        }
        if last < source.len() {
            parts.push(Part::Text(source[last..].to_string()));
        }
        Self { parts }
    }

    /// Whether the template has no placeholders
    pub fn is_static(&self) -> bool {
        self.parts.iter().all(|p| matches!(p, Part::Text(_)))
    }

    pub fn render(&self, msg: &Message) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Text(text) => out.push_str(text),
                Part::Var(Var::Tag) => out.push_str(&msg.tag),
                Part::Var(Var::Id) => {
                    let _ = write!(out, "{}", msg.id);
                }
                Part::Var(Var::Now) => {
                    out.push_str(&Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));
                }
                Part::Var(Var::Unix) => {
                    let _ = write!(out, "{}", Utc::now().timestamp());
                }
                Part::Var(Var::Lower(key)) => out.push_str(&field(msg, key).to_lowercase()),
                Part::Var(Var::Upper(key)) => out.push_str(&field(msg, key).to_uppercase()),
                Part::Var(Var::Field(key)) => out.push_str(&field(msg, key)),
            }
        }
        out
    }
}

fn field(msg: &Message, key: &str) -> String {
    let value = msg
        .payload
        .get(key)
        .or_else(|| msg.payload.get_path(key));
    match value {
        Some(Value::Int(i)) => i.to_string(),
        Some(Value::Float(f)) => f.to_string(),
        Some(value) => value.as_text().map(|t| t.into_owned()).unwrap_or_default(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use sluice_protocol::Payload;

    use super::*;

    fn message() -> Message {
        let mut source = Payload::new();
        source.insert("ip", "10.0.0.1");
        let mut payload = Payload::new();
        payload.insert("level", "Warn");
        payload.insert("source", source);
        payload.insert("port", 8080i64);
        Message::new("app.prod", payload).with_id(42)
    }

    #[test]
    fn test_static_text() {
        let template = Template::parse("constant");
        assert!(template.is_static());
        assert_eq!(template.render(&message()), "constant");
    }

    #[test]
    fn test_builtin_variables() {
        let template = Template::parse("%{@tag}/%{@id}");
        assert!(!template.is_static());
        assert_eq!(template.render(&message()), "app.prod/42");
    }

    #[test]
    fn test_fields_and_case() {
        let msg = message();
        assert_eq!(Template::parse("%{source.ip}:%{port}").render(&msg), "10.0.0.1:8080");
        assert_eq!(Template::parse("%{@lower:level}-%{@upper:level}").render(&msg), "warn-WARN");
        assert_eq!(Template::parse("[%{missing}]").render(&msg), "[]");
    }

    #[test]
    fn test_time_variables() {
        let msg = message();
        let unix: i64 = Template::parse("%{@unix}").render(&msg).parse().unwrap();
        assert!(unix > 1_600_000_000);

        let now = Template::parse("%{@now}").render(&msg);
        assert!(chrono::DateTime::parse_from_rfc3339(&now).is_ok());
    }
}
