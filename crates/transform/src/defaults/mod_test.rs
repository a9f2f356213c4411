use std::collections::BTreeMap;
use std::sync::Arc;

use sluice_protocol::{MessagePool, Payload, Value, inlet};

use super::*;

fn context() -> FilterContext {
    let (upstream, _rx) = inlet("reenter", 4);
    FilterContext::new(upstream, Arc::new(MessagePool::new(8)))
}

fn message(tag: &str) -> Message {
    let mut payload = Payload::new();
    payload.insert("host", "web-1");
    Message::new(tag, payload).with_id(9)
}

#[test]
fn test_empty_tag_removed() {
    let filter = DefaultFilter::new(&DefaultFilterConfig::default()).unwrap();
    let ctx = context();

    assert!(filter.filter(message(""), &ctx).is_none());
    assert_eq!(ctx.pool.available(), 1);
    assert!(filter.filter(message("app"), &ctx).is_some());
    assert_eq!(filter.snapshot().empty_tag, 1);
}

#[test]
fn test_unsupported_tag_removed() {
    let config = DefaultFilterConfig {
        remove_unsupported_tag: true,
        accept_tags: vec!["app.prod".into()],
        ..Default::default()
    };
    let filter = DefaultFilter::new(&config).unwrap();
    let ctx = context();

    assert!(filter.filter(message("app.prod"), &ctx).is_some());
    assert!(filter.filter(message("other"), &ctx).is_none());
    assert_eq!(filter.snapshot().unsupported_tag, 1);
}

#[test]
fn test_unsupported_removal_requires_accept_tags() {
    let config = DefaultFilterConfig {
        remove_unsupported_tag: true,
        ..Default::default()
    };
    assert!(matches!(
        DefaultFilter::new(&config),
        Err(TransformError::Config(_))
    ));
}

#[test]
fn test_add_fields_per_tag() {
    let mut fields = BTreeMap::new();
    fields.insert("origin".to_string(), "%{@tag}-%{host}".to_string());
    fields.insert("team".to_string(), "platform".to_string());
    let mut add = BTreeMap::new();
    add.insert("app.prod".to_string(), fields);
    let config = DefaultFilterConfig {
        add,
        ..Default::default()
    };
    let filter = DefaultFilter::new(&config).unwrap();
    let ctx = context();

    let out = filter.filter(message("app.prod"), &ctx).unwrap();
    assert_eq!(out.payload.get("origin"), Some(&Value::from("app.prod-web-1")));
    assert_eq!(out.payload.get("team"), Some(&Value::from("platform")));

    let untouched = filter.filter(message("other"), &ctx).unwrap();
    assert!(!untouched.payload.contains_key("origin"));
    assert_eq!(filter.snapshot().fields_added, 2);
}
