//! Tests for the metrics registry

use crate::MetricsRegistry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[test]
fn test_register_and_snapshot() {
    let registry = MetricsRegistry::new();
    let counter = Arc::new(AtomicU64::new(0));
    let c = Arc::clone(&counter);
    registry.register("producer", move || {
        serde_json::json!({ "total": c.load(Ordering::Relaxed) })
    });

    counter.store(5, Ordering::Relaxed);
    let snap = registry.snapshot();
    assert_eq!(snap["producer"]["total"], 5);

    counter.store(6, Ordering::Relaxed);
    assert_eq!(registry.get("producer").unwrap()["total"], 6);
}

#[test]
fn test_replace_and_unregister() {
    let registry = MetricsRegistry::new();
    registry.register("a", || serde_json::json!(1));
    registry.register("a", || serde_json::json!(2));
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.get("a"), Some(serde_json::json!(2)));

    assert!(registry.unregister("a"));
    assert!(!registry.unregister("a"));
    assert!(registry.is_empty());
    assert!(registry.get("a").is_none());
}

#[test]
fn test_names_are_sorted() {
    let registry = MetricsRegistry::new();
    registry.register("journal", || serde_json::json!(null));
    registry.register("dispatcher", || serde_json::json!(null));
    assert_eq!(registry.names(), vec!["dispatcher", "journal"]);
}

#[test]
fn test_snapshot_fn_may_touch_registry() {
    let registry = MetricsRegistry::new();
    let inner = registry.clone();
    registry.register("self", move || serde_json::json!(inner.contains("self")));

    assert_eq!(registry.snapshot()["self"], true);
}
