//! Tests for the filter chain

use std::sync::atomic::{AtomicUsize, Ordering};

use sluice_protocol::{MessagePool, Payload, Value, inlet};

use super::*;

fn context() -> FilterContext {
    let (upstream, _rx) = inlet("reenter", 4);
    FilterContext::new(upstream, Arc::new(MessagePool::new(4)))
}

fn message(tag: &str) -> Message {
    Message::new(tag, Payload::new()).with_id(1)
}

/// Stamps its name into the payload
struct Stamp(&'static str);

impl Filter for Stamp {
    fn name(&self) -> &'static str {
        self.0
    }

    fn filter(&self, mut msg: Message, _ctx: &FilterContext) -> Option<Message> {
        msg.payload.insert(self.0, "seen");
        Some(msg)
    }
}

/// Consumes every message of one tag
struct Swallow {
    tag: &'static str,
    calls: AtomicUsize,
}

impl Filter for Swallow {
    fn name(&self) -> &'static str {
        "swallow"
    }

    fn is_tag_supported(&self, tag: &str) -> bool {
        tag == self.tag
    }

    fn filter(&self, msg: Message, ctx: &FilterContext) -> Option<Message> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        ctx.discard(msg);
        None
    }
}

#[test]
fn test_empty_chain_passes_through() {
    let chain = FilterChain::empty();
    assert!(chain.is_empty());

    let out = chain.apply(message("app"), &context()).unwrap();
    assert_eq!(out.tag, "app");
}

#[test]
fn test_filters_run_in_order() {
    let chain = FilterChain::new(vec![Arc::new(Stamp("first")), Arc::new(Stamp("second"))]);
    assert_eq!(chain.len(), 2);
    assert_eq!(chain.names(), vec!["first", "second"]);

    let out = chain.apply(message("app"), &context()).unwrap();
    assert_eq!(out.payload.get("first"), Some(&Value::from("seen")));
    assert_eq!(out.payload.get("second"), Some(&Value::from("seen")));
}

#[test]
fn test_consumed_message_stops_chain() {
    let swallow = Arc::new(Swallow {
        tag: "noise",
        calls: AtomicUsize::new(0),
    });
    let mut chain = FilterChain::new(vec![swallow.clone()]);
    chain.push(Arc::new(Stamp("after")));

    let ctx = context();
    assert!(chain.apply(message("noise"), &ctx).is_none());
    assert_eq!(ctx.pool.available(), 1);

    // unsupported tags skip the filter
    let out = chain.apply(message("app"), &ctx).unwrap();
    assert!(out.payload.contains_key("after"));
    assert_eq!(swallow.calls.load(Ordering::Relaxed), 1);
}

#[test]
fn test_discard_commits_after_journal() {
    let (commit, commit_rx) = inlet("commit", 1);
    let ctx = context().with_wait_commit(commit);

    ctx.discard(message("app"));
    assert_eq!(commit_rx.try_recv().unwrap().id, 1);

    // full commit channel falls back to the pool
    ctx.discard(message("app"));
    ctx.discard(message("app"));
    assert_eq!(ctx.pool.available(), 1);
}

#[test]
fn test_reenter_full_returns_to_pool() {
    let (upstream, rx) = inlet("reenter", 1);
    let ctx = FilterContext::new(upstream, Arc::new(MessagePool::new(4)));

    assert!(ctx.reenter(message("app")));
    assert!(!ctx.reenter(message("app")));
    assert_eq!(ctx.pool.available(), 1);
    assert!(rx.try_recv().is_some());
}
