//! Tests for the lock-free message pool

use crate::{Message, MessagePool, Payload};
use std::sync::Arc;
use std::thread;

#[test]
fn test_new_pool_starts_empty() {
    let pool = MessagePool::new(10);
    assert_eq!(pool.capacity(), 10);
    assert_eq!(pool.available(), 0);
}

#[test]
fn test_get_from_empty_pool_allocates() {
    let pool = MessagePool::new(2);
    let msg = pool.get();
    assert!(msg.tag.is_empty());

    let snapshot = pool.metrics().snapshot();
    assert_eq!(snapshot.misses, 1);
    assert_eq!(snapshot.hits, 0);
}

#[test]
fn test_put_resets_and_reuses() {
    let pool = MessagePool::new(4);
    let mut payload = Payload::new();
    payload.insert("log", "x");
    let mut msg = Message::new("app", payload).with_id(9);
    msg.extra_ids.push(10);

    pool.put(msg);
    assert_eq!(pool.available(), 1);

    let reused = pool.get();
    assert_eq!(reused, Message::default());
    assert_eq!(pool.metrics().snapshot().hits, 1);
}

#[test]
fn test_put_to_full_pool_drops() {
    let pool = MessagePool::new(1);
    pool.put(Message::default());
    pool.put(Message::default());

    let snapshot = pool.metrics().snapshot();
    assert_eq!(snapshot.returns, 1);
    assert_eq!(snapshot.drops, 1);
    assert_eq!(pool.available(), 1);
}

#[test]
fn test_trim_keeps_requested_amount() {
    let pool = MessagePool::new(8);
    for _ in 0..8 {
        pool.put(Message::default());
    }

    assert_eq!(pool.trim(3), 5);
    assert_eq!(pool.available(), 3);
    assert_eq!(pool.trim(3), 0);
}

#[test]
fn test_concurrent_get_put() {
    let pool = Arc::new(MessagePool::new(64));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                for i in 0..1000 {
                    let mut msg = pool.get();
                    msg.id = i;
                    pool.put(msg);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let snapshot = pool.metrics().snapshot();
    assert_eq!(snapshot.hits + snapshot.misses, 4000);
    assert!(pool.available() <= 64);
}
