//! Tests for the producer

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use sluice_config::{NullSinkConfig, ProducerConfig};
use sluice_protocol::{Inlet, Message, MessagePool, Outlet, Payload, Value, inlet};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use xxhash_rust::xxh3::xxh3_64;

use super::*;
use crate::common::Result;
use crate::null::NullSender;

/// Accepts listed tags, counts spawns, parks deliveries unless `ack` is set
struct Probe {
    tags: Vec<String>,
    ack: bool,
    discard_when_blocked: bool,
    capacity: usize,
    spawns: AtomicUsize,
    parked: Mutex<Vec<Outlet<Arc<Delivery>>>>,
}

impl Probe {
    fn new(tags: &[&str]) -> Self {
        Self {
            tags: tags.iter().map(|t| t.to_string()).collect(),
            ack: true,
            discard_when_blocked: false,
            capacity: 16,
            spawns: AtomicUsize::new(0),
            parked: Mutex::new(Vec::new()),
        }
    }
}

impl Sender for Probe {
    fn name(&self) -> &str {
        "probe"
    }

    fn is_tag_supported(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    fn discard_when_blocked(&self) -> bool {
        self.discard_when_blocked
    }

    fn spawn(
        &self,
        cancel: CancellationToken,
        reporter: CompletionReporter,
    ) -> Result<Arc<Inlet<Arc<Delivery>>>> {
        self.spawns.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = inlet("sink.probe", self.capacity);
        if !self.ack {
            self.parked.lock().push(rx);
            return Ok(tx);
        }
        tokio::spawn(async move {
            loop {
                let delivery = tokio::select! {
                    _ = cancel.cancelled() => break,
                    Some(d) = rx.recv() => d,
                };
                reporter.success(delivery).await;
            }
        });
        Ok(tx)
    }
}

struct Harness {
    producer: Arc<Producer>,
    input: Arc<Inlet<Message>>,
    commits: Outlet<Message>,
    pool: Arc<MessagePool>,
    cancel: CancellationToken,
}

fn harness(senders: Vec<Arc<dyn Sender>>) -> Harness {
    let pool = Arc::new(MessagePool::new(64));
    let (commit, commits) = inlet("journal.commit", 64);
    let cancel = CancellationToken::new();
    let config = ProducerConfig {
        n_workers: 2,
        report_size: 64,
    };
    let producer = Arc::new(Producer::new(
        &config,
        distribution_key("host", "sit"),
        senders,
        Arc::clone(&pool),
        commit,
        cancel.clone(),
    ));
    let (input, input_rx) = inlet("post_filters.out", 64);
    producer.run(input_rx);
    Harness {
        producer,
        input,
        commits,
        pool,
        cancel,
    }
}

fn message(tag: &str, id: i64) -> Message {
    let mut payload = Payload::new();
    payload.insert("log", "line");
    Message::new(tag, payload).with_id(id)
}

fn null(fail: bool) -> Arc<dyn Sender> {
    Arc::new(NullSender::new(
        if fail { "failing" } else { "null" },
        &NullSinkConfig {
            fail,
            ..Default::default()
        },
    ))
}

async fn recv(rx: &Outlet<Message>) -> Message {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for commit")
        .expect("commit channel closed")
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    timeout(Duration::from_secs(2), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}

#[test]
fn test_distribution_key() {
    let key = distribution_key("web-1", "prod");
    assert_eq!(key, format!("{:x}", xxh3_64(b"web-1-prod")));
    assert!(key.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
}

#[tokio::test]
async fn test_commit_after_every_sink_succeeds() {
    let h = harness(vec![null(false), null(false)]);
    h.input.try_send(message("app", 42)).unwrap();

    let committed = recv(&h.commits).await;
    assert_eq!(committed.id, 42);
    let expected = format!("{}-42", distribution_key("host", "sit"));
    assert_eq!(committed.payload.get(MSGID_KEY), Some(&Value::from(expected)));

    // one commit per message, however many sinks
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.commits.try_recv().is_none());
    assert_eq!(h.producer.metrics().committed.get(), 1);
    assert_eq!(h.producer.metrics().pending.load(Ordering::Relaxed), 0);
    h.cancel.cancel();
}

#[tokio::test]
async fn test_any_failure_recycles() {
    let h = harness(vec![null(false), null(true)]);
    let pooled = h.pool.available();
    h.input.try_send(message("app", 1)).unwrap();

    wait_until(|| h.producer.metrics().recycled.get() == 1).await;
    assert!(h.commits.try_recv().is_none());
    assert_eq!(h.pool.available(), pooled + 1);
    h.cancel.cancel();
}

#[tokio::test]
async fn test_unsupported_tag_is_committed() {
    let h = harness(vec![Arc::new(Probe::new(&["app"]))]);
    h.input.try_send(message("other", 5)).unwrap();

    let committed = recv(&h.commits).await;
    assert_eq!(committed.id, 5);
    assert!(committed.payload.get(MSGID_KEY).is_none());
    assert_eq!(h.producer.metrics().unsupported.get(), 1);
    h.cancel.cancel();
}

#[tokio::test]
async fn test_sender_spawned_once_across_tags() {
    let probe = Arc::new(Probe::new(&["a", "b"]));
    let h = harness(vec![probe.clone() as Arc<dyn Sender>]);
    for (id, tag) in [(1, "a"), (2, "b"), (3, "a"), (4, "b")] {
        h.input.try_send(message(tag, id)).unwrap();
    }

    let mut ids: Vec<i64> = Vec::new();
    for _ in 0..4 {
        ids.push(recv(&h.commits).await.id);
    }
    ids.sort();
    assert_eq!(ids, vec![1, 2, 3, 4]);
    assert_eq!(probe.spawns.load(Ordering::SeqCst), 1);
    assert_eq!(h.producer.snapshot().sinks.len(), 1);
    h.cancel.cancel();
}

#[tokio::test]
async fn test_blocked_sink_policy() {
    let mut discarding = Probe::new(&["app"]);
    discarding.ack = false;
    discarding.capacity = 1;
    discarding.discard_when_blocked = true;
    let h = harness(vec![Arc::new(discarding)]);

    // the first delivery sits in the sink's channel, the second is refused
    h.input.try_send(message("app", 1)).unwrap();
    wait_until(|| h.producer.snapshot().sinks.first().is_some_and(|s| s.1.len == 1)).await;
    h.input.try_send(message("app", 2)).unwrap();

    assert_eq!(recv(&h.commits).await.id, 2);
    assert_eq!(h.producer.metrics().blocked.get(), 1);
    assert_eq!(h.producer.metrics().pending.load(Ordering::Relaxed), 0);
    h.cancel.cancel();
}

#[tokio::test]
async fn test_blocked_sink_without_discard_fails() {
    let mut strict = Probe::new(&["app"]);
    strict.ack = false;
    strict.capacity = 1;
    let h = harness(vec![Arc::new(strict)]);

    h.input.try_send(message("app", 1)).unwrap();
    wait_until(|| h.producer.snapshot().sinks.first().is_some_and(|s| s.1.len == 1)).await;
    h.input.try_send(message("app", 2)).unwrap();

    wait_until(|| h.producer.metrics().recycled.get() == 1).await;
    assert!(h.commits.try_recv().is_none());
    h.cancel.cancel();
}
