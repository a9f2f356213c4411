//! Tests for the concat stage

use std::collections::BTreeMap;

use sluice_config::ConcatTagConfig;
use sluice_protocol::{Payload, Value};
use tokio::time::timeout;

use super::*;

fn config(n_workers: usize, max_len: usize) -> ConcatConfig {
    let mut tags = BTreeMap::new();
    tags.insert(
        "app".to_string(),
        ConcatTagConfig {
            msg_key: "log".into(),
            identifier: "container_id".into(),
            head_pattern: "^START:".into(),
        },
    );
    ConcatConfig {
        n_workers,
        max_len,
        lb_key: "container_id".into(),
        tags,
    }
}

struct Harness {
    input: Arc<Inlet<Message>>,
    output: Outlet<Message>,
    commits: Outlet<Message>,
    cancel: CancellationToken,
    metrics: Arc<ConcatMetrics>,
}

fn spawn(config: &ConcatConfig, downstream_size: usize) -> Harness {
    let stage = ConcatStage::new(config).unwrap();
    let (downstream, output) = inlet("downstream", downstream_size);
    let (wait_commit, commits) = inlet("commit", 64);
    let ctx = StageContext {
        pool: Arc::new(MessagePool::new(64)),
        wait_commit,
        internal_size: 64,
    };
    let cancel = CancellationToken::new();
    let input = stage.spawn(cancel.clone(), "app", downstream, &ctx).unwrap();
    Harness {
        input,
        output,
        commits,
        cancel,
        metrics: stage.metrics(),
    }
}

fn line(id: i64, text: &str) -> Message {
    let mut payload = Payload::new();
    payload.insert("container_id", "c1");
    payload.insert("log", text);
    Message::new("app", payload).with_id(id)
}

fn content(msg: &Message) -> &str {
    msg.payload.get("log").and_then(Value::as_str).unwrap()
}

async fn recv(rx: &Outlet<Message>) -> Message {
    timeout(Duration::from_secs(30), rx.recv())
        .await
        .expect("timed out")
        .expect("closed")
}

#[tokio::test(start_paused = true)]
async fn test_start_pattern_end_to_end() {
    let h = spawn(&config(1, 100_000), 16);
    for (id, text) in [(1, "START:a"), (2, "b"), (3, "c"), (4, "START:d")] {
        h.input.try_send(line(id, text)).unwrap();
    }

    let first = recv(&h.output).await;
    assert_eq!(content(&first), "START:a\nb\nc");
    assert_eq!(first.id, 1);
    assert_eq!(first.extra_ids, vec![2, 3]);

    let committed = vec![recv(&h.commits).await.id, recv(&h.commits).await.id];
    assert_eq!(committed, vec![2, 3]);

    let started = Instant::now();
    let second = recv(&h.output).await;
    assert_eq!(content(&second), "START:d");
    assert_eq!(second.id, 4);
    assert!(started.elapsed() >= CONCAT_TIMEOUT);

    let snapshot = h.metrics.snapshot();
    assert_eq!(snapshot.received, 4);
    assert_eq!(snapshot.absorbed, 2);
    assert_eq!(snapshot.flushed_next_head, 1);
    assert_eq!(snapshot.flushed_timeout, 1);
    h.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_idle_record_flushes_after_timeout() {
    let h = spawn(&config(1, 100_000), 16);
    let started = Instant::now();
    h.input.try_send(line(1, "START:alone")).unwrap();

    let msg = recv(&h.output).await;
    assert_eq!(content(&msg), "START:alone");
    assert!(started.elapsed() > CONCAT_TIMEOUT);
    assert!(started.elapsed() < CONCAT_TIMEOUT + Duration::from_millis(100));
    h.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_max_len_flushes_immediately() {
    let h = spawn(&config(1, 16), 16);
    let started = Instant::now();
    for (id, text) in [(1, "START:0123"), (2, "456789")] {
        h.input.try_send(line(id, text)).unwrap();
    }

    let msg = recv(&h.output).await;
    assert_eq!(content(&msg), "START:0123\n456789");
    assert_eq!(msg.extra_ids, vec![2]);
    assert!(started.elapsed() < CONCAT_TIMEOUT);
    assert_eq!(h.metrics.snapshot().flushed_max_len, 1);
    h.cancel.cancel();
}

#[tokio::test]
async fn test_balanced_workers_keep_streams_together() {
    let h = spawn(&config(3, 100_000), 16);
    for (id, text) in [(1, "START:a"), (2, "b"), (3, "START:c")] {
        h.input.try_send(line(id, text)).unwrap();
    }

    let msg = recv(&h.output).await;
    assert_eq!(content(&msg), "START:a\nb");
    h.cancel.cancel();
}

#[tokio::test]
async fn test_cancel_flushes_pending() {
    let h = spawn(&config(1, 100_000), 16);
    h.input.try_send(line(1, "START:a")).unwrap();
    h.input.try_send(line(2, "b")).unwrap();
    assert_eq!(recv(&h.commits).await.id, 2);

    h.cancel.cancel();
    let msg = recv(&h.output).await;
    assert_eq!(content(&msg), "START:a\nb");
    assert_eq!(h.metrics.snapshot().flushed_shutdown, 1);
}

#[tokio::test]
async fn test_cancel_joins_lines_still_queued() {
    let h = spawn(&config(1, 100_000), 16);
    for (id, text) in [(1, "START:a"), (2, "b"), (3, "START:c")] {
        h.input.try_send(line(id, text)).unwrap();
    }
    h.cancel.cancel();

    let first = recv(&h.output).await;
    assert_eq!(content(&first), "START:a\nb");
    assert_eq!(first.extra_ids, vec![2]);
    let second = recv(&h.output).await;
    assert_eq!(content(&second), "START:c");

    let snapshot = h.metrics.snapshot();
    assert_eq!(snapshot.received, 3);
    assert_eq!(snapshot.flushed_shutdown, 1);
}

#[tokio::test]
async fn test_full_downstream_drops_without_commit() {
    let h = spawn(&config(1, 100_000), 1);
    for (id, text) in [(1, "x"), (2, "y")] {
        h.input.try_send(line(id, text)).unwrap();
    }

    timeout(Duration::from_secs(2), async {
        while h.metrics.snapshot().dropped == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(recv(&h.output).await.id, 1);
    assert!(h.commits.try_recv().is_none());
    h.cancel.cancel();
}

#[test]
fn test_invalid_configuration() {
    let mut bad = config(1, 100_000);
    bad.tags.get_mut("app").unwrap().head_pattern = "(unclosed".into();
    assert!(matches!(
        ConcatStage::new(&bad),
        Err(TransformError::InvalidPattern { tag, .. }) if tag == "app"
    ));

    assert!(matches!(
        ConcatStage::new(&config(1, 0)),
        Err(TransformError::Config(_))
    ));
    assert!(matches!(
        ConcatStage::new(&config(0, 100_000)),
        Err(TransformError::Config(_))
    ));
}

#[tokio::test]
async fn test_unsupported_tag() {
    let stage = ConcatStage::new(&config(1, 100_000)).unwrap();
    assert!(stage.is_tag_supported("app"));
    assert!(!stage.is_tag_supported("other"));

    let (downstream, _rx) = inlet("downstream", 4);
    let (wait_commit, _commits) = inlet("commit", 4);
    let ctx = StageContext {
        pool: Arc::new(MessagePool::new(4)),
        wait_commit,
        internal_size: 4,
    };
    let err = stage
        .spawn(CancellationToken::new(), "other", downstream, &ctx)
        .unwrap_err();
    assert!(matches!(err, TransformError::UnsupportedTag { .. }));
}
