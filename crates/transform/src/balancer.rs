//! Keyed load balancing across stage workers
//!
//! Stateful stages must see every message of one stream on the same worker.
//! Messages are routed by `xxh3(field) mod N`; a missing or non-text field
//! hashes the empty string, so such messages share one stable worker.

use std::sync::Arc;

use sluice_protocol::{Inlet, Message, MessagePool, Outlet, inlet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use xxhash_rust::xxh3::xxh3_64;

/// Worker for `msg` among `n` workers, keyed by the `key` field
pub fn worker_index(msg: &Message, key: &str, n: usize) -> usize {
    if n <= 1 {
        return 0;
    }
    let field = msg.text_field(key).unwrap_or_default();
    (xxh3_64(field) % n as u64) as usize
}

/// Start a task routing one inbound channel to `workers`.
///
/// Sends never block; a full worker queue drops the message back to the
/// pool. Returns the inbound inlet.
pub fn spawn_balancer(
    name: &str,
    cancel: CancellationToken,
    key: String,
    workers: Vec<Arc<Inlet<Message>>>,
    pool: Arc<MessagePool>,
    capacity: usize,
) -> Arc<Inlet<Message>> {
    let (tx, rx) = inlet(format!("{name}.lb"), capacity);
    tokio::spawn(run_balancer(cancel, rx, key, workers, pool));
    tx
}

async fn run_balancer(
    cancel: CancellationToken,
    rx: Outlet<Message>,
    key: String,
    workers: Vec<Arc<Inlet<Message>>>,
    pool: Arc<MessagePool>,
) {
    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => break,
            msg = rx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };

        let worker = &workers[worker_index(&msg, &key, workers.len())];
        if let Err(failure) = worker.try_send(msg) {
            let msg = failure.into_inner();
            warn!(tag = %msg.tag, id = msg.id, worker = worker.name(), "stage worker queue full, dropping");
            pool.put(msg);
        }
    }
    debug!(workers = workers.len(), "balancer stopped");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use sluice_protocol::Payload;

    use super::*;

    fn message(container: Option<&str>) -> Message {
        let mut payload = Payload::new();
        if let Some(id) = container {
            payload.insert("container_id", id);
        }
        Message::new("app", payload)
    }

    #[test]
    fn test_index_is_stable_and_in_range() {
        let msg = message(Some("abc"));
        let first = worker_index(&msg, "container_id", 4);
        assert!(first < 4);
        for _ in 0..10 {
            assert_eq!(worker_index(&msg, "container_id", 4), first);
        }
        assert_eq!(worker_index(&msg, "container_id", 1), 0);
    }

    #[test]
    fn test_missing_key_hashes_empty() {
        let expected = (xxh3_64(b"") % 3) as usize;
        assert_eq!(worker_index(&message(None), "container_id", 3), expected);

        let mut numeric = message(None);
        numeric.payload.insert("container_id", 42i64);
        assert_eq!(worker_index(&numeric, "container_id", 3), expected);
    }

    #[tokio::test]
    async fn test_routes_same_key_to_same_worker() {
        let cancel = CancellationToken::new();
        let pool = Arc::new(MessagePool::new(8));
        let (w0, r0) = inlet("w0", 8);
        let (w1, r1) = inlet("w1", 8);
        let tx = spawn_balancer("concat.app", cancel.clone(), "container_id".into(), vec![w0, w1], pool, 8);

        for _ in 0..3 {
            tx.try_send(message(Some("abc"))).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let expected = worker_index(&message(Some("abc")), "container_id", 2);
        let (hit, miss) = if expected == 0 { (&r0, &r1) } else { (&r1, &r0) };
        assert_eq!(hit.len(), 3);
        assert!(miss.is_empty());
        cancel.cancel();
    }
}
