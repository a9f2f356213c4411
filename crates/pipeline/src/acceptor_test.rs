use std::sync::Arc;

use sluice_config::AcceptorConfig;
use sluice_protocol::{Message, MessagePool, Payload};

use crate::acceptor::{IdGenerator, Intake};
use crate::error::PipelineError;

fn config(sync_out_size: usize, async_out_size: usize) -> AcceptorConfig {
    AcceptorConfig {
        sync_out_size,
        async_out_size,
        max_rotate_id: 10,
    }
}

fn message(tag: &str) -> Message {
    let mut payload = Payload::new();
    payload.insert("log", "line");
    Message::new(tag, payload)
}

#[test]
fn test_ids_start_after_journal_max() {
    assert_eq!(IdGenerator::new(0, 10).peek(), 1);
    assert_eq!(IdGenerator::new(4, 10).peek(), 5);
    // journal max at the top of the range wraps to zero
    assert_eq!(IdGenerator::new(9, 10).peek(), 0);
}

#[test]
fn test_ids_wrap_at_max_rotate_id() {
    let ids = IdGenerator::new(7, 10);
    let taken: Vec<i64> = (0..4).map(|_| ids.next_id()).collect();
    assert_eq!(taken, vec![8, 9, 0, 1]);
    assert_eq!(ids.peek(), 2);
}

#[tokio::test]
async fn test_send_sync_stamps_ids() {
    let pool = Arc::new(MessagePool::new(8));
    let (intake, streams) = Intake::new(&config(4, 4), pool, 2);

    intake.send_sync(message("app")).await.unwrap();
    intake.send_sync(message("app")).await.unwrap();

    let first = streams.sync_rx.try_recv().unwrap();
    let second = streams.sync_rx.try_recv().unwrap();
    assert_eq!((first.id, second.id), (3, 4));
    assert!(streams.async_rx.try_recv().is_none());
    assert_eq!(intake.snapshot().received.total, 2);
}

#[tokio::test]
async fn test_send_sync_fails_once_closed() {
    let pool = Arc::new(MessagePool::new(8));
    let (intake, streams) = Intake::new(&config(4, 4), pool, 0);
    drop(streams);

    let err = intake.send_sync(message("app")).await.unwrap_err();
    assert!(matches!(err, PipelineError::Closed(name) if name == "acceptor.sync"));
}

#[test]
fn test_send_async_drops_when_full() {
    let pool = Arc::new(MessagePool::new(8));
    let (intake, streams) = Intake::new(&config(4, 1), Arc::clone(&pool), 0);
    let pooled = pool.available();

    assert!(intake.send_async(message("app")));
    assert!(!intake.send_async(message("app")));

    let snapshot = intake.snapshot();
    assert_eq!(snapshot.dropped, 1);
    assert_eq!(snapshot.async_out.len, 1);
    assert_eq!(pool.available(), pooled + 1);

    // the dropped message still consumed an id
    assert_eq!(streams.async_rx.try_recv().unwrap().id, 1);
    assert_eq!(snapshot.next_id, 3);
}
