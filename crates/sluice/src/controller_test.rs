use std::time::Duration;

use sluice_config::SinksConfig;
use sluice_protocol::{Message, Payload};
use tempfile::TempDir;

use super::*;

fn config(tmp: &TempDir, sink_fails: bool) -> Config {
    let toml = format!(
        r#"
[global]
pool_size = 16
heartbeat_interval = "0s"
shutdown_timeout = "2s"

[metrics]
enabled = false

[sinks.blackhole]
type = "null"
fail = {sink_fails}
"#
    );
    let mut config: Config = toml.parse().unwrap();
    config.journal.dir = tmp.path().join("journal");
    config.journal.flush_interval = Duration::from_millis(20);
    config.journal.legacy_interval = Duration::from_millis(50);
    config.journal.legacy_retry_interval = Duration::from_millis(10);
    config
}

fn message(line: &str) -> Message {
    let mut payload = Payload::new();
    payload.insert("log", line);
    Message::new("app", payload)
}

fn counter(controller: &Controller, component: &str, field: &str) -> u64 {
    controller
        .registry
        .get(component)
        .and_then(|v| v.get(field).and_then(serde_json::Value::as_u64))
        .unwrap_or(0)
}

async fn wait_for(controller: &Controller, component: &str, field: &str, expected: u64) {
    let reached = tokio::time::timeout(Duration::from_secs(5), async {
        while counter(controller, component, field) < expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "{component}.{field} never reached {expected}");
}

#[tokio::test]
async fn test_delivered_message_is_committed() {
    let tmp = TempDir::new().unwrap();
    let controller = Controller::start(config(&tmp, false)).unwrap();

    controller.intake().send_sync(message("hello")).await.unwrap();

    wait_for(&controller, "producer", "committed", 1).await;
    wait_for(&controller, "journal", "committed", 1).await;
    assert_eq!(counter(&controller, "journal", "written"), 1);
    assert_eq!(counter(&controller, "producer", "recycled"), 0);

    controller.shutdown().await;
}

#[tokio::test]
async fn test_failed_delivery_is_replayed_after_restart() {
    let tmp = TempDir::new().unwrap();

    let controller = Controller::start(config(&tmp, true)).unwrap();
    controller.intake().send_sync(message("retry me")).await.unwrap();
    wait_for(&controller, "producer", "recycled", 1).await;
    assert_eq!(counter(&controller, "journal", "committed"), 0);
    controller.shutdown().await;

    let controller = Controller::start(config(&tmp, false)).unwrap();
    // ids continue after the highest journaled one
    let next_id = controller.intake().snapshot().next_id;
    assert_eq!(next_id, 2);

    wait_for(&controller, "journal", "replayed", 1).await;
    wait_for(&controller, "producer", "committed", 1).await;
    controller.shutdown().await;
}

#[tokio::test]
async fn test_replayed_message_outlives_repeated_failures() {
    let tmp = TempDir::new().unwrap();

    let controller = Controller::start(config(&tmp, true)).unwrap();
    controller.intake().send_sync(message("stubborn")).await.unwrap();
    wait_for(&controller, "producer", "recycled", 1).await;
    controller.shutdown().await;

    // replayed once more and failed again
    let controller = Controller::start(config(&tmp, true)).unwrap();
    wait_for(&controller, "journal", "replayed", 1).await;
    wait_for(&controller, "producer", "recycled", 1).await;
    assert_eq!(counter(&controller, "journal", "committed"), 0);
    controller.shutdown().await;

    let controller = Controller::start(config(&tmp, false)).unwrap();
    assert_eq!(controller.intake().snapshot().next_id, 2);
    wait_for(&controller, "journal", "replayed", 1).await;
    wait_for(&controller, "producer", "committed", 1).await;
    controller.shutdown().await;
}

#[tokio::test]
async fn test_without_sinks_messages_are_committed_as_unsupported() {
    let tmp = TempDir::new().unwrap();
    let mut config = config(&tmp, false);
    config.sinks = SinksConfig::default();

    let controller = Controller::start(config).unwrap();
    controller.intake().send_sync(message("nowhere")).await.unwrap();

    wait_for(&controller, "producer", "unsupported", 1).await;
    wait_for(&controller, "journal", "committed", 1).await;
    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_stops_on_cancel() {
    let cancel = CancellationToken::new();
    let task = tokio::spawn(heartbeat(Duration::from_secs(1), cancel.clone()));

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(!task.is_finished());

    cancel.cancel();
    task.await.unwrap();

    // zero interval disables the heartbeat
    heartbeat(Duration::ZERO, CancellationToken::new()).await;
}
