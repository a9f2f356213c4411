//! Tests for common sender types

use crate::{SinkError, SinkMetrics};

#[test]
fn test_metrics_batch_written() {
    let metrics = SinkMetrics::new();

    metrics.batch_written(100);
    metrics.batch_written(20);
    metrics.failed.add(3);

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.batches_written, 2);
    assert_eq!(snapshot.succeeded, 120);
    assert_eq!(snapshot.failed, 3);
    assert_eq!(snapshot.write_errors, 0);
}

#[test]
fn test_error_display() {
    let err = SinkError::write("broken pipe");
    assert_eq!(err.to_string(), "write failed: broken pipe");

    let err = SinkError::config("es", "batch_size must be at least 1");
    assert_eq!(
        err.to_string(),
        "configuration error for sink es: batch_size must be at least 1"
    );

    let err = SinkError::RetriesExhausted {
        attempts: 3,
        last_error: "timeout".into(),
    };
    assert!(err.to_string().contains("3 write attempts"));
}

#[test]
fn test_error_from_io() {
    let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed");
    let err: SinkError = io.into();
    assert!(matches!(err, SinkError::Io(_)));
}
