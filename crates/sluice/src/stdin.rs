//! Stdin JSON-lines receiver
//!
//! Each line is one record, `{"tag": "...", "payload": {...}}`. Lines that
//! do not decode are logged and skipped.

use std::sync::Arc;

use sluice_pipeline::Intake;
use sluice_protocol::Message;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReadStats {
    pub accepted: u64,
    pub invalid: u64,
}

/// Feed every line of `reader` into the intake until EOF or cancel
pub async fn read_json_lines<R>(reader: R, intake: Arc<Intake>, cancel: CancellationToken) -> ReadStats
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut stats = ReadStats::default();

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "stdin read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let msg = match Message::from_json_line(&line) {
            Ok(msg) => msg,
            Err(e) => {
                stats.invalid += 1;
                warn!(error = %e, "skipping invalid stdin record");
                continue;
            }
        };
        if let Err(e) = intake.send_sync(msg).await {
            debug!(error = %e, "intake closed, stdin receiver stopping");
            break;
        }
        stats.accepted += 1;
    }

    debug!(accepted = stats.accepted, invalid = stats.invalid, "stdin receiver stopped");
    stats
}
