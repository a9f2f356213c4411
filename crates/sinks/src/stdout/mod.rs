//! Stdout sink - JSON lines for local runs and debugging
//!
//! Each delivery becomes one line:
//!
//! ```text
//! {"tag":"app.sit","id":42,"payload":{"log":"started","msgid":"9f3c…-42"}}
//! ```

use std::sync::Arc;

use sluice_config::StdoutSinkConfig;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::batch::{BatchSender, BatchSenderConfig, BatchWrite};
use crate::common::Result;
use crate::delivery::Delivery;

/// Stdout sender type
pub type StdoutSender = BatchSender<JsonLinesWriter<tokio::io::Stdout>>;

/// Build a stdout sender from its configuration section
pub fn stdout_sender(name: &str, config: &StdoutSinkConfig) -> StdoutSender {
    BatchSender::new(
        BatchSenderConfig {
            name: name.to_string(),
            tags: config.tags.clone(),
            discard_when_blocked: config.discard_when_blocked,
            queue_size: config.queue_size,
            batch_size: config.batch_size,
            max_wait: config.max_wait,
            ..Default::default()
        },
        JsonLinesWriter::new(tokio::io::stdout()),
    )
}

/// Writes each batch as newline-delimited JSON
pub struct JsonLinesWriter<O> {
    out: O,
    buf: Vec<u8>,
}

impl<O: AsyncWrite + Unpin + Send + 'static> JsonLinesWriter<O> {
    pub fn new(out: O) -> Self {
        Self {
            out,
            buf: Vec::with_capacity(4096),
        }
    }

    pub fn get_ref(&self) -> &O {
        &self.out
    }

    fn encode(&mut self, batch: &[Arc<Delivery>]) -> Result<()> {
        self.buf.clear();
        for delivery in batch {
            let msg = delivery.message();
            let line = serde_json::json!({
                "tag": msg.tag,
                "id": msg.id,
                "payload": msg.payload.to_json(),
            });
            serde_json::to_writer(&mut self.buf, &line)?;
            self.buf.push(b'\n');
        }
        Ok(())
    }
}

impl<O: AsyncWrite + Unpin + Send + 'static> BatchWrite for JsonLinesWriter<O> {
    async fn write(&mut self, batch: &[Arc<Delivery>]) -> Result<()> {
        self.encode(batch)?;
        self.out.write_all(&self.buf).await?;
        self.out.flush().await?;
        Ok(())
    }
}
