use std::sync::Arc;
use std::time::Duration;

use sluice_protocol::{Inlet, Message, MessagePool, Payload, Value, inlet};
use sluice_transform::{StageContext, TagStage};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::tag_pipeline::TagPipeline;

/// Appends its name to the `path` field
struct Mark(&'static str, &'static str);

impl TagStage for Mark {
    fn name(&self) -> &'static str {
        self.0
    }

    fn is_tag_supported(&self, tag: &str) -> bool {
        tag == self.1
    }

    fn spawn(
        &self,
        cancel: CancellationToken,
        tag: &str,
        downstream: Arc<Inlet<Message>>,
        ctx: &StageContext,
    ) -> sluice_transform::Result<Arc<Inlet<Message>>> {
        let (tx, rx) = inlet(format!("{tag}.{}", self.0), ctx.internal_size);
        let name = self.0;
        tokio::spawn(async move {
            loop {
                let mut msg: Message = tokio::select! {
                    _ = cancel.cancelled() => break,
                    Some(msg) = rx.recv() => msg,
                };
                let path = msg
                    .payload
                    .get("path")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                msg.payload.insert("path", format!("{path}{name}"));
                if downstream.send(msg).await.is_err() {
                    break;
                }
            }
        });
        Ok(tx)
    }
}

fn pipeline(stages: Vec<Arc<dyn TagStage>>) -> TagPipeline {
    let (wait_commit, _commits) = inlet("commit", 8);
    let ctx = StageContext {
        pool: Arc::new(MessagePool::new(8)),
        wait_commit,
        internal_size: 8,
    };
    TagPipeline::new(stages, ctx)
}

#[tokio::test]
async fn test_unsupported_tag_passes_through() {
    let pipeline = pipeline(vec![Arc::new(Mark("a", "app"))]);
    let (downstream, _rx) = inlet::<Message>("out", 8);
    let cancel = CancellationToken::new();

    let head = pipeline.spawn(&cancel, "other", Arc::clone(&downstream)).unwrap();
    assert!(Arc::ptr_eq(&head, &downstream));
    assert!(pipeline.snapshot().channels.is_empty());
}

#[tokio::test]
async fn test_stages_run_in_configured_order() {
    let pipeline = pipeline(vec![
        Arc::new(Mark("a", "app")),
        Arc::new(Mark("b", "other")),
        Arc::new(Mark("c", "app")),
    ]);
    let (downstream, rx) = inlet("out", 8);
    let cancel = CancellationToken::new();

    let head = pipeline.spawn(&cancel, "app", downstream).unwrap();
    head.try_send(Message::new("app", Payload::new())).unwrap();

    let out = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
    assert_eq!(out.payload.get("path"), Some(&Value::from("ac")));

    let names: Vec<String> = pipeline.snapshot().channels.into_iter().map(|c| c.0).collect();
    assert_eq!(names, vec!["app.a", "app.c"]);

    pipeline.forget("app");
    assert!(pipeline.snapshot().channels.is_empty());
    cancel.cancel();
}
