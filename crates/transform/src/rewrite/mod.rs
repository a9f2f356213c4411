//! Tag rewriter for forwarded records
//!
//! Records relayed from another collector arrive under one shared tag such
//! as `forward-app.sit` and carry their original `<app>.<env>` tag in a
//! payload field. The rewriter keeps the configured tag's app part and
//! takes the env from that field: `forward-app.sit` + `app.prod` →
//! `forward-app.prod`.

use sluice_config::TagRewriterConfig;
use sluice_protocol::Message;
use tracing::{info, warn};

use crate::{Filter, FilterContext};

pub struct TagRewriter {
    tag: String,
    tag_key: String,
    /// App part of `tag`, before the first `.`
    app: String,
}

impl TagRewriter {
    pub fn new(config: &TagRewriterConfig) -> Self {
        let app = config
            .tag
            .split_once('.')
            .map_or(config.tag.as_str(), |(app, _)| app)
            .to_string();
        info!(tag = %config.tag, tag_key = %config.tag_key, "tag rewriter configured");
        Self {
            tag: config.tag.clone(),
            tag_key: config.tag_key.clone(),
            app,
        }
    }

    /// Env suffix of the original tag, e.g. `prod` in `app.prod`
    fn env<'a>(&self, msg: &'a Message) -> Option<&'a str> {
        let original = msg.payload.get(&self.tag_key)?.as_str()?;
        original.split('.').nth(1).filter(|env| !env.is_empty())
    }
}

impl Filter for TagRewriter {
    fn name(&self) -> &'static str {
        "tag_rewriter"
    }

    fn is_tag_supported(&self, tag: &str) -> bool {
        tag == self.tag
    }

    fn filter(&self, mut msg: Message, ctx: &FilterContext) -> Option<Message> {
        let Some(env) = self.env(&msg) else {
            warn!(
                tag = %msg.tag,
                id = msg.id,
                tag_key = %self.tag_key,
                "forwarded record has no usable original tag, discarding"
            );
            ctx.discard(msg);
            return None;
        };
        let tag = format!("{}.{}", self.app, env);
        msg.tag = tag;
        Some(msg)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sluice_protocol::{MessagePool, Payload, inlet};

    use super::*;

    fn rewriter() -> TagRewriter {
        TagRewriter::new(&TagRewriterConfig {
            tag: "forward-app.sit".into(),
            tag_key: "original_tag".into(),
        })
    }

    fn message(original: Option<&str>) -> Message {
        let mut payload = Payload::new();
        if let Some(tag) = original {
            payload.insert("original_tag", tag);
        }
        Message::new("forward-app.sit", payload).with_id(3)
    }

    #[test]
    fn test_rewrites_env_suffix() {
        let (upstream, _rx) = inlet("reenter", 1);
        let ctx = FilterContext::new(upstream, Arc::new(MessagePool::new(4)));
        let rewriter = rewriter();

        assert!(rewriter.is_tag_supported("forward-app.sit"));
        assert!(!rewriter.is_tag_supported("app.prod"));

        let out = rewriter.filter(message(Some("app.prod")), &ctx).unwrap();
        assert_eq!(out.tag, "forward-app.prod");
    }

    #[test]
    fn test_missing_original_tag_is_committed() {
        let (upstream, _rx) = inlet("reenter", 1);
        let (commit, commit_rx) = inlet("commit", 4);
        let ctx = FilterContext::new(upstream, Arc::new(MessagePool::new(4))).with_wait_commit(commit);
        let rewriter = rewriter();

        assert!(rewriter.filter(message(None), &ctx).is_none());
        assert!(rewriter.filter(message(Some("noenv")), &ctx).is_none());
        assert_eq!(commit_rx.try_recv().unwrap().id, 3);
        assert_eq!(commit_rx.len(), 1);
    }
}
