//! Per-tag stage chains
//!
//! A [`TagPipeline`] holds the configured stage factories and builds the
//! chain for one tag on demand. Stages are spawned last to first, each one
//! writing into the inlet of the stage after it; the returned inlet is the
//! head of the chain. A tag no stage supports gets the downstream inlet back
//! unchanged.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use sluice_metrics::ChannelStats;
use sluice_protocol::{Inlet, Message};
use sluice_transform::{StageContext, TagStage};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::Result;

#[derive(Debug, Clone, Serialize)]
pub struct TagPipelineSnapshot {
    /// Inbound channel of every live `<tag>.<stage>`
    pub channels: Vec<(String, ChannelStats)>,
    pub stages: serde_json::Value,
}

pub struct TagPipeline {
    stages: Vec<Arc<dyn TagStage>>,
    ctx: StageContext,
    channels: DashMap<String, Arc<Inlet<Message>>>,
}

impl TagPipeline {
    pub fn new(stages: Vec<Arc<dyn TagStage>>, ctx: StageContext) -> Self {
        Self {
            stages,
            ctx,
            channels: DashMap::new(),
        }
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Build the chain for `tag` in front of `downstream`
    pub fn spawn(
        &self,
        cancel: &CancellationToken,
        tag: &str,
        downstream: Arc<Inlet<Message>>,
    ) -> Result<Arc<Inlet<Message>>> {
        let mut next = downstream;
        for stage in self.stages.iter().rev() {
            if !stage.is_tag_supported(tag) {
                continue;
            }
            next = stage.spawn(cancel.clone(), tag, next, &self.ctx)?;
            self.channels
                .insert(format!("{tag}.{}", stage.name()), Arc::clone(&next));
            debug!(tag, stage = stage.name(), "tag stage started");
        }
        Ok(next)
    }

    /// Drop the channel records of a stopped tag
    pub fn forget(&self, tag: &str) {
        let prefix = format!("{tag}.");
        self.channels.retain(|name, _| {
            !name
                .strip_prefix(&prefix)
                .is_some_and(|stage| self.stages.iter().any(|s| s.name() == stage))
        });
    }

    pub fn snapshot(&self) -> TagPipelineSnapshot {
        let mut channels: Vec<(String, ChannelStats)> = self
            .channels
            .iter()
            .map(|e| {
                let inlet = e.value();
                (e.key().clone(), ChannelStats::new(inlet.len(), inlet.capacity()))
            })
            .collect();
        channels.sort_by(|a, b| a.0.cmp(&b.0));

        let stages = self
            .stages
            .iter()
            .filter_map(|s| s.metrics().map(|m| (s.name().to_string(), m)))
            .collect::<serde_json::Map<_, _>>();
        TagPipelineSnapshot {
            channels,
            stages: serde_json::Value::Object(stages),
        }
    }
}
