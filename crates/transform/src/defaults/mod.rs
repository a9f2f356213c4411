//! Default acceptor filter
//!
//! First gate after intake:
//!
//! - drops messages with an empty tag
//! - drops tags outside `accept_tags` when `remove_unsupported_tag` is set
//! - adds per-tag fields rendered from templates (see [`Template`])
//!
//! ```toml
//! [acceptor_filters.default]
//! remove_unsupported_tag = true
//! accept_tags = ["app.prod"]
//!
//! [acceptor_filters.default.add."app.prod"]
//! origin = "%{@tag}-%{host}"
//! ```

mod template;

pub use template::Template;

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use sluice_config::DefaultFilterConfig;
use sluice_metrics::Counter;
use sluice_protocol::Message;
use tracing::{debug, warn};

use crate::{Filter, FilterContext, Result, TransformError};

#[derive(Debug, Default)]
pub struct DefaultFilterMetrics {
    pub empty_tag: Counter,
    pub unsupported_tag: Counter,
    pub fields_added: Counter,
}

#[derive(Debug, Clone, Serialize)]
pub struct DefaultFilterSnapshot {
    pub empty_tag: u64,
    pub unsupported_tag: u64,
    pub fields_added: u64,
}

pub struct DefaultFilter {
    remove_empty_tag: bool,
    /// `Some` when unsupported tags are removed
    accept_tags: Option<HashSet<String>>,
    add: HashMap<String, Vec<(String, Template)>>,
    metrics: DefaultFilterMetrics,
}

impl DefaultFilter {
    pub fn new(config: &DefaultFilterConfig) -> Result<Self> {
        let accept_tags = if config.remove_unsupported_tag {
            if config.accept_tags.is_empty() {
                return Err(TransformError::config(
                    "remove_unsupported_tag requires a non-empty accept_tags",
                ));
            }
            Some(config.accept_tags.iter().cloned().collect())
        } else {
            None
        };

        let add = config
            .add
            .iter()
            .map(|(tag, fields)| {
                let templates = fields
                    .iter()
                    .map(|(field, source)| (field.clone(), Template::parse(source)))
                    .collect();
                (tag.clone(), templates)
            })
            .collect();

        Ok(Self {
            remove_empty_tag: config.remove_empty_tag,
            accept_tags,
            add,
            metrics: DefaultFilterMetrics::default(),
        })
    }

    pub fn snapshot(&self) -> DefaultFilterSnapshot {
        DefaultFilterSnapshot {
            empty_tag: self.metrics.empty_tag.get(),
            unsupported_tag: self.metrics.unsupported_tag.get(),
            fields_added: self.metrics.fields_added.get(),
        }
    }
}

impl Filter for DefaultFilter {
    fn name(&self) -> &'static str {
        "default"
    }

    fn filter(&self, mut msg: Message, ctx: &FilterContext) -> Option<Message> {
        if self.remove_empty_tag && msg.tag.is_empty() {
            self.metrics.empty_tag.inc();
            warn!(id = msg.id, "discarding message with empty tag");
            ctx.discard(msg);
            return None;
        }

        let unsupported = self
            .accept_tags
            .as_ref()
            .is_some_and(|accept| !accept.contains(&msg.tag));
        if unsupported {
            self.metrics.unsupported_tag.inc();
            debug!(tag = %msg.tag, id = msg.id, "discarding unsupported tag");
            ctx.discard(msg);
            return None;
        }

        if let Some(templates) = self.add.get(&msg.tag) {
            for (field, template) in templates {
                let value = template.render(&msg);
                msg.payload.insert(field.as_str(), value);
            }
            self.metrics.fields_added.add(templates.len() as u64);
        }
        Some(msg)
    }

    fn metrics(&self) -> Option<serde_json::Value> {
        serde_json::to_value(self.snapshot()).ok()
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
