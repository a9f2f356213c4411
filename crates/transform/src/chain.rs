//! Filter chain - sequential per-message filtering
//!
//! # Design
//!
//! - **Ordered**: filters run in the order they were added
//! - **Short-circuit**: a filter that consumes the message ends the chain
//! - **Tag-scoped**: filters that do not support a tag are skipped

use std::sync::Arc;

use sluice_protocol::Message;

use crate::{Filter, FilterContext};

#[cfg(test)]
#[path = "chain_test.rs"]
mod tests;

/// Filters applied one after another to each message
#[derive(Clone, Default)]
pub struct FilterChain {
    filters: Vec<Arc<dyn Filter>>,
}

impl FilterChain {
    pub fn new(filters: Vec<Arc<dyn Filter>>) -> Self {
        Self { filters }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Append a filter at the end of the chain
    pub fn push(&mut self, filter: Arc<dyn Filter>) {
        self.filters.push(filter);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    /// Counters of every filter that keeps any, keyed by filter name
    pub fn metrics(&self) -> serde_json::Value {
        let map = self
            .filters
            .iter()
            .filter_map(|f| f.metrics().map(|m| (f.name().to_string(), m)))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }

    /// Run `msg` through every filter supporting its tag.
    ///
    /// Returns `None` as soon as a filter consumes the message.
    pub fn apply(&self, msg: Message, ctx: &FilterContext) -> Option<Message> {
        let mut current = msg;
        for filter in &self.filters {
            if !filter.is_tag_supported(&current.tag) {
                continue;
            }
            current = filter.filter(current, ctx)?;
        }
        Some(current)
    }
}

impl std::fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterChain")
            .field("filters", &self.names())
            .finish()
    }
}
