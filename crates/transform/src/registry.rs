//! Build filter chains and tag stages from configuration
//!
//! Order is fixed here:
//!
//! - acceptor chain: `default`
//! - post chain: every tag rewriter in declaration order, then `normalize`
//! - tag stages: `concat`
//!
//! Every constructor validates its section; a bad regex or an inconsistent
//! option aborts startup.

use std::sync::Arc;

use sluice_config::{AcceptorFiltersConfig, PostFiltersConfig, TagStagesConfig};
use tracing::info;

use crate::{
    ConcatStage, DefaultFilter, FieldNormalizer, Filter, FilterChain, Result, TagRewriter, TagStage,
};

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;

/// Filters between intake and the journal
pub fn acceptor_filters(config: &AcceptorFiltersConfig) -> Result<FilterChain> {
    let default: Arc<dyn Filter> = Arc::new(DefaultFilter::new(&config.default)?);
    let chain = FilterChain::new(vec![default]);
    info!(filters = ?chain.names(), "acceptor filters ready");
    Ok(chain)
}

/// Filters between the tag pipelines and the producer
pub fn post_filters(config: &PostFiltersConfig) -> FilterChain {
    let mut chain = FilterChain::empty();
    for rewriter in &config.tag_rewriters {
        chain.push(Arc::new(TagRewriter::new(rewriter)));
    }
    if config.normalize_fields {
        chain.push(Arc::new(FieldNormalizer::new(config.message_key.as_str())));
    }
    info!(filters = ?chain.names(), "post filters ready");
    chain
}

/// Per-tag stages in configuration order
pub fn tag_stages(config: &TagStagesConfig) -> Result<Vec<Arc<dyn TagStage>>> {
    let mut stages: Vec<Arc<dyn TagStage>> = Vec::new();
    if let Some(concat) = &config.concat {
        stages.push(Arc::new(ConcatStage::new(concat)?));
    }
    info!(
        stages = ?stages.iter().map(|s| s.name()).collect::<Vec<_>>(),
        "tag stages ready"
    );
    Ok(stages)
}
