//! Configuration validation
//!
//! Validates config consistency at startup so the process never runs with a
//! partially valid config:
//! - Sizes and worker counts are positive
//! - `remove_unsupported_tag` has a non-empty `accept_tags`
//! - Concatenation patterns compile and `max_len` is positive
//! - Tag rewriters have both fields

use regex::Regex;

use crate::Config;
use crate::error::{ConfigError, Result};
use crate::sinks::SinkConfig;

/// Validate the entire configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_journal(config)?;
    validate_workers(config)?;
    validate_acceptor_filters(config)?;
    validate_stages(config)?;
    validate_post_filters(config)?;
    validate_sinks(config)?;
    Ok(())
}

fn validate_journal(config: &Config) -> Result<()> {
    let journal = &config.journal;
    if journal.dir.as_os_str().is_empty() {
        return Err(ConfigError::missing_field("journal", "journal", "dir"));
    }
    if journal.max_write_retries == 0 {
        return Err(ConfigError::invalid_value(
            "journal",
            "journal",
            "max_write_retries",
            "must be at least 1",
        ));
    }
    Ok(())
}

fn validate_workers(config: &Config) -> Result<()> {
    let checks: [(&'static str, usize); 4] = [
        ("acceptor_filters", config.acceptor_filters.n_workers),
        ("dispatcher", config.dispatcher.n_workers),
        ("post_filters", config.post_filters.n_workers),
        ("producer", config.producer.n_workers),
    ];
    for (component, n) in checks {
        if n == 0 {
            return Err(ConfigError::invalid_value(
                component,
                component,
                "n_workers",
                "must be at least 1",
            ));
        }
    }
    if config.acceptor.max_rotate_id <= 0 {
        return Err(ConfigError::invalid_value(
            "acceptor",
            "acceptor",
            "max_rotate_id",
            "must be positive",
        ));
    }
    if config.acceptor.max_rotate_id < 1_000_000 {
        tracing::warn!(
            max_rotate_id = config.acceptor.max_rotate_id,
            "max_rotate_id is small, ids will wrap quickly"
        );
    }
    Ok(())
}

fn validate_acceptor_filters(config: &Config) -> Result<()> {
    let default = &config.acceptor_filters.default;
    if default.remove_unsupported_tag && default.accept_tags.is_empty() {
        return Err(ConfigError::invalid_value(
            "acceptor_filter",
            "default",
            "accept_tags",
            "cannot be empty when remove_unsupported_tag is set",
        ));
    }
    Ok(())
}

fn validate_stages(config: &Config) -> Result<()> {
    let Some(concat) = &config.tag_stages.concat else {
        return Ok(());
    };

    if concat.max_len == 0 {
        return Err(ConfigError::invalid_value(
            "concat",
            "concat",
            "max_len",
            "must be greater than 0",
        ));
    }
    if concat.max_len < 10_000 {
        tracing::warn!(max_len = concat.max_len, "concat max_len may be too short");
    }
    if concat.n_workers == 0 {
        return Err(ConfigError::invalid_value(
            "concat",
            "concat",
            "n_workers",
            "must be at least 1",
        ));
    }

    for (tag, rule) in &concat.tags {
        if rule.head_pattern.is_empty() {
            return Err(ConfigError::missing_field("concat", tag, "head_pattern"));
        }
        if rule.msg_key.is_empty() {
            return Err(ConfigError::missing_field("concat", tag, "msg_key"));
        }
        if rule.identifier.is_empty() {
            return Err(ConfigError::missing_field("concat", tag, "identifier"));
        }
        Regex::new(&rule.head_pattern)
            .map_err(|e| ConfigError::invalid_pattern("concat", tag, &rule.head_pattern, e))?;
    }
    Ok(())
}

fn validate_post_filters(config: &Config) -> Result<()> {
    for rewriter in &config.post_filters.tag_rewriters {
        if rewriter.tag.is_empty() {
            return Err(ConfigError::missing_field("tag_rewriter", "", "tag"));
        }
        if rewriter.tag_key.is_empty() {
            return Err(ConfigError::missing_field(
                "tag_rewriter",
                &rewriter.tag,
                "tag_key",
            ));
        }
    }
    Ok(())
}

fn validate_sinks(config: &Config) -> Result<()> {
    for (name, sink) in config.sinks.iter() {
        match sink {
            SinkConfig::Stdout(c) => {
                if c.batch_size == 0 {
                    return Err(ConfigError::invalid_value(
                        "sink",
                        name,
                        "batch_size",
                        "must be at least 1",
                    ));
                }
                if c.queue_size == 0 {
                    return Err(ConfigError::invalid_value(
                        "sink",
                        name,
                        "queue_size",
                        "must be at least 1",
                    ));
                }
            }
            SinkConfig::Null(c) => {
                if c.queue_size == 0 {
                    return Err(ConfigError::invalid_value(
                        "sink",
                        name,
                        "queue_size",
                        "must be at least 1",
                    ));
                }
            }
        }
    }
    Ok(())
}
