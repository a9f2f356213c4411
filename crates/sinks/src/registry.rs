//! Sender construction from configuration

use std::sync::Arc;

use sluice_config::{SinkConfig, SinksConfig};
use tracing::info;

use crate::Sender;
use crate::common::{Result, SinkError};
use crate::null::NullSender;
use crate::stdout::stdout_sender;

/// Build every enabled sink, ordered by name
pub fn build_senders(config: &SinksConfig) -> Result<Vec<Arc<dyn Sender>>> {
    let mut entries: Vec<(&String, &SinkConfig)> = config.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    let mut senders: Vec<Arc<dyn Sender>> = Vec::with_capacity(entries.len());
    for (name, sink) in entries {
        if !sink.is_enabled() {
            info!(sink = %name, "sink disabled");
            continue;
        }
        let sender: Arc<dyn Sender> = match sink {
            SinkConfig::Stdout(c) => {
                if c.batch_size == 0 {
                    return Err(SinkError::config(name, "batch_size must be at least 1"));
                }
                Arc::new(stdout_sender(name, c))
            }
            SinkConfig::Null(c) => Arc::new(NullSender::new(name, c)),
        };
        info!(sink = %name, kind = sink.type_name(), tags = ?sink.tags(), "sink enabled");
        senders.push(sender);
    }
    Ok(senders)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sinks(toml: &str) -> SinksConfig {
        toml::from_str(toml).unwrap()
    }

    #[test]
    fn test_builds_enabled_sinks_in_name_order() {
        let config = sinks(
            r#"
            [zeta]
            type = "null"

            [alpha]
            type = "stdout"
            tags = ["app"]

            [off]
            type = "null"
            enabled = false
            "#,
        );
        let senders = build_senders(&config).unwrap();
        let names: Vec<&str> = senders.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert!(senders[0].is_tag_supported("app"));
        assert!(!senders[0].is_tag_supported("other"));
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let config = sinks(
            r#"
            [console]
            type = "stdout"
            batch_size = 0
            "#,
        );
        let err = build_senders(&config).err().unwrap();
        assert!(err.to_string().contains("console"));
    }
}
