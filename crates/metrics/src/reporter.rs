//! Periodic metrics reporter
//!
//! Takes a registry snapshot at the configured interval and writes it
//! through `tracing`, either one line per component (human) or as a single
//! JSON document.

use std::time::Duration;

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::MetricsRegistry;

/// Output format for reports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReportFormat {
    /// `name: key=value key=value`
    #[default]
    Human,
    /// Whole snapshot as one JSON line
    Json,
}

/// Reporter settings
#[derive(Debug, Clone, Copy)]
pub struct ReporterConfig {
    pub enabled: bool,
    pub interval: Duration,
    pub format: ReportFormat,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(10),
            format: ReportFormat::Human,
        }
    }
}

/// Logs registry snapshots until cancelled
pub struct Reporter {
    config: ReporterConfig,
    registry: MetricsRegistry,
}

impl Reporter {
    pub fn new(config: ReporterConfig, registry: MetricsRegistry) -> Self {
        Self { config, registry }
    }

    /// Run the reporter until cancellation
    pub async fn run(self, cancel: CancellationToken) {
        if !self.config.enabled {
            info!("metrics reporting disabled");
            return;
        }

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // First tick completes immediately
        ticker.tick().await;

        info!(
            interval_secs = self.config.interval.as_secs(),
            format = ?self.config.format,
            "metrics reporter started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    for line in self.render() {
                        info!(target: "sluice::metrics", "{}", line);
                    }
                }
            }
        }
    }

    /// Render the current snapshot as output lines
    pub fn render(&self) -> Vec<String> {
        let snapshot = self.registry.snapshot();
        match self.config.format {
            ReportFormat::Json => vec![snapshot.to_string()],
            ReportFormat::Human => match snapshot {
                serde_json::Value::Object(map) => map
                    .into_iter()
                    .map(|(name, value)| {
                        let mut fields = Vec::new();
                        flatten("", &value, &mut fields);
                        format!("{}: {}", name, fields.join(" "))
                    })
                    .collect(),
                other => vec![other.to_string()],
            },
        }
    }
}

/// Flatten nested objects into `a.b=value` pairs
fn flatten(prefix: &str, value: &serde_json::Value, out: &mut Vec<String>) {
    match value {
        serde_json::Value::Object(map) => {
            for (k, v) in map {
                let key = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{prefix}.{k}")
                };
                flatten(&key, v, out);
            }
        }
        serde_json::Value::Number(n) if n.is_f64() => {
            let f = n.as_f64().unwrap_or_default();
            out.push(format!("{prefix}={f:.1}"));
        }
        other => out.push(format!("{prefix}={other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_render_flattens() {
        let registry = MetricsRegistry::new();
        registry.register("journal", || {
            serde_json::json!({"out": {"len": 1, "capacity": 10}, "rate": 2.5})
        });
        let reporter = Reporter::new(ReporterConfig::default(), registry);

        let lines = reporter.render();
        assert_eq!(lines, vec!["journal: out.capacity=10 out.len=1 rate=2.5"]);
    }

    #[test]
    fn test_json_render_single_line() {
        let registry = MetricsRegistry::new();
        registry.register("a", || serde_json::json!(1));
        let config = ReporterConfig {
            format: ReportFormat::Json,
            ..Default::default()
        };
        let reporter = Reporter::new(config, registry);

        assert_eq!(reporter.render(), vec![r#"{"a":1}"#.to_string()]);
    }

    #[tokio::test]
    async fn test_disabled_returns_immediately() {
        let config = ReporterConfig {
            enabled: false,
            ..Default::default()
        };
        let reporter = Reporter::new(config, MetricsRegistry::new());
        reporter.run(CancellationToken::new()).await;
    }
}
