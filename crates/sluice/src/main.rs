//! sluice - journaled log aggregation pipeline
//!
//! # Usage
//!
//! ```bash
//! # Run with defaults (stdin JSON lines, no sinks)
//! sluice
//! sluice --config configs/sluice.toml
//!
//! # Feed records on stdin
//! echo '{"tag":"app","payload":{"log":"hello"}}' | sluice -c configs/sluice.toml
//! ```

mod controller;
mod stdin;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use sluice_config::{Config, LogFormat};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// sluice - journaled log aggregation pipeline
#[derive(Parser, Debug)]
#[command(name = "sluice")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (error if specified but not found)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). Overrides config file.
    #[arg(short, long)]
    log_level: Option<String>,

    /// Do not read JSON lines from stdin
    #[arg(long)]
    no_stdin: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    let log_level = resolve_log_level(cli.log_level.as_deref(), &config);
    init_logging(&log_level, config.log.format)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        platform = std::env::consts::OS,
        config = %cli.config.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "(default)".into()),
        "sluice starting"
    );

    if let Err(e) = controller::run(config, !cli.no_stdin).await {
        error!(error = %e, "sluice stopped with error");
        return Err(e);
    }

    info!("sluice shutdown complete");
    Ok(())
}

/// Load the config file, or defaults when none is given
fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => {
            if !path.exists() {
                return Err(anyhow::anyhow!("config file not found: {}", path.display()));
            }
            Config::from_file(path).context("failed to load configuration")
        }
        None => Ok(Config::default()),
    }
}

/// Resolve log level: CLI flag > config file > default "info"
fn resolve_log_level(cli_level: Option<&str>, config: &Config) -> String {
    match cli_level {
        Some(level) => level.to_string(),
        None => config.log.level.as_str().to_string(),
    }
}

/// Initialize the tracing subscriber for logging
fn init_logging(level: &str, format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_new(level)
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!("invalid log level: {}", e))?;

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Console => registry
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(true).with_current_span(false))
            .init(),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_level_wins_over_config() {
        let config: Config = "[log]\nlevel = \"warn\"".parse().unwrap();
        assert_eq!(resolve_log_level(Some("debug"), &config), "debug");
        assert_eq!(resolve_log_level(None, &config), "warn");
        assert_eq!(resolve_log_level(None, &Config::default()), "info");
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let err = load_config(Some(Path::new("/nonexistent/sluice.toml"))).unwrap_err();
        assert!(err.to_string().contains("config file not found"));
        assert!(load_config(None).is_ok());
    }

    #[test]
    fn test_cli_parses_flags() {
        let cli = Cli::parse_from(["sluice", "-c", "a.toml", "-l", "trace", "--no-stdin"]);
        assert_eq!(cli.config, Some(PathBuf::from("a.toml")));
        assert_eq!(cli.log_level.as_deref(), Some("trace"));
        assert!(cli.no_stdin);
    }
}
