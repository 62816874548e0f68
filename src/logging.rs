//! Structured logging setup.
//!
//! Events go to **stderr** so stdout stays parseable for scripts. The level
//! comes from `--log-level`, overridden by `RUST_LOG` when set.

use anyhow::{anyhow, Result};
use std::io;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Multi-line human output.
    Pretty,
    /// One line per event.
    #[default]
    Compact,
    /// One JSON object per event.
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(anyhow!(
                "Unknown log format: '{}'. Must be pretty, compact, or json.",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Base level for this crate and the core crate.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: "warn".to_string(),
        }
    }
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(env) = std::env::var("RUST_LOG") {
        if !env.trim().is_empty() {
            return EnvFilter::try_new(env).map_err(|e| anyhow!("Invalid RUST_LOG filter: {}", e));
        }
    }
    let filter = format!(
        "warn,convo_import={lvl},convo_import_core={lvl},hyper=warn,reqwest=warn",
        lvl = config.level
    );
    EnvFilter::try_new(filter).map_err(|e| anyhow!("Invalid log level '{}': {}", config.level, e))
}

/// Install the global subscriber. Call once at startup.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(config)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false);

    let result = match config.format {
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().flatten_event(true).try_init(),
    };
    result.map_err(|e| anyhow!("Failed to initialize logging: {}", e))
}
