//! TOML configuration for the `convo` CLI.
//!
//! Every section has defaults, so an empty file (or [`Config::minimal`] when
//! no file exists) is a valid configuration for offline commands.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use convo_import_core::chunk::DEFAULT_CHUNK_THRESHOLD;
use convo_import_core::upload::PollingPolicy;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub polling: PollingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Name of the environment variable holding the bearer token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_import_path")]
    pub import_path: String,
    #[serde(default = "default_selective_path")]
    pub selective_path: String,
    #[serde(default = "default_conversations_path")]
    pub conversations_path: String,
    #[serde(default = "default_startup_config_path")]
    pub startup_config_path: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token_env: default_token_env(),
            import_path: default_import_path(),
            selective_path: default_selective_path(),
            conversations_path: default_conversations_path(),
            startup_config_path: default_startup_config_path(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:3080".to_string()
}
fn default_token_env() -> String {
    "CONVO_IMPORT_TOKEN".to_string()
}
fn default_import_path() -> String {
    "/api/convos/import".to_string()
}
fn default_selective_path() -> String {
    "/api/convos/import/selective".to_string()
}
fn default_conversations_path() -> String {
    "/api/convos".to_string()
}
fn default_startup_config_path() -> String {
    "/api/config".to_string()
}
fn default_request_timeout_secs() -> u64 {
    600
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    #[serde(default = "default_chunk_threshold")]
    pub chunk_threshold_bytes: u64,
    /// Local file size limit. 0 defers to the server-advertised value.
    #[serde(default)]
    pub max_file_size_bytes: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_threshold_bytes: default_chunk_threshold(),
            max_file_size_bytes: 0,
        }
    }
}

fn default_chunk_threshold() -> u64 {
    DEFAULT_CHUNK_THRESHOLD
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollingConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_interval_secs() -> u64 {
    5
}
fn default_max_attempts() -> u32 {
    24
}

impl Config {
    /// Defaults only. Used when no config file is present.
    pub fn minimal() -> Self {
        Self::default()
    }

    /// Local override of the file size limit, if one is set.
    pub fn local_max_file_size(&self) -> Option<u64> {
        match self.upload.max_file_size_bytes {
            0 => None,
            n => Some(n),
        }
    }
}

impl ServerConfig {
    /// Absolute URL for an endpoint path.
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub fn token(&self) -> Option<String> {
        std::env::var(&self.token_env).ok().filter(|t| !t.is_empty())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl PollingConfig {
    pub fn policy(&self) -> PollingPolicy {
        PollingPolicy {
            interval: Duration::from_secs(self.interval_secs),
            max_attempts: self.max_attempts,
        }
    }
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.server.base_url.trim().is_empty() {
        anyhow::bail!("server.base_url must not be empty");
    }

    // An array needs at least its brackets.
    if config.upload.chunk_threshold_bytes <= 2 {
        anyhow::bail!("upload.chunk_threshold_bytes must be > 2");
    }

    if config.polling.interval_secs == 0 {
        anyhow::bail!("polling.interval_secs must be > 0");
    }
    if config.polling.max_attempts == 0 {
        anyhow::bail!("polling.max_attempts must be > 0");
    }

    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Load `path` when it exists, otherwise fall back to [`Config::minimal`].
pub fn load_or_minimal(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        Ok(Config::minimal())
    }
}
