//! Configuration file parser for ~/.config/feedhound/config.toml.
//!
//! The config file is optional — a missing file yields `Config::default()`.
//! All values are explicit: they are passed into [`crate::feed::Fetcher`] and
//! the bulk-refresh pool at construction time rather than read from any
//! global state.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config file too large: {0}")]
    TooLarge(String),
}

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Missing keys fall back to `Default::default()`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// User-Agent header sent with every request.
    pub user_agent: String,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Maximum simultaneously in-flight requests during bulk operations.
    pub fetch_concurrency: usize,

    /// Keep-alive connections idle longer than this are closed.
    pub pool_idle_secs: u64,

    /// Hard cap on response body size in bytes.
    pub max_response_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user_agent: "feedhound/0.1 +https://github.com/dhofheinz/feedhound".to_owned(),
            request_timeout_secs: 30,
            fetch_concurrency: 10,
            pool_idle_secs: 10,
            max_response_bytes: 10 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Loads configuration from a TOML file, falling back to defaults when
    /// the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let metadata = std::fs::metadata(path)?;
        if metadata.len() > Self::MAX_FILE_SIZE {
            return Err(ConfigError::TooLarge(format!(
                "{} bytes (max {})",
                metadata.len(),
                Self::MAX_FILE_SIZE
            )));
        }

        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }
}
