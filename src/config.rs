//! TOML configuration parsing.
//!
//! ```toml
//! [markdown]
//! locations = ["./docs"]
//! roots = ["docs/"]
//!
//! [retry]
//! delay_ms = 1000
//! multiplier = 2.0
//! max_delay_ms = 60000
//! max_elapsed_ms = 300000
//!
//! [assistant]
//! vector_store_id = "vs_abc123"
//! ```
//!
//! The OpenAI API key is read from `OPENAI_API_KEY`, never from this file.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backoff::ExponentialBackoff;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub markdown: MarkdownConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub assistant: AssistantConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MarkdownConfig {
    /// Directories walked on every sync pass.
    pub locations: Vec<PathBuf>,
    /// Ordered root markers used to derive document keys.
    #[serde(default)]
    pub roots: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Omitted: rate-limited calls are retried without an elapsed-time budget.
    #[serde(default)]
    pub max_elapsed_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            max_elapsed_ms: None,
        }
    }
}

fn default_delay_ms() -> u64 {
    1_000
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_max_delay_ms() -> u64 {
    60_000
}

impl RetryConfig {
    pub fn backoff(&self) -> ExponentialBackoff {
        let policy = ExponentialBackoff::new(Duration::from_millis(self.delay_ms), self.multiplier)
            .with_max_interval(Duration::from_millis(self.max_delay_ms));
        match self.max_elapsed_ms {
            Some(ms) => policy.with_max_elapsed_time(Duration::from_millis(ms)),
            None => policy,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AssistantConfig {
    #[serde(default)]
    pub vector_store_id: Option<String>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            vector_store_id: None,
            api_base: default_api_base(),
            timeout_secs: default_timeout_secs(),
            page_size: default_page_size(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_page_size() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

fn default_interval_secs() -> u64 {
    300
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = parse_config(&content)?;
    Ok(config)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.markdown.locations.is_empty() {
        bail!("markdown.locations must name at least one directory");
    }
    if config.markdown.roots.iter().any(|r| r.is_empty()) {
        bail!("markdown.roots must not contain empty markers");
    }

    let retry = &config.retry;
    if retry.delay_ms == 0 {
        bail!("retry.delay_ms must be > 0");
    }
    if !(retry.multiplier >= 1.0 && retry.multiplier.is_finite()) {
        bail!("retry.multiplier must be a finite number >= 1.0");
    }
    if retry.max_delay_ms < retry.delay_ms {
        bail!("retry.max_delay_ms must be >= retry.delay_ms");
    }

    if config.assistant.page_size == 0 {
        bail!("assistant.page_size must be > 0");
    }
    if config.sync.interval_secs == 0 {
        bail!("sync.interval_secs must be > 0");
    }

    Ok(config)
}

impl AssistantConfig {
    pub fn require_vector_store_id(&self) -> Result<&str> {
        self.vector_store_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| anyhow::anyhow!("assistant.vector_store_id must be set"))
    }
}
