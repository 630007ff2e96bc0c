//! Configuration file for app-creator.
//!
//! Looked up at `~/.config/app-creator/config.toml` unless `--config` points
//! elsewhere. Every field is optional; command-line flags take precedence.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryConfig;

/// Default packaging directory.
pub const DEFAULT_OUTPUT_DIR: &str = "output";

/// Which completion backend to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    #[serde(alias = "openai-compatible")]
    Openai,
}

/// User configuration (config.toml).
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub provider: Option<ProviderKind>,
    pub model: Option<String>,
    /// Base URL for OpenAI-compatible servers.
    pub base_url: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Review budget before the forced exit.
    pub max_reviews: Option<u32>,
    pub output_dir: Option<PathBuf>,
    /// Record finished runs here when set.
    pub history_db: Option<PathBuf>,
    #[serde(default)]
    pub retry: RetrySection,
}

/// `[retry]` table.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RetrySection {
    pub max_attempts: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    /// 0 disables the per-attempt timeout.
    pub attempt_timeout_secs: Option<u64>,
}

impl RetrySection {
    /// Overlay the configured values on the default policy.
    pub fn to_retry_config(&self) -> RetryConfig {
        let mut cfg = RetryConfig::default();
        if let Some(n) = self.max_attempts {
            cfg.max_attempts = n;
        }
        if let Some(ms) = self.initial_delay_ms {
            cfg.initial_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.max_delay_ms {
            cfg.max_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = self.attempt_timeout_secs {
            cfg.attempt_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        cfg
    }
}

fn default_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("app-creator")
        .join("config.toml")
}

impl Config {
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).context("Invalid config")
    }

    /// Load an explicit config file. Missing or invalid files are errors.
    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("In {}", path.display()))
    }

    /// Load the explicit file if given, otherwise the default location if it
    /// exists. A broken default file is reported and ignored.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from(path);
        }
        let path = default_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        match Self::load_from(&path) {
            Ok(cfg) => Ok(cfg),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %format!("{e:#}"), "Ignoring bad config file");
                Ok(Self::default())
            }
        }
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR))
    }
}
