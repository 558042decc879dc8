use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::prefetch::PrefetchPolicy;

pub const DEFAULT_PR_API_URL: &str = "https://api.github.com/repos/microsoft/openvmm/pulls";

/// Settings for speculative background fetching after the run list loads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
    pub enabled: bool,
    /// How many of the most recent failed runs to prefetch
    pub recent_failed: usize,
    /// How many of the most recent runs to prefetch regardless of status
    pub recent: usize,
    /// Simultaneous requests per batch window
    pub concurrency: usize,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            recent_failed: 7,
            recent: 10,
            concurrency: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub container_url: String,
    #[serde(default = "default_pr_api_url")]
    pub pr_api_url: String,
    #[serde(default = "default_primary_branch")]
    pub primary_branch: String,
    #[serde(default = "default_true")]
    pub fetch_pr_titles: bool,
    /// Per-request timeout; 0 disables it
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    #[serde(default)]
    pub prefetch: PrefetchConfig,
}

fn default_pr_api_url() -> String {
    DEFAULT_PR_API_URL.to_string()
}

fn default_primary_branch() -> String {
    "main".to_string()
}

fn default_true() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    30
}

fn default_refresh_interval() -> u64 {
    300
}

impl Config {
    pub fn new(container_url: &str) -> Self {
        Self {
            container_url: container_url.to_string(),
            pr_api_url: default_pr_api_url(),
            primary_branch: default_primary_branch(),
            fetch_pr_titles: true,
            request_timeout_secs: default_request_timeout(),
            refresh_interval_secs: default_refresh_interval(),
            prefetch: PrefetchConfig::default(),
        }
    }

    pub fn config_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("PETRI_VIEWER_CONFIG_DIR") {
            PathBuf::from(dir)
        } else {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("~/.config"))
                .join("petri-viewer")
        }
    }

    pub fn config_file() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_file();
        let content = fs::read_to_string(&path).with_context(|| {
            format!(
                "Not initialized. Run: petri-viewer init <container-url>\n  (expected config at {})",
                path.display()
            )
        })?;
        let config: Config =
            toml::from_str(&content).with_context(|| "Failed to parse config file")?;
        if config.container_url.trim().is_empty() {
            anyhow::bail!("container_url is empty in {}", path.display());
        }
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let dir = Self::config_dir();
        fs::create_dir_all(&dir)?;

        let path = Self::config_file();
        let content = toml::to_string_pretty(self)?;
        fs::write(&path, &content)?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    pub fn prefetch_policy(&self) -> PrefetchPolicy {
        PrefetchPolicy {
            recent_failed: self.prefetch.recent_failed,
            recent: self.prefetch.recent,
            primary_branch: Some(self.primary_branch.clone()).filter(|b| !b.is_empty()),
        }
    }
}
