//! Runtime settings loaded from an optional YAML file.
//!
//! Precedence is CLI flag > config file > built-in default. The CLI side of
//! the merge lives in [`Settings::apply_cli`].
//!
//! ```yaml
//! github_token: ghp_xxx
//! concurrency: 4
//! request_timeout_secs: 20
//! retry:
//!   max_retries: 3
//!   base_delay_ms: 500
//! tracked_projects:
//!   - https://github.com/rust-lang/rust
//! ```

use crate::cli::Cli;
use crate::error::ConfigError;
use serde::Deserialize;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, instrument};

pub const DEFAULT_GITHUB_API_BASE: &str = "https://api.github.com";

/// Backoff settings for transient fetch failures.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
        }
    }
}

impl RetrySettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub github_token: Option<String>,
    pub github_api_base: String,
    pub request_timeout_secs: u64,
    /// Maximum number of batch items in flight at once.
    pub concurrency: usize,
    /// How many recent commits to pull per repository.
    pub commit_limit: u32,
    pub retry: RetrySettings,
    /// Reject items whose natural key already exists instead of updating them.
    pub skip_existing: bool,
    /// Repository URLs synced by `sync-projects`. Empty means "every repo
    /// the token's user owns".
    pub tracked_projects: Vec<String>,
    pub store_path: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            github_token: None,
            github_api_base: DEFAULT_GITHUB_API_BASE.to_string(),
            request_timeout_secs: 20,
            concurrency: 4,
            commit_limit: 5,
            retry: RetrySettings::default(),
            skip_existing: false,
            tracked_projects: Vec::new(),
            store_path: "catalog.json".to_string(),
        }
    }
}

impl Settings {
    pub fn from_yaml(yaml: &str, path: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    /// Read settings from `path`, or fall back to defaults when no path is given.
    #[instrument(level = "info", skip_all, fields(path = ?path))]
    pub async fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            debug!("No config file given; using defaults");
            return Ok(Self::default());
        };
        let yaml = fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_string(),
                source,
            })?;
        let settings = Self::from_yaml(&yaml, path)?;
        info!(
            tracked = settings.tracked_projects.len(),
            concurrency = settings.concurrency,
            "Loaded configuration"
        );
        Ok(settings)
    }

    pub fn apply_cli(mut self, cli: &Cli) -> Self {
        if let Some(token) = &cli.github_token {
            self.github_token = Some(token.clone());
        }
        if let Some(base) = &cli.github_api_base {
            self.github_api_base = base.clone();
        }
        if let Some(concurrency) = cli.concurrency {
            self.concurrency = concurrency;
        }
        if let Some(timeout) = cli.timeout_secs {
            self.request_timeout_secs = timeout;
        }
        if let Some(limit) = cli.commit_limit {
            self.commit_limit = limit;
        }
        if let Some(retries) = cli.max_retries {
            self.retry.max_retries = retries;
        }
        if let Some(ms) = cli.retry_base_delay_ms {
            self.retry.base_delay_ms = ms;
        }
        if let Some(ms) = cli.retry_max_delay_ms {
            self.retry.max_delay_ms = ms;
        }
        if let Some(store) = &cli.store {
            self.store_path = store.clone();
        }
        if cli.skip_existing {
            self.skip_existing = true;
        }
        self
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::InvalidSetting {
                name: "concurrency",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidSetting {
                name: "request_timeout_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        if url::Url::parse(&self.github_api_base).is_err() {
            return Err(ConfigError::InvalidSetting {
                name: "github_api_base",
                reason: format!("{} is not a URL", self.github_api_base),
            });
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// The token, with empty strings treated as missing.
    pub fn github_token(&self) -> Option<&str> {
        self.github_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}
