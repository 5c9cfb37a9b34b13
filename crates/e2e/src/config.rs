//! Runner configuration
//!
//! Layered as: built-in defaults, then `e2e.toml`, then `DOCSITE_E2E_*`
//! environment variables, then command-line flags (applied by the harness).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{E2eError, E2eResult};
use crate::playwright::PlaywrightConfig;
use crate::site::SiteConfig;

/// Configuration for the test runner
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub site: SiteConfig,
    pub playwright: PlaywrightConfig,

    /// Directory of YAML specs; the built-in suite is used when unset or missing
    pub specs_dir: Option<PathBuf>,
    pub output_dir: PathBuf,

    /// Scenarios run concurrently, at most this many at once
    pub workers: usize,
    /// Extra attempts for a failing scenario
    pub retries: u32,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            site: SiteConfig::default(),
            playwright: PlaywrightConfig::default(),
            specs_dir: None,
            output_dir: PathBuf::from("test-results"),
            workers: 3,
            retries: 0,
        }
    }
}

impl RunnerConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> E2eResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            debug!("Loaded config from {}", path.display());
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply `DOCSITE_E2E_*` overrides from the process environment
    pub fn apply_env(&mut self) -> E2eResult<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    pub fn apply_env_from<F>(&mut self, lookup: F) -> E2eResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DOCSITE_E2E_BASE_URL") {
            self.site.base_url = url;
        }
        if let Some(workers) = lookup("DOCSITE_E2E_WORKERS") {
            self.workers = parse_env("DOCSITE_E2E_WORKERS", &workers)?;
        }
        if let Some(retries) = lookup("DOCSITE_E2E_RETRIES") {
            self.retries = parse_env("DOCSITE_E2E_RETRIES", &retries)?;
        }
        if let Some(headless) = lookup("DOCSITE_E2E_HEADLESS") {
            self.playwright.headless = parse_bool("DOCSITE_E2E_HEADLESS", &headless)?;
        }
        Ok(())
    }

    /// Reject settings the runner cannot honor
    pub fn validate(&self) -> E2eResult<()> {
        if self.workers == 0 {
            return Err(E2eError::Config("workers must be at least 1".to_string()));
        }
        self.site.base_url()?;
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> E2eResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| E2eError::Config(format!("{} has invalid value '{}'", key, value)))
}

fn parse_bool(key: &str, value: &str) -> E2eResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(E2eError::Config(format!("{} has invalid value '{}'", key, value))),
    }
}
