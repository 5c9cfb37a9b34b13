//! Reachability checks for the site under test

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{info, warn};
use url::Url;

use crate::error::{E2eError, E2eResult};

/// Polls the site under test before any browser is launched
pub struct SiteProbe {
    client: reqwest::Client,
    base_url: Url,
    poll_interval: Duration,
}

impl SiteProbe {
    pub fn new(config: &SiteConfig) -> E2eResult<Self> {
        let base_url = config.base_url()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("docsite-e2e/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// One request; any answer below 500 counts as up
    pub async fn is_reachable(&self) -> bool {
        match self.client.get(self.base_url.clone()).send().await {
            Ok(resp) => !resp.status().is_server_error(),
            Err(_) => false,
        }
    }

    /// Wait for the site to respond
    pub async fn wait_until_reachable(&self, timeout_duration: Duration) -> E2eResult<()> {
        let start = Instant::now();
        let mut attempts = 0;

        loop {
            attempts += 1;

            match self.client.get(self.base_url.clone()).send().await {
                Ok(resp) if !resp.status().is_server_error() => {
                    info!("Site {} is up ({})", self.base_url, resp.status());
                    return Ok(());
                }
                Ok(resp) => {
                    warn!("Site returned {}", resp.status());
                }
                Err(e) => {
                    if attempts == 1 {
                        info!("Waiting for {} to respond...", self.base_url);
                    }
                    if !e.is_connect() && !e.is_timeout() {
                        warn!("Reachability check error: {}", e);
                    }
                }
            }

            if start.elapsed() + self.poll_interval >= timeout_duration {
                break;
            }
            sleep(self.poll_interval).await;
        }

        Err(E2eError::SiteUnreachable {
            url: self.base_url.to_string(),
            attempts,
        })
    }
}

/// Where the site under test lives
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub base_url: String,

    /// Probe the site before running and fail fast when it is down
    pub probe: bool,
    pub probe_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://playwright.dev/".to_string(),
            probe: true,
            probe_timeout_secs: 15,
            request_timeout_secs: 5,
            poll_interval_ms: 500,
        }
    }
}

impl SiteConfig {
    pub fn base_url(&self) -> E2eResult<Url> {
        let url = Url::parse(&self.base_url)?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(E2eError::Config(format!(
                "base URL must be http(s), got '{}'",
                other
            ))),
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}
