//! Command-line flags for the browser suite harness

use std::path::PathBuf;

use clap::Parser;

use crate::config::RunnerConfig;
use crate::error::E2eResult;
use crate::playwright::Browser;

#[derive(Parser, Debug)]
#[command(name = "docsite-e2e")]
#[command(about = "Browser E2E suite for the Playwright documentation site")]
#[command(ignore_errors = true)]
pub struct CliArgs {
    /// Configuration file
    #[arg(short, long, default_value = "e2e.toml")]
    pub config: PathBuf,

    /// Path to test specs directory (built-in suite when absent)
    #[arg(short, long)]
    pub specs: Option<PathBuf>,

    /// Run only tests matching this tag
    #[arg(short, long)]
    pub tag: Option<String>,

    /// Run only a specific test by name
    #[arg(short, long)]
    pub name: Option<String>,

    /// Site under test
    #[arg(long)]
    pub base_url: Option<String>,

    /// Browser to use (chromium, firefox, webkit)
    #[arg(long)]
    pub browser: Option<Browser>,

    /// Run in headless mode (`--headless`, or `--headless false` for a visible browser)
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub headless: Option<bool>,

    /// Scenarios to run at once
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Retries for failing scenarios
    #[arg(long)]
    pub retries: Option<u32>,

    /// Output directory for results
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Fail instead of skipping when Playwright or the site is unavailable
    #[arg(long, env = "DOCSITE_E2E_REQUIRE_BROWSER")]
    pub require_browser: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,
}

impl CliArgs {
    /// Load the config file, then layer env overrides and flags on top
    pub fn build_config(&self) -> E2eResult<RunnerConfig> {
        let mut config = RunnerConfig::load(&self.config)?;
        config.apply_env()?;
        self.apply_to(&mut config);

        config.validate()?;
        Ok(config)
    }

    /// Override config values with any flags that were given
    pub fn apply_to(&self, config: &mut RunnerConfig) {
        if let Some(url) = &self.base_url {
            config.site.base_url = url.clone();
        }
        if let Some(browser) = self.browser {
            config.playwright.browser = browser;
        }
        if let Some(headless) = self.headless {
            config.playwright.headless = headless;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(retries) = self.retries {
            config.retries = retries;
        }
        if let Some(specs) = &self.specs {
            config.specs_dir = Some(specs.clone());
        }
        if let Some(output) = &self.output {
            config.output_dir = output.clone();
            config.playwright = config.playwright.clone().with_output_dir(output);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(std::iter::once("docsite-e2e").chain(args.iter().copied())).unwrap()
    }

    #[test_case(&[], None; "absent")]
    #[test_case(&["--headless"], Some(true); "bare flag")]
    #[test_case(&["--headless", "true"], Some(true); "explicit true")]
    #[test_case(&["--headless", "false"], Some(false); "explicit false")]
    #[test_case(&["--headless=false"], Some(false); "equals false")]
    #[test_case(&["--headless", "--workers", "2"], Some(true); "bare flag before another flag")]
    fn test_headless_flag(args: &[&str], expected: Option<bool>) {
        assert_eq!(parse(args).headless, expected);
    }

    #[test]
    fn test_flags_override_config() {
        let args = parse(&[
            "--base-url",
            "https://playwright.dev/python/",
            "--browser",
            "webkit",
            "--headless",
            "false",
            "--workers",
            "1",
            "--retries",
            "2",
            "--output",
            "out",
        ]);
        let mut config = RunnerConfig::default();
        args.apply_to(&mut config);

        assert_eq!(config.site.base_url, "https://playwright.dev/python/");
        assert_eq!(config.playwright.browser, Browser::Webkit);
        assert!(!config.playwright.headless);
        assert_eq!(config.workers, 1);
        assert_eq!(config.retries, 2);
        assert_eq!(config.output_dir, PathBuf::from("out"));
        assert_eq!(config.playwright.screenshot_dir, PathBuf::from("out").join("screenshots"));
    }

    #[test]
    fn test_no_flags_leave_config_alone() {
        let mut config = RunnerConfig::default();
        parse(&[]).apply_to(&mut config);

        assert!(config.playwright.headless);
        assert_eq!(config.workers, 3);
        assert_eq!(config.retries, 0);
    }
}
