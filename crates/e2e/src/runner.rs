//! Main test runner that orchestrates the site probe and Playwright scenarios

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::RunnerConfig;
use crate::error::{E2eError, E2eResult};
use crate::playwright::{PlaywrightHandle, StepResult};
use crate::site::SiteProbe;
use crate::spec::TestSpec;
use crate::suite;

/// Runs one scenario in a fresh browser
#[async_trait::async_trait]
pub trait ScenarioExecutor: Send + Sync {
    async fn execute(&self, spec: &TestSpec) -> E2eResult<Vec<StepResult>>;
}

#[async_trait::async_trait]
impl ScenarioExecutor for PlaywrightHandle {
    async fn execute(&self, spec: &TestSpec) -> E2eResult<Vec<StepResult>> {
        self.run_spec(spec).await
    }
}

/// Result of running a single test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub success: bool,
    /// Passed only after at least one failed attempt
    pub flaky: bool,
    pub attempts: u32,
    pub duration_ms: u64,
    /// Steps of the last attempt
    pub steps: Vec<StepResult>,
    pub error: Option<String>,
}

/// Result of running all tests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuiteResult {
    pub base_url: String,
    pub started_at: DateTime<Utc>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub flaky: usize,
    /// Specs excluded by a tag filter
    pub skipped: usize,
    pub duration_ms: u64,
    pub results: Vec<TestResult>,
}

impl TestSuiteResult {
    pub fn from_results(
        base_url: &str,
        started_at: DateTime<Utc>,
        duration_ms: u64,
        skipped: usize,
        results: Vec<TestResult>,
    ) -> Self {
        let passed = results.iter().filter(|r| r.success).count();
        let flaky = results.iter().filter(|r| r.flaky).count();

        Self {
            base_url: base_url.to_string(),
            started_at,
            total: results.len(),
            passed,
            failed: results.len() - passed,
            flaky,
            skipped,
            duration_ms,
            results,
        }
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

/// Main E2E test runner
pub struct TestRunner {
    config: RunnerConfig,

    /// Scenario executor, created on first run unless injected
    executor: Option<Arc<dyn ScenarioExecutor>>,
}

impl TestRunner {
    /// Create a new test runner with default configuration
    pub fn new() -> Self {
        Self::with_config(RunnerConfig::default())
    }

    /// Create a test runner with custom configuration
    pub fn with_config(config: RunnerConfig) -> Self {
        Self {
            config,
            executor: None,
        }
    }

    /// Create a test runner that runs scenarios through `executor`
    pub fn with_executor(config: RunnerConfig, executor: Arc<dyn ScenarioExecutor>) -> Self {
        Self {
            config,
            executor: Some(executor),
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Probe the site and launch-check Playwright
    pub async fn prepare(&mut self) -> E2eResult<()> {
        self.config.validate()?;

        if self.config.site.probe {
            let probe = SiteProbe::new(&self.config.site)?;
            probe.wait_until_reachable(self.config.site.probe_timeout()).await?;
        }

        if self.executor.is_none() {
            let pw_config = self.config.playwright.clone();
            let handle = PlaywrightHandle::new(pw_config, self.config.site.base_url()?).await?;
            info!(
                "Using {} ({}), {} worker(s), {} retr{}",
                handle.config().browser.as_str(),
                if handle.config().headless { "headless" } else { "headed" },
                self.config.workers,
                self.config.retries,
                if self.config.retries == 1 { "y" } else { "ies" },
            );
            self.executor = Some(Arc::new(handle));
        }

        Ok(())
    }

    /// Specs from the configured directory, or the built-in suite
    pub fn load_specs(&self) -> E2eResult<Vec<TestSpec>> {
        match &self.config.specs_dir {
            Some(dir) if dir.is_dir() => {
                debug!("Loading specs from {}", dir.display());
                TestSpec::load_all(dir)
            }
            Some(dir) => {
                warn!("Specs directory {} not found, using built-in suite", dir.display());
                suite::builtin_specs()
            }
            None => suite::builtin_specs(),
        }
    }

    /// Run all tests
    pub async fn run_all(&mut self) -> E2eResult<TestSuiteResult> {
        let specs = self.load_specs()?;
        self.run_specs(&specs, 0).await
    }

    /// Run tests matching a tag
    pub async fn run_tagged(&mut self, tag: &str) -> E2eResult<TestSuiteResult> {
        let specs = self.load_specs()?;
        let total = specs.len();
        let filtered: Vec<TestSpec> = TestSpec::filter_by_tag(&specs, tag)
            .into_iter()
            .cloned()
            .collect();
        if filtered.is_empty() {
            return Err(E2eError::SpecParse(format!("No tests tagged: {}", tag)));
        }
        let skipped = total - filtered.len();
        self.run_specs(&filtered, skipped).await
    }

    /// Run a specific test by name
    pub async fn run_test(&mut self, name: &str) -> E2eResult<TestSuiteResult> {
        let specs = self.load_specs()?;
        let total = specs.len();
        let spec = specs
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| E2eError::SpecParse(format!("Test not found: {}", name)))?;

        self.run_specs(std::slice::from_ref(&spec), total - 1).await
    }

    /// Run a list of test specs
    pub async fn run_specs(&mut self, specs: &[TestSpec], skipped: usize) -> E2eResult<TestSuiteResult> {
        let started_at = Utc::now();
        let start = Instant::now();

        self.prepare().await?;
        let executor = self
            .executor
            .clone()
            .ok_or_else(|| E2eError::Playwright("no scenario executor".to_string()))?;

        info!("Running {} test(s)...", specs.len());

        let results: Vec<TestResult> = stream::iter(specs)
            .map(|spec| self.run_spec(executor.as_ref(), spec))
            .buffered(self.config.workers.max(1))
            .collect()
            .await;

        let duration_ms = start.elapsed().as_millis() as u64;
        let suite = TestSuiteResult::from_results(
            &self.config.site.base_url,
            started_at,
            duration_ms,
            skipped,
            results,
        );

        info!("");
        info!(
            "Test Results: {} passed, {} failed, {} flaky, {} skipped ({} ms)",
            suite.passed, suite.failed, suite.flaky, suite.skipped, suite.duration_ms
        );

        Ok(suite)
    }

    /// Run a single test spec, retrying failures
    pub async fn run_spec(&self, executor: &dyn ScenarioExecutor, spec: &TestSpec) -> TestResult {
        let start = Instant::now();
        let max_attempts = self.config.retries + 1;

        let mut attempts = 0;
        let mut steps = Vec::new();
        let mut test_error = None;

        while attempts < max_attempts {
            attempts += 1;
            debug!("Running test: {} (attempt {}/{})", spec.name, attempts, max_attempts);

            match executor.execute(spec).await {
                Ok(step_results) => {
                    test_error = scenario_error(spec, &step_results);
                    steps = step_results;
                }
                Err(e) => {
                    test_error = Some(e.to_string());
                    steps = Vec::new();
                }
            }

            match &test_error {
                None => break,
                Some(reason) if attempts < max_attempts => {
                    warn!("↻ {} failed on attempt {}: {}", spec.name, attempts, reason);
                }
                Some(_) => {}
            }
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        let success = test_error.is_none();
        let flaky = success && attempts > 1;

        match &test_error {
            None if flaky => warn!("✓ {} ({} ms, flaky: passed on attempt {})", spec.name, duration_ms, attempts),
            None => info!("✓ {} ({} ms)", spec.name, duration_ms),
            Some(reason) => error!("✗ {} - {}", spec.name, reason),
        }

        TestResult {
            name: spec.name.clone(),
            success,
            flaky,
            attempts,
            duration_ms,
            steps,
            error: test_error,
        }
    }

    /// Write test results to JSON file
    pub fn write_results(&self, results: &TestSuiteResult) -> E2eResult<PathBuf> {
        std::fs::create_dir_all(&self.config.output_dir)?;

        let path = self.config.output_dir.join("test-results.json");
        let json = serde_json::to_string_pretty(results)?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}

impl Default for TestRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a scenario failed, judged from its reported steps
fn scenario_error(spec: &TestSpec, steps: &[StepResult]) -> Option<String> {
    if let Some(failed) = steps.iter().find(|s| !s.success) {
        return Some(
            E2eError::StepFailed {
                step: failed.step_name.clone(),
                reason: failed.error.clone().unwrap_or_else(|| "unknown error".to_string()),
            }
            .to_string(),
        );
    }

    if steps.len() < spec.steps.len() {
        return Some(format!(
            "scenario stopped after {} of {} steps",
            steps.len(),
            spec.steps.len()
        ));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Fails the first `failures` calls, then passes every step
    struct FlakyExecutor {
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyExecutor {
        fn new(failures: u32) -> Self {
            Self { failures, calls: AtomicU32::new(0) }
        }
    }

    fn passed(spec: &TestSpec) -> Vec<StepResult> {
        spec.steps
            .iter()
            .map(|step| StepResult {
                success: true,
                step_name: step.label(),
                duration_ms: 1,
                error: None,
                screenshot_path: None,
                branch: None,
            })
            .collect()
    }

    #[async_trait::async_trait]
    impl ScenarioExecutor for FlakyExecutor {
        async fn execute(&self, spec: &TestSpec) -> E2eResult<Vec<StepResult>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                let mut steps = passed(spec);
                let last = steps.last_mut().expect("spec has steps");
                last.success = false;
                last.error = Some("Timed out 5000ms waiting for expect(locator).toBeVisible()".into());
                Ok(steps)
            } else {
                Ok(passed(spec))
            }
        }
    }

    struct BrokenExecutor;

    #[async_trait::async_trait]
    impl ScenarioExecutor for BrokenExecutor {
        async fn execute(&self, _spec: &TestSpec) -> E2eResult<Vec<StepResult>> {
            Err(E2eError::Playwright("browserType.launch: Executable doesn't exist".into()))
        }
    }

    /// Passes every scenario after a delay that shrinks with its position,
    /// so later scenarios finish first. Tracks how many run at once.
    #[derive(Default)]
    struct SlowExecutor {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ScenarioExecutor for SlowExecutor {
        async fn execute(&self, spec: &TestSpec) -> E2eResult<Vec<StepResult>> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let position: u64 = spec.name.trim_start_matches("scenario-").parse().unwrap();
            tokio::time::sleep(Duration::from_millis(10 + (6 - position) * 15)).await;

            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(passed(spec))
        }
    }

    fn numbered_specs(count: usize) -> Vec<TestSpec> {
        (0..count)
            .map(|i| TestSpec {
                name: format!("scenario-{}", i),
                ..homepage()
            })
            .collect()
    }

    fn offline_config(retries: u32) -> RunnerConfig {
        let mut config = RunnerConfig {
            retries,
            ..Default::default()
        };
        config.site.probe = false;
        config
    }

    fn homepage() -> TestSpec {
        suite::builtin_specs().unwrap().remove(0)
    }

    #[tokio::test]
    async fn test_passing_suite_keeps_declaration_order() {
        let mut runner = TestRunner::with_executor(offline_config(0), Arc::new(FlakyExecutor::new(0)));
        let suite = runner.run_all().await.unwrap();

        assert!(suite.all_passed());
        assert_eq!(suite.total, 3);
        let names: Vec<_> = suite.results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["homepage-title", "docs-navigation", "search-interaction"]);
        assert!(suite.results.iter().all(|r| r.attempts == 1 && !r.flaky));
    }

    #[tokio::test]
    async fn test_retry_marks_flaky() {
        let runner = TestRunner::with_config(offline_config(2));
        let executor = FlakyExecutor::new(1);

        let result = runner.run_spec(&executor, &homepage()).await;
        assert!(result.success);
        assert!(result.flaky);
        assert_eq!(result.attempts, 2);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_failure_without_retries() {
        let runner = TestRunner::with_config(offline_config(0));
        let executor = FlakyExecutor::new(1);

        let result = runner.run_spec(&executor, &homepage()).await;
        assert!(!result.success);
        assert!(!result.flaky);
        assert_eq!(result.attempts, 1);
        let error = result.error.unwrap();
        assert!(error.contains(r#"assert:role=heading[name="Playwright"]"#), "{error}");
        assert!(error.contains("toBeVisible"), "{error}");
    }

    #[tokio::test]
    async fn test_executor_error_recorded_not_propagated() {
        let runner = TestRunner::with_config(offline_config(1));
        let result = runner.run_spec(&BrokenExecutor, &homepage()).await;

        assert!(!result.success);
        assert_eq!(result.attempts, 2);
        assert!(result.steps.is_empty());
        assert!(result.error.unwrap().contains("Executable doesn't exist"));
    }

    #[tokio::test]
    async fn test_run_tagged_counts_skipped() {
        let mut runner = TestRunner::with_executor(offline_config(0), Arc::new(FlakyExecutor::new(0)));
        let suite = runner.run_tagged("smoke").await.unwrap();

        assert_eq!(suite.total, 2);
        assert_eq!(suite.skipped, 1);
    }

    #[tokio::test]
    async fn test_run_tagged_without_matches_is_an_error() {
        let mut runner = TestRunner::with_executor(offline_config(0), Arc::new(FlakyExecutor::new(0)));
        let err = runner.run_tagged("no-such-tag").await.unwrap_err();

        assert!(matches!(err, E2eError::SpecParse(_)), "got {err}");
        assert!(err.to_string().contains("No tests tagged: no-such-tag"));
    }

    #[tokio::test]
    async fn test_workers_bound_concurrency_and_keep_order() {
        let executor = Arc::new(SlowExecutor::default());
        let mut config = offline_config(0);
        config.workers = 3;
        let mut runner = TestRunner::with_executor(config, executor.clone());

        let specs = numbered_specs(6);
        let suite = runner.run_specs(&specs, 0).await.unwrap();

        let peak = executor.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak concurrency {peak} exceeds workers");
        assert!(peak > 1, "scenarios never overlapped");

        assert!(suite.all_passed());
        let names: Vec<_> = suite.results.iter().map(|r| r.name.clone()).collect();
        let expected: Vec<_> = specs.iter().map(|s| s.name.clone()).collect();
        assert_eq!(names, expected);
    }

    #[tokio::test]
    async fn test_single_worker_runs_one_at_a_time() {
        let executor = Arc::new(SlowExecutor::default());
        let mut config = offline_config(0);
        config.workers = 1;
        let mut runner = TestRunner::with_executor(config, executor.clone());

        let suite = runner.run_specs(&numbered_specs(3), 0).await.unwrap();

        assert_eq!(executor.peak.load(Ordering::SeqCst), 1);
        assert_eq!(suite.results[0].name, "scenario-0");
        assert_eq!(suite.results[2].name, "scenario-2");
    }

    #[tokio::test]
    async fn test_run_test_by_name() {
        let mut runner = TestRunner::with_executor(offline_config(0), Arc::new(FlakyExecutor::new(0)));
        let suite = runner.run_test("search-interaction").await.unwrap();
        assert_eq!(suite.total, 1);
        assert_eq!(suite.results[0].name, "search-interaction");

        let err = runner.run_test("missing").await.unwrap_err();
        assert!(err.to_string().contains("Test not found"));
    }

    #[test]
    fn test_incomplete_run_is_a_failure() {
        let spec = homepage();
        let mut steps = passed(&spec);
        steps.pop();
        let reason = scenario_error(&spec, &steps).unwrap();
        assert!(reason.contains("2 of 3"), "{reason}");
    }

    #[tokio::test]
    async fn test_write_results() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = offline_config(0);
        config.output_dir = dir.path().join("out");

        let mut runner = TestRunner::with_executor(config, Arc::new(FlakyExecutor::new(0)));
        let suite = runner.run_all().await.unwrap();
        let path = runner.write_results(&suite).unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(written["total"], 3);
        assert_eq!(written["base_url"], "https://playwright.dev/");
        assert_eq!(written["results"][0]["steps"].as_array().unwrap().len(), 3);
    }
}
