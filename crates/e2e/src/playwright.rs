//! Playwright browser automation
//!
//! Each scenario is rendered into one Node.js script that drives
//! `@playwright/test` in a fresh browser context. The script reports progress
//! on stdout as JSON lines prefixed with [`EVENT_PREFIX`], which are parsed
//! back into [`StepResult`]s.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command as TokioCommand;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{E2eError, E2eResult};
use crate::spec::{Target, TestSpec, TestStep, Viewport};

/// Marks stdout lines that carry script events
pub const EVENT_PREFIX: &str = "@@e2e ";

/// Playwright browser handle
pub struct PlaywrightHandle {
    config: PlaywrightConfig,

    /// Base URL relative navigations resolve against
    base_url: Url,

    /// Absolute screenshot directory
    screenshot_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

impl FromStr for Browser {
    type Err = E2eError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "chromium" | "chrome" => Ok(Browser::Chromium),
            "firefox" => Ok(Browser::Firefox),
            "webkit" | "safari" => Ok(Browser::Webkit),
            other => Err(E2eError::Config(format!("unknown browser '{}'", other))),
        }
    }
}

/// Which arm of an `if_visible` step ran
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Branch {
    Then,
    Else,
}

/// Result of executing a test step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub success: bool,
    pub step_name: String,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub screenshot_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<Branch>,
}

/// Progress reported by a running scenario script
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScriptEvent {
    Step {
        index: usize,
        ms: u64,
        #[serde(default)]
        screenshot: Option<PathBuf>,
    },
    Branch {
        index: usize,
        taken: Branch,
    },
    Failure {
        #[serde(default)]
        index: Option<usize>,
        #[serde(default)]
        ms: u64,
        error: String,
        #[serde(default)]
        screenshot: Option<PathBuf>,
    },
    Done,
}

impl PlaywrightHandle {
    /// Create a new Playwright handle
    pub async fn new(config: PlaywrightConfig, base_url: Url) -> E2eResult<Self> {
        if !Self::is_installed(&config).await {
            return Err(E2eError::PlaywrightNotFound);
        }
        Self::without_install_check(config, base_url)
    }

    /// Build a handle without probing for the engine, for rendering scripts
    pub fn without_install_check(config: PlaywrightConfig, base_url: Url) -> E2eResult<Self> {
        std::fs::create_dir_all(&config.screenshot_dir)?;
        let screenshot_dir = std::fs::canonicalize(&config.screenshot_dir)?;

        Ok(Self {
            config,
            base_url,
            screenshot_dir,
        })
    }

    /// Check if Playwright is installed
    pub async fn is_installed(config: &PlaywrightConfig) -> bool {
        let status = TokioCommand::new(&config.npx_binary)
            .args(["--no-install", "playwright", "--version"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await;

        matches!(status, Ok(status) if status.success())
    }

    pub fn config(&self) -> &PlaywrightConfig {
        &self.config
    }

    /// Build the Playwright script for one scenario
    pub fn build_script(&self, spec: &TestSpec) -> E2eResult<String> {
        let viewport = spec.viewport.unwrap_or(self.config.viewport);
        let failure_shot = if self.config.screenshot_on_failure {
            js_str(&self.screenshot_path(&spec.name, "failure"))
        } else {
            "null".to_string()
        };

        let mut script = String::new();

        // Header
        let _ = write!(
            script,
            r#"
const {{ chromium, firefox, webkit, expect: baseExpect }} = require('@playwright/test');
const expect = baseExpect.configure({{ timeout: {expect_timeout} }});
const emit = (event) => console.log({prefix} + JSON.stringify(event));

(async () => {{
  const failureShot = {failure_shot};
  let browser = null;
  let page = null;
  let current = null;
  let started = Date.now();
  let exitCode = 0;

  try {{
    browser = await {browser}.launch({{ headless: {headless} }});
    const context = await browser.newContext({{
      viewport: {{ width: {width}, height: {height} }}
    }});
    page = await context.newPage();
    page.setDefaultTimeout({action_timeout});
    page.setDefaultNavigationTimeout({navigation_timeout});
"#,
            expect_timeout = self.config.expect_timeout_ms,
            prefix = js_str(EVENT_PREFIX),
            browser = self.config.browser.as_str(),
            headless = self.config.headless,
            width = viewport.width,
            height = viewport.height,
            action_timeout = self.config.action_timeout_ms,
            navigation_timeout = self.config.navigation_timeout_ms,
            failure_shot = failure_shot,
        );

        // Generate step code
        for (i, step) in spec.steps.iter().enumerate() {
            let _ = writeln!(script, "\n    // Step {}: {}", i + 1, step.label());
            let _ = writeln!(script, "    current = {}; started = Date.now();", i);
            script.push_str(&self.step_to_js(&spec.name, step, i, 2)?);

            let shot = match step {
                TestStep::Screenshot { name, .. } => js_str(&self.screenshot_path(&spec.name, name)),
                _ => "null".to_string(),
            };
            let _ = writeln!(
                script,
                "    emit({{ event: 'step', index: {}, ms: Date.now() - started, screenshot: {} }});",
                i, shot
            );
        }

        // Footer
        script.push_str(
            r#"
    emit({ event: 'done' });
  } catch (error) {
    const ms = Date.now() - started;
    let screenshot = null;
    if (failureShot && page) {
      try {
        await page.screenshot({ path: failureShot, fullPage: true });
        screenshot = failureShot;
      } catch (_) {}
    }
    emit({ event: 'failure', index: current, ms, error: String((error && error.message) || error), screenshot });
    exitCode = 1;
  } finally {
    if (browser) await browser.close();
  }
  process.exit(exitCode);
})();
"#,
        );

        Ok(script)
    }

    /// Convert a step to JavaScript code
    fn step_to_js(&self, spec_name: &str, step: &TestStep, index: usize, depth: usize) -> E2eResult<String> {
        let pad = "  ".repeat(depth);

        let code = match step {
            TestStep::Navigate { url, wait_until } => {
                let resolved = self.resolve_url(url)?;
                format!(
                    "{pad}await page.goto({}, {{ waitUntil: {} }});\n",
                    js_str(resolved.as_str()),
                    js_str(wait_until.unwrap_or_default().as_str()),
                )
            }
            TestStep::Click { target, timeout_ms } => {
                let timeout = timeout_ms.unwrap_or(self.config.action_timeout_ms);
                format!("{pad}await {}.click({{ timeout: {} }});\n", locator_js(target), timeout)
            }
            TestStep::Fill { target, value } => {
                format!("{pad}await {}.fill({});\n", locator_js(target), js_str(value))
            }
            TestStep::Type { target, text, delay_ms } => {
                let delay = delay_ms.unwrap_or(0);
                match target {
                    Some(t) => format!(
                        "{pad}await {}.pressSequentially({}, {{ delay: {} }});\n",
                        locator_js(t),
                        js_str(text),
                        delay
                    ),
                    None => format!("{pad}await page.keyboard.type({}, {{ delay: {} }});\n", js_str(text), delay),
                }
            }
            TestStep::Press { target, key } => match target {
                Some(t) => format!("{pad}await {}.press({});\n", locator_js(t), js_str(key)),
                None => format!("{pad}await page.keyboard.press({});\n", js_str(key)),
            },
            TestStep::Wait { target, timeout_ms, state } => {
                format!(
                    "{pad}await {}.waitFor({{ state: {}, timeout: {} }});\n",
                    locator_js(target),
                    js_str(state.as_str()),
                    timeout_ms
                )
            }
            TestStep::Sleep { ms } => {
                format!("{pad}await page.waitForTimeout({});\n", ms)
            }
            TestStep::Assert { target, visible, text, text_contains, count } => {
                let loc = locator_js(target);
                let mut assertions = String::new();

                if let Some(vis) = visible {
                    let matcher = if *vis { "toBeVisible" } else { "toBeHidden" };
                    let _ = writeln!(assertions, "{pad}await expect({}).{}();", loc, matcher);
                }
                if let Some(t) = text {
                    let _ = writeln!(assertions, "{pad}await expect({}).toHaveText({});", loc, js_str(t));
                }
                if let Some(tc) = text_contains {
                    let _ = writeln!(assertions, "{pad}await expect({}).toContainText({});", loc, js_str(tc));
                }
                if let Some(c) = count {
                    let _ = writeln!(assertions, "{pad}await expect({}).toHaveCount({});", loc, c);
                }

                assertions
            }
            TestStep::ExpectTitle { pattern } => {
                format!("{pad}await expect(page).toHaveTitle({});\n", regex_js(pattern))
            }
            TestStep::ExpectUrl { pattern } => {
                format!("{pad}await expect(page).toHaveURL({});\n", regex_js(pattern))
            }
            TestStep::IfVisible { target, then, otherwise } => {
                let mut code = format!("{pad}if (await {}.isVisible()) {{\n", locator_js(target));
                let _ = writeln!(code, "{pad}  emit({{ event: 'branch', index: {}, taken: 'then' }});", index);
                for nested in then {
                    code.push_str(&self.step_to_js(spec_name, nested, index, depth + 1)?);
                }
                let _ = writeln!(code, "{pad}}} else {{");
                let _ = writeln!(code, "{pad}  emit({{ event: 'branch', index: {}, taken: 'else' }});", index);
                for nested in otherwise {
                    code.push_str(&self.step_to_js(spec_name, nested, index, depth + 1)?);
                }
                let _ = writeln!(code, "{pad}}}");
                code
            }
            TestStep::Screenshot { name, full_page } => {
                format!(
                    "{pad}await page.screenshot({{ path: {}, fullPage: {} }});\n",
                    js_str(&self.screenshot_path(spec_name, name)),
                    full_page
                )
            }
            TestStep::Log { message } => {
                format!("{pad}console.log({});\n", js_str(&format!("[TEST] {}", message)))
            }
        };

        Ok(code)
    }

    /// Resolve a navigation target against the base URL
    pub fn resolve_url(&self, url: &str) -> E2eResult<Url> {
        Ok(self.base_url.join(url)?)
    }

    fn screenshot_path(&self, spec_name: &str, shot: &str) -> String {
        let file = format!("{}-{}.png", sanitize(spec_name), sanitize(shot));
        self.screenshot_dir.join(file).to_string_lossy().into_owned()
    }

    /// Directory handed to node as `NODE_PATH`, if it exists
    fn node_path(&self) -> Option<PathBuf> {
        let dir = &self.config.node_modules;
        if dir.is_dir() {
            std::fs::canonicalize(dir).ok()
        } else {
            None
        }
    }

    /// Run one scenario in a fresh browser and collect its step results
    pub async fn run_spec(&self, spec: &TestSpec) -> E2eResult<Vec<StepResult>> {
        let script = self.build_script(spec)?;

        // Write script to temp file
        let temp_dir = tempfile::tempdir()?;
        let script_path = temp_dir.path().join("scenario.js");
        std::fs::write(&script_path, &script)?;

        debug!("Running Playwright script for '{}': {}", spec.name, script_path.display());

        let mut cmd = TokioCommand::new(&self.config.node_binary);
        cmd.arg(&script_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(node_path) = self.node_path() {
            cmd.env("NODE_PATH", node_path);
        }

        let limit = Duration::from_secs(self.config.scenario_timeout_secs);
        let output = tokio::time::timeout(limit, cmd.output())
            .await
            .map_err(|_| {
                E2eError::Timeout(format!("scenario '{}' after {}s", spec.name, limit.as_secs()))
            })??;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let events = parse_events(&stdout);
        let results = collect_step_results(spec, &events);

        let reported_failure = events.iter().any(|e| matches!(e, ScriptEvent::Failure { .. }));
        if !output.status.success() && !reported_failure {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(E2eError::Playwright(format!(
                "Script failed:\nstdout: {}\nstderr: {}",
                stdout, stderr
            )));
        }
        if output.status.success() && !events.contains(&ScriptEvent::Done) {
            warn!("Scenario '{}' exited cleanly without reporting completion", spec.name);
        }

        Ok(results)
    }
}

/// Parse event lines from script stdout, passing everything else to the log
pub fn parse_events(stdout: &str) -> Vec<ScriptEvent> {
    let mut events = Vec::new();

    for line in stdout.lines() {
        let Some(payload) = line.strip_prefix(EVENT_PREFIX) else {
            if line.starts_with("[TEST]") {
                info!("{}", line);
            } else if !line.trim().is_empty() {
                debug!("playwright: {}", line);
            }
            continue;
        };

        match serde_json::from_str::<ScriptEvent>(payload) {
            Ok(event) => events.push(event),
            Err(e) => warn!("Unparseable script event {:?}: {}", payload, e),
        }
    }

    events
}

/// Fold script events into one result per executed top-level step
pub fn collect_step_results(spec: &TestSpec, events: &[ScriptEvent]) -> Vec<StepResult> {
    let label = |index: Option<usize>| {
        index
            .and_then(|i| spec.steps.get(i))
            .map(TestStep::label)
            .unwrap_or_else(|| "setup".to_string())
    };

    let mut branches: HashMap<usize, Branch> = HashMap::new();
    let mut results = Vec::new();

    for event in events {
        match event {
            ScriptEvent::Branch { index, taken } => {
                branches.insert(*index, *taken);
            }
            ScriptEvent::Step { index, ms, screenshot } => results.push(StepResult {
                success: true,
                step_name: label(Some(*index)),
                duration_ms: *ms,
                error: None,
                screenshot_path: screenshot.clone(),
                branch: branches.remove(index),
            }),
            ScriptEvent::Failure { index, ms, error, screenshot } => results.push(StepResult {
                success: false,
                step_name: label(*index),
                duration_ms: *ms,
                error: Some(error.clone()),
                screenshot_path: screenshot.clone(),
                branch: index.and_then(|i| branches.remove(&i)),
            }),
            ScriptEvent::Done => {}
        }
    }

    results
}

/// JavaScript locator expression for a target
pub fn locator_js(target: &Target) -> String {
    let mut js = if let Some(css) = &target.css {
        format!("page.locator({})", js_str(css))
    } else if let Some(role) = &target.role {
        match &target.name {
            Some(name) if target.exact => {
                format!("page.getByRole({}, {{ name: {}, exact: true }})", js_str(role), js_str(name))
            }
            Some(name) => format!("page.getByRole({}, {{ name: {} }})", js_str(role), js_str(name)),
            None => format!("page.getByRole({})", js_str(role)),
        }
    } else if let Some(text) = &target.text {
        format!("page.getByText({})", js_str(text))
    } else {
        // Rejected by validation before rendering
        "page.locator(':root')".to_string()
    };

    if target.first {
        js.push_str(".first()");
    }
    js
}

/// JSON string literals are valid JavaScript string literals
fn js_str(s: &str) -> String {
    serde_json::Value::from(s).to_string()
}

fn regex_js(pattern: &str) -> String {
    format!("new RegExp({})", js_str(pattern))
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Configuration for Playwright
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaywrightConfig {
    pub browser: Browser,
    pub headless: bool,
    pub viewport: Viewport,

    /// Default timeout for clicks, fills and waits
    pub action_timeout_ms: u64,
    pub navigation_timeout_ms: u64,
    /// Auto-retry window for `expect` assertions
    pub expect_timeout_ms: u64,
    /// Hard limit for a whole scenario, browser launch included
    pub scenario_timeout_secs: u64,

    pub screenshot_dir: PathBuf,
    pub screenshot_on_failure: bool,

    pub node_binary: String,
    pub npx_binary: String,
    /// `node_modules` that holds `@playwright/test`
    pub node_modules: PathBuf,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            browser: Browser::Chromium,
            headless: true,
            viewport: Viewport::default(),
            action_timeout_ms: 5000,
            navigation_timeout_ms: 30_000,
            expect_timeout_ms: 5000,
            scenario_timeout_secs: 60,
            screenshot_dir: PathBuf::from("test-results/screenshots"),
            screenshot_on_failure: true,
            node_binary: "node".to_string(),
            npx_binary: "npx".to_string(),
            node_modules: PathBuf::from("node_modules"),
        }
    }
}

impl PlaywrightConfig {
    /// Point screenshots under an output directory
    pub fn with_output_dir(mut self, output_dir: &Path) -> Self {
        self.screenshot_dir = output_dir.join("screenshots");
        self
    }
}
