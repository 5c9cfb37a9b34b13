//! Declarative YAML test specification

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;

use crate::error::{E2eError, E2eResult};

/// A complete test specification parsed from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSpec {
    /// Unique name for this test
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Tags for filtering tests
    #[serde(default)]
    pub tags: Vec<String>,

    /// Viewport size for the browser
    #[serde(default)]
    pub viewport: Option<Viewport>,

    /// Steps to execute in order
    pub steps: Vec<TestStep>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self { width: 1280, height: 720 }
    }
}

/// How to find an element on the page.
///
/// Exactly one of `css`, `role` or `text` must be set. `name` and `exact`
/// only apply to role lookups.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Target {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub css: Option<String>,

    /// ARIA role, e.g. `heading`, `link`, `button`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Accessible name for role lookups
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default)]
    pub exact: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Narrow the match to the first element
    #[serde(default)]
    pub first: bool,
}

impl Target {
    pub fn css(selector: impl Into<String>) -> Self {
        Self { css: Some(selector.into()), ..Default::default() }
    }

    pub fn role(role: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            role: Some(role.into()),
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn first(mut self) -> Self {
        self.first = true;
        self
    }

    /// Check that exactly one lookup strategy is configured
    pub fn validate(&self) -> Result<(), String> {
        let strategies = [self.css.is_some(), self.role.is_some(), self.text.is_some()]
            .iter()
            .filter(|set| **set)
            .count();

        match strategies {
            0 => Err("target needs one of css, role or text".to_string()),
            1 => {
                if self.role.is_none() && (self.name.is_some() || self.exact) {
                    return Err("name/exact only apply to role targets".to_string());
                }
                Ok(())
            }
            _ => Err(format!("target sets more than one of css, role, text: {}", self.describe())),
        }
    }

    /// Short human-readable form used in step names and logs
    pub fn describe(&self) -> String {
        let mut out = if let Some(css) = &self.css {
            format!("css={}", css)
        } else if let Some(role) = &self.role {
            match &self.name {
                Some(name) => format!("role={}[name=\"{}\"]", role, name),
                None => format!("role={}", role),
            }
        } else if let Some(text) = &self.text {
            format!("text=\"{}\"", text)
        } else {
            "<empty>".to_string()
        };

        if self.first {
            out.push_str(" >> first");
        }
        out
    }
}

/// A single step in a test
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TestStep {
    /// Navigate to a URL (absolute, or relative to the base URL)
    Navigate {
        url: String,
        #[serde(default)]
        wait_until: Option<WaitUntil>,
    },

    /// Click an element
    Click {
        target: Target,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Fill an input field
    Fill {
        target: Target,
        value: String,
    },

    /// Type text with keyboard simulation. Without a target the keystrokes go
    /// to whatever element currently has focus.
    Type {
        #[serde(default)]
        target: Option<Target>,
        text: String,
        #[serde(default)]
        delay_ms: Option<u64>,
    },

    /// Press a key
    Press {
        #[serde(default)]
        target: Option<Target>,
        key: String,
    },

    /// Wait for an element to reach a state
    Wait {
        target: Target,
        #[serde(default = "default_wait_timeout")]
        timeout_ms: u64,
        #[serde(default)]
        state: WaitState,
    },

    /// Wait for a fixed amount of time (use sparingly)
    Sleep {
        ms: u64,
    },

    /// Assert something about an element
    Assert {
        target: Target,
        #[serde(default)]
        visible: Option<bool>,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        text_contains: Option<String>,
        #[serde(default)]
        count: Option<usize>,
    },

    /// Assert the page title matches a regular expression
    ExpectTitle {
        pattern: String,
    },

    /// Assert the page URL matches a regular expression
    ExpectUrl {
        pattern: String,
    },

    /// Run `then` when the target is visible right now, `else` otherwise.
    /// Visibility is sampled once, without waiting.
    IfVisible {
        target: Target,
        #[serde(default)]
        then: Vec<TestStep>,
        #[serde(default, rename = "else")]
        otherwise: Vec<TestStep>,
    },

    /// Take a screenshot
    Screenshot {
        name: String,
        #[serde(default)]
        full_page: bool,
    },

    /// Log a message (for debugging)
    Log {
        message: String,
    },
}

fn default_wait_timeout() -> u64 {
    5000 // 5 seconds default
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitState {
    #[default]
    Visible,
    Hidden,
    Attached,
    Detached,
}

impl WaitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitState::Visible => "visible",
            WaitState::Hidden => "hidden",
            WaitState::Attached => "attached",
            WaitState::Detached => "detached",
        }
    }
}

/// Load state `page.goto` waits for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitUntil {
    #[default]
    Load,
    DomContentLoaded,
    NetworkIdle,
    Commit,
}

impl WaitUntil {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitUntil::Load => "load",
            WaitUntil::DomContentLoaded => "domcontentloaded",
            WaitUntil::NetworkIdle => "networkidle",
            WaitUntil::Commit => "commit",
        }
    }
}

impl TestStep {
    /// Short label used in logs and results
    pub fn label(&self) -> String {
        match self {
            TestStep::Navigate { url, .. } => format!("navigate:{}", url),
            TestStep::Click { target, .. } => format!("click:{}", target.describe()),
            TestStep::Fill { target, .. } => format!("fill:{}", target.describe()),
            TestStep::Type { target: Some(t), .. } => format!("type:{}", t.describe()),
            TestStep::Type { target: None, .. } => "type:keyboard".to_string(),
            TestStep::Press { key, .. } => format!("press:{}", key),
            TestStep::Wait { target, .. } => format!("wait:{}", target.describe()),
            TestStep::Sleep { ms } => format!("sleep:{}ms", ms),
            TestStep::Assert { target, .. } => format!("assert:{}", target.describe()),
            TestStep::ExpectTitle { pattern } => format!("expect_title:/{}/", pattern),
            TestStep::ExpectUrl { pattern } => format!("expect_url:/{}/", pattern),
            TestStep::IfVisible { target, .. } => format!("if_visible:{}", target.describe()),
            TestStep::Screenshot { name, .. } => format!("screenshot:{}", name),
            TestStep::Log { message } => {
                let cut: String = message.chars().take(30).collect();
                format!("log:{}", cut)
            }
        }
    }

    fn validate(&self) -> Result<(), String> {
        match self {
            TestStep::Navigate { url, .. } if url.trim().is_empty() => {
                Err("navigate url is empty".to_string())
            }
            TestStep::Click { target, .. }
            | TestStep::Fill { target, .. }
            | TestStep::Wait { target, .. } => target.validate(),
            TestStep::Type { target, .. } | TestStep::Press { target, .. } => {
                target.as_ref().map_or(Ok(()), Target::validate)
            }
            TestStep::Assert { target, visible, text, text_contains, count } => {
                target.validate()?;
                if visible.is_none() && text.is_none() && text_contains.is_none() && count.is_none() {
                    return Err(format!("assert on {} checks nothing", target.describe()));
                }
                Ok(())
            }
            TestStep::ExpectTitle { pattern } | TestStep::ExpectUrl { pattern } => {
                check_pattern(pattern)
            }
            TestStep::IfVisible { target, then, otherwise } => {
                target.validate()?;
                then.iter().chain(otherwise.iter()).try_for_each(TestStep::validate)
            }
            TestStep::Screenshot { name, .. } if name.contains(['/', '\\']) => {
                Err(format!("screenshot name '{}' must not contain path separators", name))
            }
            _ => Ok(()),
        }
    }
}

/// Patterns run as JavaScript `new RegExp(pattern)` in the browser, so they
/// are checked with an ECMAScript engine. JS silently reads `\A`, `\z` and
/// `\Z` as the literal letters, so those anchors are refused outright.
fn check_pattern(pattern: &str) -> Result<(), String> {
    static NON_JS_ANCHOR: OnceLock<regex::Regex> = OnceLock::new();
    let anchor = NON_JS_ANCHOR.get_or_init(|| {
        regex::Regex::new(r"(?:^|[^\\])(?:\\\\)*\\([AzZ])").expect("static pattern")
    });

    if let Some(caps) = anchor.captures(pattern) {
        return Err(format!(
            "bad pattern /{}/: \\{} is not an anchor in JavaScript, use ^ or $",
            pattern, &caps[1]
        ));
    }

    regress::Regex::new(pattern)
        .map(|_| ())
        .map_err(|e| format!("bad pattern /{}/: {}", pattern, e))
}

impl TestSpec {
    /// Parse a test spec from YAML string
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let spec: Self = serde_yaml::from_str(yaml)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Parse a test spec from a YAML file
    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
            .map_err(|e| E2eError::SpecParse(format!("{}: {}", path.display(), e)))
    }

    /// Load all test specs from a directory, in path order
    pub fn load_all(dir: &Path) -> E2eResult<Vec<Self>> {
        let mut specs = Vec::new();

        for entry in walkdir::WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
        {
            let spec = Self::from_file(entry.path())?;
            specs.push(spec);
        }

        ensure_unique_names(&specs)?;
        Ok(specs)
    }

    /// Filter specs by tag
    pub fn filter_by_tag<'a>(specs: &'a [Self], tag: &str) -> Vec<&'a Self> {
        specs.iter().filter(|s| s.tags.iter().any(|t| t == tag)).collect()
    }

    /// Reject specs the browser could never run
    pub fn validate(&self) -> E2eResult<()> {
        let invalid = |reason: String| E2eError::InvalidSpec {
            spec: self.name.clone(),
            reason,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name is empty".to_string()));
        }
        if self.steps.is_empty() {
            return Err(invalid("no steps".to_string()));
        }
        for (i, step) in self.steps.iter().enumerate() {
            step.validate()
                .map_err(|reason| invalid(format!("step {}: {}", i + 1, reason)))?;
        }
        Ok(())
    }
}

/// Spec names key the results file, so they must not collide
pub fn ensure_unique_names(specs: &[TestSpec]) -> E2eResult<()> {
    let mut seen = HashSet::new();
    for spec in specs {
        if !seen.insert(spec.name.as_str()) {
            return Err(E2eError::InvalidSpec {
                spec: spec.name.clone(),
                reason: "duplicate test name".to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_parse_simple_spec() {
        let yaml = r#"
name: docs-link
description: Follow the Docs link
tags:
  - smoke
steps:
  - action: navigate
    url: /
  - action: click
    target:
      role: link
      name: Docs
  - action: expect_url
    pattern: '.*docs'
"#;
        let spec = TestSpec::from_yaml(yaml).unwrap();
        assert_eq!(spec.name, "docs-link");
        assert_eq!(spec.steps.len(), 3);
        assert!(spec.viewport.is_none());
        match &spec.steps[1] {
            TestStep::Click { target, timeout_ms } => {
                assert_eq!(target, &Target::role("link", "Docs"));
                assert!(timeout_ms.is_none());
            }
            other => panic!("unexpected step: {:?}", other),
        }
    }

    #[test]
    fn test_parse_conditional_spec() {
        let yaml = r#"
name: search
viewport:
  width: 1920
  height: 1080
steps:
  - action: navigate
    url: https://playwright.dev/
    wait_until: domcontentloaded
  - action: if_visible
    target:
      css: 'button[aria-label*="Search"]'
      first: true
    then:
      - action: click
        target:
          css: 'button[aria-label*="Search"]'
          first: true
      - action: type
        text: test
    else:
      - action: log
        message: no search button
"#;
        let spec = TestSpec::from_yaml(yaml).unwrap();
        assert_eq!(spec.viewport, Some(Viewport { width: 1920, height: 1080 }));
        match &spec.steps[1] {
            TestStep::IfVisible { target, then, otherwise } => {
                assert!(target.first);
                assert_eq!(then.len(), 2);
                assert_eq!(otherwise.len(), 1);
                assert!(matches!(&then[1], TestStep::Type { target: None, .. }));
            }
            other => panic!("unexpected step: {:?}", other),
        }
    }

    #[test]
    fn test_target_needs_exactly_one_strategy() {
        assert!(Target::default().validate().is_err());
        assert!(Target::css("h1").validate().is_ok());

        let both = Target {
            css: Some("h1".into()),
            role: Some("heading".into()),
            ..Default::default()
        };
        assert!(both.validate().is_err());

        let stray_name = Target {
            css: Some("a".into()),
            name: Some("Docs".into()),
            ..Default::default()
        };
        assert!(stray_name.validate().is_err());
    }

    #[test]
    fn test_target_describe() {
        assert_eq!(Target::role("link", "Docs").describe(), r#"role=link[name="Docs"]"#);
        assert_eq!(Target::css("button").first().describe(), "css=button >> first");
    }

    #[test]
    fn test_rejects_bad_title_pattern() {
        let yaml = r#"
name: broken
steps:
  - action: expect_title
    pattern: '(Playwright'
"#;
        let err = TestSpec::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, E2eError::InvalidSpec { .. }), "got {err}");
    }

    #[test_case("(?i)playwright"; "inline flags")]
    #[test_case("(?P<d>docs)"; "python named group")]
    #[test_case(r"\Adocs\z"; "string anchors")]
    #[test_case(r"docs\Z"; "end anchor")]
    fn test_rejects_patterns_javascript_cannot_run(pattern: &str) {
        let step = TestStep::ExpectUrl { pattern: pattern.to_string() };
        assert!(step.validate().is_err(), "{pattern} should be rejected");
    }

    #[test_case(".*docs"; "plain")]
    #[test_case("docs(?=/intro)"; "lookahead")]
    #[test_case(r"(d)\1"; "backreference")]
    #[test_case(r"Play\\A"; "escaped backslash before letter")]
    #[test_case("(?<d>docs)"; "named group")]
    fn test_accepts_javascript_patterns(pattern: &str) {
        let step = TestStep::ExpectTitle { pattern: pattern.to_string() };
        assert!(step.validate().is_ok(), "{pattern} should be accepted");
    }

    #[test]
    fn test_rejects_empty_steps_and_nested_bad_target() {
        assert!(TestSpec::from_yaml("name: empty\nsteps: []\n").is_err());

        let yaml = r#"
name: nested
steps:
  - action: if_visible
    target: { css: button }
    then:
      - action: click
        target: {}
"#;
        let err = TestSpec::from_yaml(yaml).unwrap_err().to_string();
        assert!(err.contains("step 1"), "{err}");
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let spec = TestSpec::from_yaml("name: a\nsteps:\n  - action: sleep\n    ms: 1\n").unwrap();
        assert!(ensure_unique_names(&[spec.clone(), spec]).is_err());
    }

    #[test]
    fn test_load_all_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("b.yaml"),
            "name: second\ntags: [smoke]\nsteps:\n  - action: sleep\n    ms: 1\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("a.yml"),
            "name: first\nsteps:\n  - action: sleep\n    ms: 1\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let specs = TestSpec::load_all(dir.path()).unwrap();
        let names: Vec<_> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["first", "second"]);

        let smoke = TestSpec::filter_by_tag(&specs, "smoke");
        assert_eq!(smoke.len(), 1);
        assert_eq!(smoke[0].name, "second");
    }
}
