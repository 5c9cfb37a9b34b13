//! Documentation site E2E suite
//!
//! This crate drives Playwright from Rust to check a public documentation
//! site (`https://playwright.dev/` by default):
//! - Declares scenarios as YAML specs (three are built in)
//! - Renders each scenario into a Node.js script for `@playwright/test`
//! - Runs scenarios concurrently with retries and collects step results
//! - Writes a JSON results file
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    E2E Test Runner (Rust)                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TestRunner                                                 │
//! │    ├── prepare() -> SiteProbe + PlaywrightHandle            │
//! │    ├── run_spec(spec: TestSpec) -> TestResult (retries)     │
//! │    └── write_results(TestSuiteResult)                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TestSpec (YAML)                                            │
//! │    ├── name, description, tags, viewport                    │
//! │    └── steps: [Step]                                        │
//! │          ├── navigate { url }                               │
//! │          ├── click / fill / type / press { target }         │
//! │          ├── wait { target } | sleep { ms }                 │
//! │          ├── assert { target, visible?, text?, count? }     │
//! │          ├── expect_title / expect_url { pattern }          │
//! │          └── if_visible { target, then, else }              │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod playwright;
pub mod runner;
pub mod site;
pub mod spec;
pub mod suite;

pub use config::RunnerConfig;
pub use error::{E2eError, E2eResult};
pub use runner::{TestRunner, TestSuiteResult};
pub use spec::{Target, TestSpec, TestStep};
