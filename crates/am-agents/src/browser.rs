//! Headless-browser test execution.
//!
//! The tester stage asks the model for test-case descriptors and runs each
//! one against a headless browser through the [`BrowserRunner`] seam. The
//! real runner shells out to a discovered Chrome/Chromium binary; tests use
//! [`ScriptedRunner`].

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use am_core::types::{CaseResult, CaseStatus};

/// Well-known browser locations probed when `CHROME_PATH` is unset.
const KNOWN_BROWSER_PATHS: &[&str] = &[
    "/usr/bin/google-chrome",
    "/usr/bin/google-chrome-stable",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
];

/// One model-synthesized test case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub name: String,
    pub description: String,
}

// ---------------------------------------------------------------------------
// BrowserRunner
// ---------------------------------------------------------------------------

#[async_trait]
pub trait BrowserRunner: Send + Sync {
    /// Environment check, performed once per test round. `Err` carries a
    /// structured reason (e.g. no binary found) and must not panic.
    fn availability(&self) -> Result<(), String>;

    /// Execute one case. Always returns a result; failures are expressed in
    /// the case status, never as a crash.
    async fn run_case(&self, case: &TestCase) -> CaseResult;
}

// ---------------------------------------------------------------------------
// HeadlessChrome
// ---------------------------------------------------------------------------

/// Runs each case by loading the application in a headless browser and
/// checking that the page renders.
pub struct HeadlessChrome {
    binary: Option<PathBuf>,
    app_url: String,
    case_timeout: Duration,
}

impl HeadlessChrome {
    /// Discover the browser binary: an explicit path wins, otherwise the
    /// well-known locations are probed. A missing binary is not an error
    /// here -- `availability` reports it when the tester actually runs.
    pub fn discover(explicit_path: Option<&str>, app_url: impl Into<String>) -> Self {
        let binary = explicit_path
            .map(PathBuf::from)
            .filter(|p| p.exists())
            .or_else(|| {
                KNOWN_BROWSER_PATHS
                    .iter()
                    .map(PathBuf::from)
                    .find(|p| p.exists())
            });
        Self {
            binary,
            app_url: app_url.into(),
            case_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_case_timeout(mut self, timeout: Duration) -> Self {
        self.case_timeout = timeout;
        self
    }
}

#[async_trait]
impl BrowserRunner for HeadlessChrome {
    fn availability(&self) -> Result<(), String> {
        match &self.binary {
            Some(path) => {
                debug!(binary = %path.display(), "headless browser located");
                Ok(())
            }
            None => Err(format!(
                "headless browser binary not found (set CHROME_PATH or install one of: {})",
                KNOWN_BROWSER_PATHS.join(", ")
            )),
        }
    }

    async fn run_case(&self, case: &TestCase) -> CaseResult {
        let Some(binary) = &self.binary else {
            return CaseResult {
                name: case.name.clone(),
                status: CaseStatus::Failed,
                error: Some("no browser binary".into()),
            };
        };

        let mut cmd = tokio::process::Command::new(binary);
        cmd.args([
            "--headless=new",
            "--disable-gpu",
            "--no-sandbox",
            "--virtual-time-budget=5000",
            "--dump-dom",
            &self.app_url,
        ]);
        cmd.kill_on_drop(true);

        let outcome = tokio::time::timeout(self.case_timeout, cmd.output()).await;
        match outcome {
            Ok(Ok(output)) if output.status.success() && !output.stdout.is_empty() => CaseResult {
                name: case.name.clone(),
                status: CaseStatus::Passed,
                error: None,
            },
            Ok(Ok(output)) => CaseResult {
                name: case.name.clone(),
                status: CaseStatus::Failed,
                error: Some(format!(
                    "browser exited {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                )),
            },
            Ok(Err(e)) => CaseResult {
                name: case.name.clone(),
                status: CaseStatus::Failed,
                error: Some(format!("failed to launch browser: {e}")),
            },
            Err(_) => CaseResult {
                name: case.name.clone(),
                status: CaseStatus::Failed,
                error: Some(format!("case timed out after {:?}", self.case_timeout)),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// ScriptedRunner
// ---------------------------------------------------------------------------

/// Test double: each queued `bool` answers one case in order; an exhausted
/// queue passes everything.
pub struct ScriptedRunner {
    available: Result<(), String>,
    outcomes: Mutex<VecDeque<bool>>,
}

impl ScriptedRunner {
    pub fn passing() -> Self {
        Self {
            available: Ok(()),
            outcomes: Mutex::new(VecDeque::new()),
        }
    }

    /// Queue explicit per-case outcomes (`true` = pass).
    pub fn with_outcomes(outcomes: impl IntoIterator<Item = bool>) -> Self {
        Self {
            available: Ok(()),
            outcomes: Mutex::new(outcomes.into_iter().collect()),
        }
    }

    /// Simulate a missing browser environment.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            available: Err(reason.into()),
            outcomes: Mutex::new(VecDeque::new()),
        }
    }
}

#[async_trait]
impl BrowserRunner for ScriptedRunner {
    fn availability(&self) -> Result<(), String> {
        self.available.clone()
    }

    async fn run_case(&self, case: &TestCase) -> CaseResult {
        let pass = self.outcomes.lock().unwrap().pop_front().unwrap_or(true);
        CaseResult {
            name: case.name.clone(),
            status: if pass {
                CaseStatus::Passed
            } else {
                CaseStatus::Failed
            },
            error: if pass {
                None
            } else {
                Some("scripted failure".into())
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
