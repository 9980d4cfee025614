//! Scenario runner: driver lifecycle, per-scenario sessions, result files

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::time::{timeout, timeout_at};
use tracing::{debug, error, info, warn};

use crate::driver::{DriverConfig, DriverHandle};
use crate::error::{E2eError, E2eResult};
use crate::page::{BrowserConfig, TodoPage};
use crate::report::{
    history_id, now_millis, AllureResult, Label, ReportConfig, ResultsWriter, Stage, Status,
    StatusDetails,
};
use crate::scenarios::{cases, Case, ScenarioContext};
use crate::step::Recording;
use crate::visual::{VisualConfig, VisualTester};

/// Result of running a single scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub suite: String,
    pub name: String,
    pub success: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
    /// Steps open when the failure surfaced, outermost first
    #[serde(default)]
    pub failure_path: Vec<String>,
    pub result_file: Option<PathBuf>,
}

impl TestResult {
    pub fn full_name(&self) -> String {
        format!("{}: {}", self.suite, self.name)
    }
}

/// Result of running a selection of scenarios
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuiteResult {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub results: Vec<TestResult>,
}

impl TestSuiteResult {
    fn from_results(results: Vec<TestResult>, duration_ms: u64) -> Self {
        let passed = results.iter().filter(|r| r.success).count();
        Self {
            total: results.len(),
            passed,
            failed: results.len() - passed,
            duration_ms,
            results,
        }
    }
}

/// Which scenarios to run; empty selects everything
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Exact suite name
    pub suite: Option<String>,
    /// Substring of "<suite>: <scenario>"
    pub grep: Option<String>,
    /// Exact scenario name or full name
    pub name: Option<String>,
}

pub fn select_cases(all: Vec<Case>, selection: &Selection) -> Vec<Case> {
    all.into_iter()
        .filter(|case| selection.suite.as_deref().map_or(true, |s| case.suite == s))
        .filter(|case| {
            selection
                .grep
                .as_deref()
                .map_or(true, |g| case.full_name().contains(g))
        })
        .filter(|case| {
            selection
                .name
                .as_deref()
                .map_or(true, |n| case.name == n || case.full_name() == n)
        })
        .collect()
}

/// Main E2E test runner
pub struct TestRunner {
    config: RunnerConfig,

    /// Running WebDriver (if any)
    driver: Option<DriverHandle>,
}

impl TestRunner {
    pub fn new() -> Self {
        Self::with_config(RunnerConfig::default())
    }

    pub fn with_config(config: RunnerConfig) -> Self {
        Self {
            config,
            driver: None,
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Start (or attach to) the WebDriver endpoint
    pub async fn start_driver(&mut self) -> E2eResult<()> {
        if self.driver.is_some() {
            return Ok(()); // Already running
        }

        let driver = DriverHandle::start(&self.config.driver, self.config.browser.browser).await?;
        self.driver = Some(driver);
        Ok(())
    }

    pub fn stop_driver(&mut self) -> E2eResult<()> {
        if let Some(mut driver) = self.driver.take() {
            driver.stop()?;
        }
        Ok(())
    }

    /// Full names of all scenarios, in declaration order
    pub fn list(&self) -> Vec<String> {
        cases().iter().map(Case::full_name).collect()
    }

    pub async fn run_all(&mut self) -> E2eResult<TestSuiteResult> {
        self.run_selection(&Selection::default()).await
    }

    pub async fn run_suite(&mut self, suite: &str) -> E2eResult<TestSuiteResult> {
        self.run_selection(&Selection {
            suite: Some(suite.to_string()),
            ..Default::default()
        })
        .await
    }

    pub async fn run_matching(&mut self, pattern: &str) -> E2eResult<TestSuiteResult> {
        self.run_selection(&Selection {
            grep: Some(pattern.to_string()),
            ..Default::default()
        })
        .await
    }

    /// Run one scenario by name or full name
    pub async fn run_test(&mut self, name: &str) -> E2eResult<TestResult> {
        let selected = select_cases(
            cases(),
            &Selection {
                name: Some(name.to_string()),
                ..Default::default()
            },
        );
        if selected.is_empty() {
            return Err(E2eError::Config(format!("Scenario not found: {}", name)));
        }

        let mut suite = self.run_cases(&selected[..1]).await?;
        Ok(suite.results.remove(0))
    }

    pub async fn run_selection(&mut self, selection: &Selection) -> E2eResult<TestSuiteResult> {
        let selected = select_cases(cases(), selection);
        self.run_cases(&selected).await
    }

    /// Run scenarios with up to `workers` sessions at once.
    /// Results come back in the order the scenarios were given.
    pub async fn run_cases(&mut self, selected: &[Case]) -> E2eResult<TestSuiteResult> {
        let start = Instant::now();

        self.start_driver().await?;
        let writer = self.prepare_results_dir()?;

        let this = &*self;
        let driver_url = match &this.driver {
            Some(driver) => driver.url(),
            None => return Err(E2eError::DriverStartup("WebDriver not running".to_string())),
        };
        let writer = &writer;
        let workers = this.config.workers.max(1);

        info!("Running {} scenario(s) with {} worker(s)...", selected.len(), workers);

        let mut indexed: Vec<(usize, TestResult)> = stream::iter(selected.iter().copied().enumerate())
            .map(move |(i, case)| async move { (i, this.run_case(driver_url, writer, case).await) })
            .buffer_unordered(workers)
            .collect()
            .await;
        indexed.sort_by_key(|(i, _)| *i);

        let results: Vec<TestResult> = indexed.into_iter().map(|(_, r)| r).collect();
        let suite = TestSuiteResult::from_results(results, start.elapsed().as_millis() as u64);

        info!("");
        info!(
            "Test Results: {} passed, {} failed ({} ms)",
            suite.passed, suite.failed, suite.duration_ms
        );

        Ok(suite)
    }

    fn prepare_results_dir(&self) -> E2eResult<ResultsWriter> {
        let writer = ResultsWriter::new(&self.config.report.results_dir)?;
        if self.config.report.clean {
            writer.clean()?;
        }
        writer.write_environment(&[
            ("base_url", self.config.browser.base_url.clone()),
            ("browser", self.config.browser.browser.as_str().to_string()),
            ("headless", self.config.browser.headless.to_string()),
            ("workers", self.config.workers.to_string()),
        ])?;
        Ok(writer)
    }

    /// Run one scenario in its own session. Never fails: every problem
    /// ends up in the returned result.
    async fn run_case(&self, driver_url: &str, writer: &ResultsWriter, case: Case) -> TestResult {
        let start_ms = now_millis();
        let started = Instant::now();
        debug!("Running scenario: {}", case.full_name());

        let visual = if self.config.visual.enabled {
            match VisualTester::new(&self.config.visual) {
                Ok(visual) => Some(visual),
                Err(e) => {
                    return self.finish_case(case, writer, start_ms, started, Recording::default(), Err(e))
                }
            }
        } else {
            None
        };

        let budget = self.config.scenario_timeout();
        let deadline = tokio::time::Instant::now() + budget;

        let session = TodoPage::open(driver_url, &self.config.browser);
        let page = match within_budget(deadline, budget, session).await {
            Ok(page) => page,
            Err(e) => {
                return self.finish_case(case, writer, start_ms, started, Recording::default(), Err(e))
            }
        };

        let ctx = ScenarioContext::new(
            page,
            self.config.report.results_dir.join("screenshots"),
            case.slug(),
            visual,
        );

        let outcome = within_budget(deadline, budget, run_body(&ctx, case)).await;

        if outcome.is_err() && self.config.report.screenshot_on_failure {
            let grace = self.config.browser.expect_policy().timeout;
            match timeout(grace, ctx.page.screenshot_png()).await {
                Ok(Ok(png)) => {
                    ctx.steps.attach("Screenshot on failure", "image/png", png);
                }
                Ok(Err(e)) => warn!("Could not capture failure screenshot: {}", e),
                Err(_) => warn!("Timed out capturing failure screenshot"),
            }
        }

        let (page, steps) = ctx.into_parts();
        if let Err(e) = page.close().await {
            warn!("Failed to close browser session: {}", e);
        }

        self.finish_case(case, writer, start_ms, started, steps.finish(), outcome)
    }

    fn finish_case(
        &self,
        case: Case,
        writer: &ResultsWriter,
        start_ms: i64,
        started: Instant,
        recording: Recording,
        outcome: E2eResult<()>,
    ) -> TestResult {
        let full_name = case.full_name();
        let (status, details) = match &outcome {
            Ok(()) => (Status::Passed, None),
            Err(e) if e.is_assertion() => (Status::Failed, Some(StatusDetails::message(e.to_string()))),
            Err(e) => (Status::Broken, Some(StatusDetails::message(e.to_string()))),
        };

        let result = AllureResult {
            uuid: uuid::Uuid::new_v4().to_string(),
            history_id: history_id(&full_name),
            name: case.name.to_string(),
            full_name: full_name.clone(),
            status,
            status_details: details,
            stage: Stage::Finished,
            start: start_ms,
            stop: now_millis(),
            steps: recording.steps,
            attachments: recording.attachments,
            labels: vec![
                Label::new("suite", case.suite),
                Label::new("language", "rust"),
                Label::new("framework", "thirtyfour"),
            ],
        };

        let result_file = match writer.write_result(&result, &recording.contents) {
            Ok(path) => Some(path),
            Err(e) => {
                error!("Failed to write result for {}: {}", full_name, e);
                None
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let error = outcome.err().map(|e| e.to_string());

        match &error {
            None => info!("✓ {} ({} ms)", full_name, duration_ms),
            Some(message) if recording.failure_path.is_empty() => {
                error!("✗ {} - {}", full_name, message)
            }
            Some(message) => error!(
                "✗ {} - {} [{}]",
                full_name,
                message,
                recording.failure_path.join(" > ")
            ),
        }

        TestResult {
            suite: case.suite.to_string(),
            name: case.name.to_string(),
            success: error.is_none(),
            duration_ms,
            error,
            failure_path: recording.failure_path,
            result_file,
        }
    }

    /// Write the run summary as JSON
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

impl Drop for TestRunner {
    fn drop(&mut self) {
        let _ = self.stop_driver();
    }
}

/// Run `work` unless the scenario's `deadline` passes first. Session setup
/// and the body share one deadline, so `budget` covers both.
async fn within_budget<T, Fut>(
    deadline: tokio::time::Instant,
    budget: Duration,
    work: Fut,
) -> E2eResult<T>
where
    Fut: Future<Output = E2eResult<T>>,
{
    match timeout_at(deadline, work).await {
        Ok(outcome) => outcome,
        Err(_) => Err(E2eError::ScenarioTimeout(budget.as_millis() as u64)),
    }
}

/// Shared setup, suite setup, then the scenario itself
async fn run_body(ctx: &ScenarioContext, case: Case) -> E2eResult<()> {
    ctx.steps
        .step("Navigate to TodoMVC App", ctx.page.goto_app())
        .await?;

    if let Some(before_each) = case.before_each {
        before_each(ctx).await?;
    }

    (case.body)(ctx).await
}

/// Configuration for the test runner
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub driver: DriverConfig,
    pub browser: BrowserConfig,
    pub report: ReportConfig,
    pub visual: VisualConfig,
    /// Scenarios run concurrently, each in its own session
    pub workers: usize,
    /// Budget for one scenario: session creation, navigation, suite setup and body
    pub scenario_timeout_ms: u64,
    /// Where the JSON run summary goes
    pub output_dir: PathBuf,
}

impl RunnerConfig {
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        serde_yaml::from_str(yaml).map_err(E2eError::from)
    }

    /// Load from a YAML file; a missing file yields the defaults
    pub fn load(path: &Path) -> E2eResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Self::from_yaml(&content)
        } else {
            Ok(Self::default())
        }
    }

    pub fn scenario_timeout(&self) -> Duration {
        Duration::from_millis(self.scenario_timeout_ms)
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            driver: DriverConfig::default(),
            browser: BrowserConfig::default(),
            report: ReportConfig::default(),
            visual: VisualConfig::default(),
            workers: 1,
            scenario_timeout_ms: 30_000,
            output_dir: PathBuf::from("test-results"),
        }
    }
}
