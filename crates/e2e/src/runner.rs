//! Main test runner that orchestrates the backend, fixtures, sessions and steps

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, Instant};

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::api::{ApiClient, ApiConfig};
use crate::error::{E2eError, E2eResult};
use crate::fixture::FixtureContext;
use crate::page::{Locator, Page, WaitState};
use crate::playwright::{PlaywrightConfig, PlaywrightPage};
use crate::provision::Provisioner;
use crate::readiness::{navigate_and_wait, wait_for_page_ready, ReadinessOptions};
use crate::session::{SessionBootstrapper, SessionConfig, SessionReport};
use crate::spec::{TestSpec, TestStep};

/// Result of executing a test step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub success: bool,
    pub step_name: String,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub screenshot_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TestOutcome {
    Passed,
    Failed { error: String },
    Skipped { reason: String },
}

/// Result of running a single test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    #[serde(flatten)]
    pub outcome: TestOutcome,
    pub duration_ms: u64,
    pub steps: Vec<StepResult>,
    pub session: Option<SessionReport>,
    pub fixtures: FixtureContext,
}

impl TestResult {
    pub fn passed(&self) -> bool {
        self.outcome == TestOutcome::Passed
    }

    fn failed(name: &str, error: String) -> Self {
        Self {
            name: name.to_string(),
            outcome: TestOutcome::Failed { error },
            duration_ms: 0,
            steps: vec![],
            session: None,
            fixtures: FixtureContext::default(),
        }
    }
}

/// Result of running all tests
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestSuiteResult {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub results: Vec<TestResult>,
}

impl TestSuiteResult {
    pub fn from_results(results: Vec<TestResult>, duration_ms: u64) -> Self {
        let mut suite = Self {
            total: results.len(),
            duration_ms,
            ..Default::default()
        };
        for result in &results {
            match result.outcome {
                TestOutcome::Passed => suite.passed += 1,
                TestOutcome::Failed { .. } => suite.failed += 1,
                TestOutcome::Skipped { .. } => suite.skipped += 1,
            }
        }
        suite.results = results;
        suite
    }
}

/// Configuration for the test runner
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub api: ApiConfig,
    pub playwright: PlaywrightConfig,
    pub session: SessionConfig,
    pub specs_dir: PathBuf,
    pub output_dir: PathBuf,
    /// How long to wait for the backend to report healthy
    pub backend_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            playwright: PlaywrightConfig::default(),
            session: SessionConfig::default(),
            specs_dir: PathBuf::from("specs"),
            output_dir: PathBuf::from("test-results"),
            backend_timeout: Duration::from_secs(30),
        }
    }
}

/// Main E2E test runner
pub struct TestRunner {
    config: RunnerConfig,
    api: ApiClient,
    bootstrapper: SessionBootstrapper,
    connected: bool,
}

impl TestRunner {
    /// Create a test runner with custom configuration
    pub fn with_config(config: RunnerConfig) -> E2eResult<Self> {
        let api = ApiClient::new(config.api.clone())?;
        let bootstrapper = SessionBootstrapper::new(config.session.clone());
        Ok(Self {
            config,
            api,
            bootstrapper,
            connected: false,
        })
    }

    /// Wait for the backend and obtain an API token if auth is enabled
    pub async fn connect(&mut self) -> E2eResult<()> {
        if self.connected {
            return Ok(());
        }

        self.api.wait_until_healthy(self.config.backend_timeout).await?;

        match self.api.login(&self.config.session.credentials).await {
            Ok(Some(token)) => {
                info!("API session established");
                self.api = self.api.with_token(token);
            }
            Ok(None) => info!("Backend issued no token; using unauthenticated API calls"),
            Err(e) => warn!("API login failed: {}; using unauthenticated API calls", e),
        }

        self.connected = true;
        Ok(())
    }

    /// Run all tests in the specs directory
    pub async fn run_all(&mut self) -> E2eResult<TestSuiteResult> {
        let specs = TestSpec::load_all(&self.config.specs_dir)?;
        self.run_specs(&specs).await
    }

    /// Run tests matching a tag
    pub async fn run_tagged(&mut self, tag: &str) -> E2eResult<TestSuiteResult> {
        let specs = TestSpec::load_all(&self.config.specs_dir)?;
        let filtered: Vec<TestSpec> = TestSpec::filter_by_tag(&specs, tag).into_iter().cloned().collect();
        self.run_specs(&filtered).await
    }

    /// Run a specific test by name
    pub async fn run_test(&mut self, name: &str) -> E2eResult<TestResult> {
        let specs = TestSpec::load_all(&self.config.specs_dir)?;
        let spec = specs
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| E2eError::SpecParse(format!("Test not found: {}", name)))?;

        self.connect().await?;
        Ok(self.run_spec(&spec).await)
    }

    /// Run a list of test specs
    pub async fn run_specs(&mut self, specs: &[TestSpec]) -> E2eResult<TestSuiteResult> {
        let start = Instant::now();
        let mut results = Vec::new();

        self.connect().await?;

        info!("Running {} test(s)...", specs.len());

        for spec in specs {
            let result = self.run_spec(spec).await;
            match &result.outcome {
                TestOutcome::Passed => info!("✓ {} ({} ms)", result.name, result.duration_ms),
                TestOutcome::Failed { error } => error!("✗ {} - {}", result.name, error),
                TestOutcome::Skipped { reason } => info!("- {} skipped: {}", result.name, reason),
            }
            results.push(result);
        }

        let suite = TestSuiteResult::from_results(results, start.elapsed().as_millis() as u64);

        info!("");
        info!(
            "Test Results: {} passed, {} failed, {} skipped ({} ms)",
            suite.passed, suite.failed, suite.skipped, suite.duration_ms
        );

        Ok(suite)
    }

    /// Run a single test spec. Setup problems become a failed or skipped
    /// result rather than an error.
    pub async fn run_spec(&self, spec: &TestSpec) -> TestResult {
        let start = Instant::now();
        debug!("Running test: {}", spec.name);

        let fixtures = match spec.setup.fixtures {
            Some(request) => Provisioner::new(self.api.clone()).setup_test_data(request).await,
            None => FixtureContext::default(),
        };

        let skipped = |reason: String| TestResult {
            name: spec.name.clone(),
            outcome: TestOutcome::Skipped { reason },
            duration_ms: start.elapsed().as_millis() as u64,
            steps: vec![],
            session: None,
            fixtures: fixtures.clone(),
        };

        let missing = fixtures.missing(&spec.requires);
        if let Some(fixture) = missing.first() {
            return skipped(format!("fixture {} not provisioned", fixture.key()));
        }

        let steps = match spec.steps.iter().map(|s| s.render(&fixtures)).collect::<E2eResult<Vec<_>>>() {
            Ok(steps) => steps,
            Err(E2eError::MissingFixture(key)) => return skipped(format!("fixture {} not provisioned", key)),
            Err(e) => {
                let mut result = TestResult::failed(&spec.name, e.to_string());
                result.fixtures = fixtures.clone();
                return result;
            }
        };

        let mut result = if spec.needs_browser() {
            self.run_in_browser(spec, &steps).await
        } else {
            let (step_results, error) = self.run_steps(spec, &steps, None).await;
            TestResult {
                name: spec.name.clone(),
                outcome: error.map_or(TestOutcome::Passed, |error| TestOutcome::Failed { error }),
                duration_ms: 0,
                steps: step_results,
                session: None,
                fixtures: FixtureContext::default(),
            }
        };

        result.fixtures = fixtures;
        result.duration_ms = start.elapsed().as_millis() as u64;
        result
    }

    async fn run_in_browser(&self, spec: &TestSpec, steps: &[TestStep]) -> TestResult {
        let mut pw_config = self.config.playwright.clone();
        pw_config.viewport_width = spec.viewport.width;
        pw_config.viewport_height = spec.viewport.height;

        let page = match PlaywrightPage::launch(&pw_config).await {
            Ok(page) => page,
            Err(e) => return TestResult::failed(&spec.name, format!("browser launch failed: {}", e)),
        };

        let mut session = None;
        if spec.setup.login {
            match self.bootstrapper.bootstrap(&page).await {
                Ok(report) => session = Some(report),
                Err(e) => {
                    let _ = page.close().await;
                    return TestResult::failed(&spec.name, format!("session bootstrap failed: {}", e));
                }
            }
        }

        let (step_results, error) = self.run_steps(spec, steps, Some(&page as &dyn Page)).await;

        if let Err(e) = page.close().await {
            warn!("Failed to close browser: {}", e);
        }

        TestResult {
            name: spec.name.clone(),
            outcome: error.map_or(TestOutcome::Passed, |error| TestOutcome::Failed { error }),
            duration_ms: 0,
            steps: step_results,
            session,
            fixtures: FixtureContext::default(),
        }
    }

    /// Execute steps in order, stopping at the first failure
    async fn run_steps(
        &self,
        spec: &TestSpec,
        steps: &[TestStep],
        page: Option<&dyn Page>,
    ) -> (Vec<StepResult>, Option<String>) {
        let mut step_results = Vec::new();

        for step in steps {
            let mut result = self.execute_step(spec, step, page).await;

            if !result.success {
                let error = result.error.clone();
                if let Some(page) = page {
                    let path = self.screenshot_path(spec, "failure");
                    match page.screenshot(&path, true).await {
                        Ok(()) => result.screenshot_path = Some(path),
                        Err(e) => debug!("No failure screenshot: {}", e),
                    }
                }
                step_results.push(result);
                return (step_results, error);
            }

            step_results.push(result);
        }

        (step_results, None)
    }

    fn screenshot_path(&self, spec: &TestSpec, name: &str) -> PathBuf {
        self.config
            .playwright
            .screenshot_dir
            .join(format!("{}-{}.png", spec.name, name))
    }

    /// Execute a single test step
    pub async fn execute_step(&self, spec: &TestSpec, step: &TestStep, page: Option<&dyn Page>) -> StepResult {
        let start = Instant::now();
        let step_name = step.describe();

        debug!("Executing step: {}", step_name);

        let result = match page {
            Some(page) => self.run_step(spec, step, Some(page)).await,
            None if step.needs_browser() => Err(E2eError::StepFailed {
                step: step_name.clone(),
                reason: "step needs a browser page".into(),
            }),
            None => self.run_step(spec, step, None).await,
        };

        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(screenshot_path) => StepResult {
                success: true,
                step_name,
                duration_ms,
                error: None,
                screenshot_path,
            },
            Err(e) => StepResult {
                success: false,
                step_name,
                duration_ms,
                error: Some(e.to_string()),
                screenshot_path: None,
            },
        }
    }

    async fn run_step(&self, spec: &TestSpec, step: &TestStep, page: Option<&dyn Page>) -> E2eResult<Option<PathBuf>> {
        let need_page = || {
            page.ok_or_else(|| E2eError::StepFailed {
                step: step.describe(),
                reason: "step needs a browser page".into(),
            })
        };

        match step {
            TestStep::Navigate { url, ready } => {
                match ready {
                    Some(options) => navigate_and_wait(need_page()?, url, options).await?,
                    None => need_page()?.goto(url).await?,
                }
                Ok(None)
            }
            TestStep::WaitReady {
                heading,
                loading_gone,
                test_id,
                timeout_ms,
            } => {
                let options = ReadinessOptions {
                    heading: heading.clone(),
                    loading_gone: *loading_gone,
                    test_id: test_id.clone(),
                    timeout_ms: *timeout_ms,
                };
                wait_for_page_ready(need_page()?, &options).await?;
                Ok(None)
            }
            TestStep::Click { locator } => {
                need_page()?.click(locator).await?;
                Ok(None)
            }
            TestStep::Fill { locator, value } => {
                need_page()?.fill(locator, value).await?;
                Ok(None)
            }
            TestStep::Press { locator, key } => {
                need_page()?.press(locator, key).await?;
                Ok(None)
            }
            TestStep::Wait {
                locator,
                timeout_ms,
                state,
            } => {
                need_page()?
                    .wait_for(locator, *state, Duration::from_millis(*timeout_ms))
                    .await?;
                Ok(None)
            }
            TestStep::Sleep { ms } => {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
                Ok(None)
            }
            TestStep::Assert {
                locator,
                visible,
                text_contains,
                count,
                min_count,
                timeout_ms,
            } => {
                assert_element(
                    need_page()?,
                    locator,
                    *visible,
                    text_contains.as_deref(),
                    *count,
                    *min_count,
                    Duration::from_millis(*timeout_ms),
                )
                .await?;
                Ok(None)
            }
            TestStep::AssertUrl { contains } => {
                let url = need_page()?.current_url().await?;
                if url.contains(contains.as_str()) {
                    Ok(None)
                } else {
                    Err(E2eError::AssertionFailed(format!(
                        "expected URL containing {:?}, got {:?}",
                        contains, url
                    )))
                }
            }
            TestStep::Screenshot { name, full_page } => {
                let path = self.screenshot_path(spec, name);
                need_page()?.screenshot(&path, *full_page).await?;
                Ok(Some(path))
            }
            TestStep::Login => {
                let report = self.bootstrapper.bootstrap(need_page()?).await?;
                debug!("Re-login: {:?}", report.login);
                Ok(None)
            }
            TestStep::Logout => {
                self.bootstrapper.sign_out(need_page()?).await?;
                Ok(None)
            }
            TestStep::Api {
                method,
                path,
                body,
                expect_status,
                expect_json,
            } => {
                let method = Method::from_str(&method.to_uppercase()).map_err(|_| E2eError::StepFailed {
                    step: step.describe(),
                    reason: format!("invalid HTTP method {:?}", method),
                })?;
                let response = self.api.request(method.clone(), path, body.as_ref()).await?;

                match expect_status {
                    Some(expected) if response.status != *expected => {
                        return Err(E2eError::AssertionFailed(format!(
                            "{} {} returned {}, expected {}",
                            method, path, response.status, expected
                        )));
                    }
                    None if !response.is_success() => {
                        return Err(E2eError::UnexpectedStatus {
                            method: method.to_string(),
                            path: path.clone(),
                            status: response.status,
                        });
                    }
                    _ => {}
                }

                if let Some(expected) = expect_json {
                    if !json_contains(&response.body, expected) {
                        return Err(E2eError::AssertionFailed(format!(
                            "{} {} body {} does not contain {}",
                            method, path, response.body, expected
                        )));
                    }
                }
                Ok(None)
            }
            TestStep::ExecuteTool {
                tool,
                input,
                expect_success,
            } => {
                let execution = self.api.execute_tool(tool, input).await?;
                if execution.success != *expect_success {
                    return Err(E2eError::AssertionFailed(format!(
                        "tool {} reported success={} (error: {})",
                        tool,
                        execution.success,
                        execution.error.as_deref().unwrap_or("none")
                    )));
                }
                Ok(None)
            }
            TestStep::Log { message } => {
                info!("[TEST LOG] {}", message);
                Ok(None)
            }
        }
    }

    /// Write test results to JSON file
    pub fn write_results(&self, results: &TestSuiteResult) -> E2eResult<PathBuf> {
        write_results(&self.config.output_dir, results)
    }
}

/// Write `results` as `test-results.json` under `output_dir`
pub fn write_results(output_dir: &Path, results: &TestSuiteResult) -> E2eResult<PathBuf> {
    std::fs::create_dir_all(output_dir)?;

    let path = output_dir.join("test-results.json");
    let json = serde_json::to_string_pretty(results)?;
    std::fs::write(&path, json)?;

    info!("Results written to: {}", path.display());
    Ok(path)
}

async fn assert_element(
    page: &dyn Page,
    locator: &Locator,
    visible: Option<bool>,
    text_contains: Option<&str>,
    count: Option<usize>,
    min_count: Option<usize>,
    timeout: Duration,
) -> E2eResult<()> {
    let as_assertion = |what: String| {
        move |e: E2eError| {
            if e.is_timeout() {
                E2eError::AssertionFailed(what)
            } else {
                e
            }
        }
    };

    if let Some(vis) = visible {
        let state = if vis { WaitState::Visible } else { WaitState::Hidden };
        page.wait_for(locator, state, timeout)
            .await
            .map_err(as_assertion(format!("expected {} to be {}", locator, state.as_str())))?;
    }

    if let Some(expected) = text_contains {
        page.wait_for(locator, WaitState::Visible, timeout)
            .await
            .map_err(as_assertion(format!("expected {} to be visible", locator)))?;
        let text = page.text_content(locator).await?.unwrap_or_default();
        if !text.contains(expected) {
            return Err(E2eError::AssertionFailed(format!(
                "expected {} to contain {:?}, got {:?}",
                locator, expected, text
            )));
        }
    }

    if count.is_some() || min_count.is_some() {
        if min_count.unwrap_or(0) > 0 {
            page.wait_for(locator, WaitState::Attached, timeout)
                .await
                .map_err(as_assertion(format!("expected at least one {}", locator)))?;
        }
        let actual = page.count(locator).await?;
        if let Some(expected) = count {
            if actual != expected {
                return Err(E2eError::AssertionFailed(format!(
                    "expected {} x {}, found {}",
                    expected, locator, actual
                )));
            }
        }
        if let Some(minimum) = min_count {
            if actual < minimum {
                return Err(E2eError::AssertionFailed(format!(
                    "expected at least {} x {}, found {}",
                    minimum, locator, actual
                )));
            }
        }
    }

    Ok(())
}

/// Whether `actual` contains every field and value of `expected`
pub fn json_contains(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Object(actual), Value::Object(expected)) => expected
            .iter()
            .all(|(key, value)| actual.get(key).map_or(false, |a| json_contains(a, value))),
        (Value::Array(actual), Value::Array(expected)) => {
            expected.iter().all(|e| actual.iter().any(|a| json_contains(a, e)))
        }
        (actual, expected) => actual == expected,
    }
}
