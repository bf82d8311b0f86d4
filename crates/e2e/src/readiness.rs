//! Page readiness
//!
//! Pages in the console keep polling and hold SSE connections open, so
//! "network idle" may never arrive. Readiness is instead decided by explicit
//! signals, each with its own bound.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{E2eError, E2eResult};
use crate::page::{LoadState, Locator, Page, WaitState};

/// Markers the console uses for skeletons and spinners
pub const LOADING_MARKERS: &[&str] = &[
    "[data-testid=\"loading-skeleton\"]",
    "[data-testid=\"loading-spinner\"]",
    "[aria-busy=\"true\"]",
    ".animate-pulse",
];

fn default_timeout_ms() -> u64 {
    10_000
}

/// Signals that must hold before a page counts as ready
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessOptions {
    /// Accessible name of a heading that must be visible
    #[serde(default)]
    pub heading: Option<String>,

    /// Wait for loading indicators to disappear
    #[serde(default)]
    pub loading_gone: bool,

    /// `data-testid` of an element that must be visible
    #[serde(default)]
    pub test_id: Option<String>,

    /// Bound applied to each signal separately
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ReadinessOptions {
    fn default() -> Self {
        Self {
            heading: None,
            loading_gone: false,
            test_id: None,
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl ReadinessOptions {
    pub fn heading(name: impl Into<String>) -> Self {
        Self {
            heading: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_loading_gone(mut self) -> Self {
        self.loading_gone = true;
        self
    }

    pub fn with_test_id(mut self, id: impl Into<String>) -> Self {
        self.test_id = Some(id.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn loading_locator() -> Locator {
    Locator::css(LOADING_MARKERS.join(", "))
}

/// Wait until every configured signal holds, in order: heading, loading
/// indicators, test id. The first signal to time out fails the wait.
pub async fn wait_for_page_ready(page: &dyn Page, options: &ReadinessOptions) -> E2eResult<()> {
    page.wait_for_load_state(LoadState::DomContentLoaded).await?;

    let timeout = options.timeout();
    let timeout_ms = options.timeout_ms;
    let not_ready = |signal: String| {
        move |e: E2eError| {
            if e.is_timeout() {
                E2eError::NotReady { signal, timeout_ms }
            } else {
                e
            }
        }
    };

    if let Some(heading) = &options.heading {
        page.wait_for(&Locator::heading(heading.as_str()), WaitState::Visible, timeout)
            .await
            .map_err(not_ready(format!("heading \"{}\"", heading)))?;
    }

    if options.loading_gone {
        let loading = loading_locator();
        let count = page.count(&loading).await?;
        if count > 0 {
            debug!("Waiting for {} loading indicator(s) to clear", count);
            page.wait_for(&loading, WaitState::Hidden, timeout)
                .await
                .map_err(not_ready("loading indicators gone".to_string()))?;
        }
    }

    if let Some(id) = &options.test_id {
        page.wait_for(&Locator::test_id(id.as_str()), WaitState::Visible, timeout)
            .await
            .map_err(not_ready(format!("element [data-testid=\"{}\"]", id)))?;
    }

    Ok(())
}

/// Navigate to `path` and wait for it to be ready
pub async fn navigate_and_wait(page: &dyn Page, path: &str, options: &ReadinessOptions) -> E2eResult<()> {
    page.goto(path).await?;
    wait_for_page_ready(page, options).await
}
