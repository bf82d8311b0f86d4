//! Error types for E2E testing

use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Backend health check failed after {0} attempts")]
    BackendHealthCheck(usize),

    #[error("Playwright not found. Install with: npm i playwright && npx playwright install")]
    PlaywrightNotFound,

    #[error("Playwright error: {0}")]
    Playwright(String),

    #[error("Driver exited: {0}")]
    DriverExited(String),

    #[error("Test spec parse error: {0}")]
    SpecParse(String),

    #[error("Step failed: {step} - {reason}")]
    StepFailed { step: String, reason: String },

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    #[error("Page not ready: {signal} not satisfied within {timeout_ms} ms")]
    NotReady { signal: String, timeout_ms: u64 },

    #[error("Unexpected status {status} from {method} {path}")]
    UnexpectedStatus {
        method: String,
        path: String,
        status: u16,
    },

    #[error("Fixture not provisioned: {0}")]
    MissingFixture(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl E2eError {
    /// Whether this error is a bounded wait running out rather than a real failure
    pub fn is_timeout(&self) -> bool {
        matches!(self, E2eError::Timeout(_) | E2eError::NotReady { .. })
    }
}

pub type E2eResult<T> = Result<T, E2eError>;
