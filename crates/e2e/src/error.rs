//! Error types for the E2E suite

use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("WebDriver binary not found: {0}")]
    DriverNotFound(String),

    #[error("WebDriver failed to start: {0}")]
    DriverStartup(String),

    #[error("WebDriver health check failed after {0} attempts")]
    DriverHealthCheck(usize),

    #[error("WebDriver error: {0}")]
    WebDriver(#[from] thirtyfour::error::WebDriverError),

    #[error("Assertion failed: {what}: expected {expected}, got {actual}")]
    AssertionFailed {
        what: String,
        expected: String,
        actual: String,
    },

    #[error("Timeout after {after_ms} ms waiting for: {what}{}", last_observed_suffix(.last_observed))]
    Timeout {
        what: String,
        after_ms: u64,
        last_observed: Option<String>,
    },

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Scenario exceeded its time budget of {0} ms")]
    ScenarioTimeout(u64),

    #[error("Screenshot mismatch: {name} differs by {diff_percent:.2}% (threshold: {threshold:.2}%)")]
    ScreenshotMismatch {
        name: String,
        diff_percent: f64,
        threshold: f64,
    },

    #[error("Baseline not found: {0}")]
    BaselineNotFound(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

fn last_observed_suffix(last: &Option<String>) -> String {
    match last {
        Some(seen) => format!(" (last observed: {})", seen),
        None => String::new(),
    }
}

impl E2eError {
    /// Whether this error means the application state did not match
    /// expectations, as opposed to the harness itself breaking.
    pub fn is_assertion(&self) -> bool {
        matches!(
            self,
            E2eError::AssertionFailed { .. }
                | E2eError::Timeout { .. }
                | E2eError::ScreenshotMismatch { .. }
        )
    }

    /// Turn a polling timeout into an assertion mismatch against `expected`.
    pub fn into_assertion(self, expected: impl Into<String>) -> Self {
        match self {
            E2eError::Timeout {
                what,
                last_observed,
                ..
            } => E2eError::AssertionFailed {
                what,
                expected: expected.into(),
                actual: last_observed.unwrap_or_else(|| "nothing".to_string()),
            },
            other => other,
        }
    }
}

pub type E2eResult<T> = Result<T, E2eError>;
