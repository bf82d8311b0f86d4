//! Browser page abstraction used by the session, readiness and step helpers

use std::fmt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::E2eResult;

/// How to find an element on the page.
///
/// Serialized untagged so YAML specs can write `{ test_id: twin-card }`,
/// `{ role: button, name: Send }` or a bare CSS string, and the driver receives
/// the same shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Locator {
    /// `data-testid` attribute
    TestId { test_id: String },
    /// ARIA role with an optional accessible name filter
    Role {
        role: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    /// Input or textarea placeholder
    Placeholder { placeholder: String },
    /// Visible text content
    Text { text: String },
    /// Raw CSS selector
    Css(String),
}

impl Locator {
    pub fn test_id(id: impl Into<String>) -> Self {
        Locator::TestId { test_id: id.into() }
    }

    pub fn role(role: impl Into<String>, name: Option<&str>) -> Self {
        Locator::Role {
            role: role.into(),
            name: name.map(String::from),
        }
    }

    pub fn heading(name: impl Into<String>) -> Self {
        Locator::Role {
            role: "heading".to_string(),
            name: Some(name.into()),
        }
    }

    pub fn placeholder(text: impl Into<String>) -> Self {
        Locator::Placeholder { placeholder: text.into() }
    }

    pub fn css(selector: impl Into<String>) -> Self {
        Locator::Css(selector.into())
    }

    /// Apply `f` to every string argument (used for fixture placeholders)
    pub fn try_map<E>(&self, mut f: impl FnMut(&str) -> Result<String, E>) -> Result<Self, E> {
        Ok(match self {
            Locator::TestId { test_id } => Locator::TestId { test_id: f(test_id)? },
            Locator::Role { role, name } => Locator::Role {
                role: f(role)?,
                name: name.as_deref().map(&mut f).transpose()?,
            },
            Locator::Placeholder { placeholder } => Locator::Placeholder {
                placeholder: f(placeholder)?,
            },
            Locator::Text { text } => Locator::Text { text: f(text)? },
            Locator::Css(selector) => Locator::Css(f(selector)?),
        })
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::TestId { test_id } => write!(f, "[data-testid=\"{}\"]", test_id),
            Locator::Role { role, name: Some(name) } => write!(f, "role={}[name=\"{}\"]", role, name),
            Locator::Role { role, name: None } => write!(f, "role={}", role),
            Locator::Placeholder { placeholder } => write!(f, "[placeholder=\"{}\"]", placeholder),
            Locator::Text { text } => write!(f, "text=\"{}\"", text),
            Locator::Css(selector) => f.write_str(selector),
        }
    }
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

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadState {
    #[default]
    DomContentLoaded,
    Load,
    NetworkIdle,
}

impl LoadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadState::DomContentLoaded => "domcontentloaded",
            LoadState::Load => "load",
            LoadState::NetworkIdle => "networkidle",
        }
    }
}

/// The browser operations the suite relies on.
///
/// Every method suspends until the browser has acted or the operation's own
/// timeout has elapsed. Waits report expiry as [`crate::E2eError::Timeout`].
#[async_trait]
pub trait Page: Send + Sync {
    /// Navigate to a path relative to the frontend base URL
    async fn goto(&self, path: &str) -> E2eResult<()>;

    async fn wait_for_load_state(&self, state: LoadState) -> E2eResult<()>;

    async fn fill(&self, locator: &Locator, value: &str) -> E2eResult<()>;

    async fn click(&self, locator: &Locator) -> E2eResult<()>;

    async fn press(&self, locator: &Locator, key: &str) -> E2eResult<()>;

    /// Click and report the status of the first response whose URL contains
    /// `url_fragment`, or `None` if none arrives within `timeout`.
    async fn click_and_wait_for_response(
        &self,
        locator: &Locator,
        url_fragment: &str,
        timeout: Duration,
    ) -> E2eResult<Option<u16>>;

    /// Wait until `localStorage[key]` is set
    async fn wait_for_storage_item(&self, key: &str, timeout: Duration) -> E2eResult<()>;

    async fn storage_item(&self, key: &str) -> E2eResult<Option<String>>;

    async fn cookie(&self, name: &str) -> E2eResult<Option<String>>;

    /// Drop cookies and local storage for the current origin
    async fn clear_session(&self) -> E2eResult<()>;

    async fn count(&self, locator: &Locator) -> E2eResult<usize>;

    /// Wait for the first element matching `locator` to reach `state`
    async fn wait_for(&self, locator: &Locator, state: WaitState, timeout: Duration) -> E2eResult<()>;

    async fn text_content(&self, locator: &Locator) -> E2eResult<Option<String>>;

    async fn screenshot(&self, path: &Path, full_page: bool) -> E2eResult<()>;

    async fn current_url(&self) -> E2eResult<String>;
}
