//! Playwright browser automation
//!
//! A single `node` process per test runs the embedded driver script and keeps
//! one browser page alive. Requests and replies are JSON lines tagged with an
//! id, so a caller that gives up on a request (e.g. the login race) never
//! receives a stale reply for a later one.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command as TokioCommand};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{E2eError, E2eResult};
use crate::page::{LoadState, Locator, Page, WaitState};

const DRIVER_JS: &str = include_str!("driver.js");

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
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
        match s {
            "chromium" => Ok(Browser::Chromium),
            "firefox" => Ok(Browser::Firefox),
            "webkit" => Ok(Browser::Webkit),
            other => Err(E2eError::Playwright(format!("unknown browser: {}", other))),
        }
    }
}

/// Configuration for Playwright
#[derive(Debug, Clone)]
pub struct PlaywrightConfig {
    /// Frontend base URL; `goto` paths are appended to it
    pub base_url: String,
    pub screenshot_dir: PathBuf,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub browser: Browser,
    pub headless: bool,
    /// Default timeout for actions without their own bound
    pub action_timeout: Duration,
    /// How long to wait for the browser to launch
    pub startup_timeout: Duration,
    /// Directory `playwright` is resolved from (its node_modules)
    pub working_dir: PathBuf,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5173".to_string(),
            screenshot_dir: PathBuf::from("test-results/screenshots"),
            viewport_width: 1280,
            viewport_height: 720,
            browser: Browser::Chromium,
            headless: true,
            action_timeout: Duration::from_secs(15),
            startup_timeout: Duration::from_secs(30),
            working_dir: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DriverReply {
    id: u64,
    ok: bool,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    timeout: bool,
    #[serde(default)]
    error: Option<String>,
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<DriverReply>>>>;

/// A live browser page backed by the node driver
pub struct PlaywrightPage {
    child: Child,
    outbox: mpsc::UnboundedSender<String>,
    pending: Pending,
    next_id: AtomicU64,
    tasks: Vec<JoinHandle<()>>,
    _script_dir: tempfile::TempDir,
}

impl PlaywrightPage {
    /// Launch a browser and open a blank page
    pub async fn launch(config: &PlaywrightConfig) -> E2eResult<Self> {
        std::fs::create_dir_all(&config.screenshot_dir)?;

        let script_dir = tempfile::tempdir()?;
        let script_path = script_dir.path().join("driver.js");
        std::fs::write(&script_path, DRIVER_JS)?;

        let driver_config = json!({
            "base_url": config.base_url.trim_end_matches('/'),
            "browser": config.browser.as_str(),
            "headless": config.headless,
            "viewport_width": config.viewport_width,
            "viewport_height": config.viewport_height,
            "action_timeout_ms": config.action_timeout.as_millis() as u64,
        });

        info!("Launching {} via Playwright driver", config.browser.as_str());

        let mut child = TokioCommand::new("node")
            .arg(&script_path)
            .arg(driver_config.to_string())
            .current_dir(&config.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child.stdin.take().ok_or_else(|| E2eError::Playwright("driver stdin unavailable".into()))?;
        let stdout = child.stdout.take().ok_or_else(|| E2eError::Playwright("driver stdout unavailable".into()))?;
        let stderr = child.stderr.take().ok_or_else(|| E2eError::Playwright("driver stderr unavailable".into()))?;

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (ready_tx, ready_rx) = oneshot::channel();
        pending.lock().insert(0, ready_tx);

        let (outbox, mut inbox) = mpsc::unbounded_channel::<String>();
        let writer = tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(line) = inbox.recv().await {
                if stdin.write_all(line.as_bytes()).await.is_err() || stdin.flush().await.is_err() {
                    break;
                }
            }
        });

        let reader_pending = pending.clone();
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match serde_json::from_str::<DriverReply>(&line) {
                    Ok(reply) => {
                        let waiter = reader_pending.lock().remove(&reply.id);
                        match waiter {
                            Some(tx) => {
                                let _ = tx.send(reply);
                            }
                            None => debug!("Dropping late driver reply {}", reply.id),
                        }
                    }
                    Err(_) => debug!("driver: {}", line),
                }
            }
            // Dropping the senders fails every outstanding request.
            reader_pending.lock().clear();
        });

        let logger = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!("driver: {}", line);
            }
        });

        let page = Self {
            child,
            outbox,
            pending,
            next_id: AtomicU64::new(1),
            tasks: vec![writer, reader, logger],
            _script_dir: script_dir,
        };

        match tokio::time::timeout(config.startup_timeout, ready_rx).await {
            Ok(Ok(reply)) if reply.ok => Ok(page),
            Ok(Ok(reply)) => Err(E2eError::Playwright(reply.error.unwrap_or_default())),
            Ok(Err(_)) => Err(E2eError::DriverExited("browser failed to launch".into())),
            Err(_) => Err(E2eError::Timeout("browser launch".into())),
        }
    }

    /// Check if Playwright is installed
    pub fn check_playwright_installed() -> E2eResult<()> {
        let output = Command::new("npx")
            .args(["playwright", "--version"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match output {
            Ok(status) if status.success() => Ok(()),
            _ => Err(E2eError::PlaywrightNotFound),
        }
    }

    async fn request(&self, op: &str, args: Value) -> E2eResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut message = match args {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        message.insert("id".into(), json!(id));
        message.insert("op".into(), json!(op));

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        debug!("driver <- {} #{}", op, id);
        let line = format!("{}\n", Value::Object(message));
        if self.outbox.send(line).is_err() {
            self.pending.lock().remove(&id);
            return Err(E2eError::DriverExited(format!("cannot send {}", op)));
        }

        let reply = rx
            .await
            .map_err(|_| E2eError::DriverExited(format!("no reply to {}", op)))?;

        if reply.ok {
            Ok(reply.result)
        } else if reply.timeout {
            Err(E2eError::Timeout(reply.error.unwrap_or_else(|| op.to_string())))
        } else {
            Err(E2eError::Playwright(reply.error.unwrap_or_else(|| format!("{} failed", op))))
        }
    }

    /// Close the browser and wait for the driver to exit
    pub async fn close(mut self) -> E2eResult<()> {
        let _ = tokio::time::timeout(Duration::from_secs(5), self.request("close", json!({}))).await;
        if tokio::time::timeout(Duration::from_secs(5), self.child.wait()).await.is_err() {
            self.child.kill().await?;
        }
        Ok(())
    }
}

impl Drop for PlaywrightPage {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn millis(d: Duration) -> u64 {
    d.as_millis() as u64
}

#[async_trait]
impl Page for PlaywrightPage {
    async fn goto(&self, path: &str) -> E2eResult<()> {
        self.request("goto", json!({ "path": path })).await?;
        Ok(())
    }

    async fn wait_for_load_state(&self, state: LoadState) -> E2eResult<()> {
        self.request("wait_for_load_state", json!({ "state": state.as_str() })).await?;
        Ok(())
    }

    async fn fill(&self, locator: &Locator, value: &str) -> E2eResult<()> {
        self.request("fill", json!({ "locator": locator, "value": value })).await?;
        Ok(())
    }

    async fn click(&self, locator: &Locator) -> E2eResult<()> {
        self.request("click", json!({ "locator": locator })).await?;
        Ok(())
    }

    async fn press(&self, locator: &Locator, key: &str) -> E2eResult<()> {
        self.request("press", json!({ "locator": locator, "key": key })).await?;
        Ok(())
    }

    async fn click_and_wait_for_response(
        &self,
        locator: &Locator,
        url_fragment: &str,
        timeout: Duration,
    ) -> E2eResult<Option<u16>> {
        let result = self
            .request(
                "click_and_wait_for_response",
                json!({ "locator": locator, "url_fragment": url_fragment, "timeout_ms": millis(timeout) }),
            )
            .await?;
        Ok(result.as_u64().map(|s| s as u16))
    }

    async fn wait_for_storage_item(&self, key: &str, timeout: Duration) -> E2eResult<()> {
        self.request("wait_for_storage_item", json!({ "key": key, "timeout_ms": millis(timeout) }))
            .await
            .map_err(|e| match e {
                E2eError::Timeout(_) => E2eError::Timeout(format!("localStorage[{}]", key)),
                other => other,
            })?;
        Ok(())
    }

    async fn storage_item(&self, key: &str) -> E2eResult<Option<String>> {
        let result = self.request("storage_item", json!({ "key": key })).await?;
        Ok(result.as_str().map(String::from))
    }

    async fn cookie(&self, name: &str) -> E2eResult<Option<String>> {
        let result = self.request("cookie", json!({ "name": name })).await?;
        Ok(result.as_str().map(String::from))
    }

    async fn clear_session(&self) -> E2eResult<()> {
        self.request("clear_session", json!({})).await?;
        Ok(())
    }

    async fn count(&self, locator: &Locator) -> E2eResult<usize> {
        let result = self.request("count", json!({ "locator": locator })).await?;
        Ok(result.as_u64().unwrap_or(0) as usize)
    }

    async fn wait_for(&self, locator: &Locator, state: WaitState, timeout: Duration) -> E2eResult<()> {
        self.request(
            "wait_for",
            json!({ "locator": locator, "state": state.as_str(), "timeout_ms": millis(timeout) }),
        )
        .await
        .map_err(|e| match e {
            E2eError::Timeout(_) => E2eError::Timeout(format!("{} to be {}", locator, state.as_str())),
            other => other,
        })?;
        Ok(())
    }

    async fn text_content(&self, locator: &Locator) -> E2eResult<Option<String>> {
        let result = self.request("text_content", json!({ "locator": locator })).await?;
        Ok(result.as_str().map(String::from))
    }

    async fn screenshot(&self, path: &Path, full_page: bool) -> E2eResult<()> {
        self.request(
            "screenshot",
            json!({ "path": path.to_string_lossy(), "full_page": full_page }),
        )
        .await?;
        Ok(())
    }

    async fn current_url(&self) -> E2eResult<String> {
        let result = self.request("current_url", json!({})).await?;
        Ok(result.as_str().unwrap_or_default().to_string())
    }
}
